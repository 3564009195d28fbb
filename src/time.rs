//! OCPP wall-clock handling.
//!
//! The central system is the time authority: the charge point boots with an
//! unset clock and learns wall time from BootNotification / Heartbeat
//! responses. Until then, every event is anchored to the monotonic tick
//! counter; when the clock is first set, tick anchors are converted to wall
//! time retroactively.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Scalar time difference in seconds.
pub type TimeSecs = i32;

/// Largest representable scalar difference.
pub const OTIME_MAX: TimeSecs = i32::MAX;

/// Scalars at or above this threshold mean "infinity / invalid". 400 days of
/// headroom below the i32 limit.
pub const INFINITY_THLD: TimeSecs = OTIME_MAX - 400 * 24 * 3600;

/// Serialized length of a timestamp: `YYYY-MM-DDTHH:MM:SS.sssZ`.
pub const JSONDATE_LENGTH: usize = 24;

const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: i32) -> i32 {
    if month == 1 && is_leap_year(year) {
        29
    } else {
        i32::from(DAYS_IN_MONTH[month as usize])
    }
}

/// Broken-down UTC timestamp.
///
/// Internal representation is zero-based where the calendar is: `month` runs
/// 0..=11 and `day` 0..=30. The default value is the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    year: i32,
    month: i32,
    day: i32,
    hour: i32,
    minute: i32,
    second: i32,
}

/// Unix epoch, the smallest admitted timestamp.
pub const MIN_TIME: Timestamp = Timestamp {
    year: 1970,
    month: 0,
    day: 0,
    hour: 0,
    minute: 0,
    second: 0,
};

/// Sentinel upper bound of the valid range.
pub const MAX_TIME: Timestamp = Timestamp {
    year: 2036,
    month: 0,
    day: 0,
    hour: 0,
    minute: 0,
    second: 0,
};

impl Default for Timestamp {
    fn default() -> Self {
        MIN_TIME
    }
}

impl Timestamp {
    /// Parse an ISO-8601 date string such as `2020-10-01T20:53:32.486Z`.
    ///
    /// Only the first 19 characters (`YYYY-MM-DDTHH:MM:SS`) are interpreted;
    /// an optional fractional part and `Z` suffix are accepted and ignored.
    /// Returns `None` on anything that is not a JSON date string.
    pub fn parse_iso(s: &str) -> Option<Timestamp> {
        let b = s.as_bytes();
        if b.len() < 19 {
            return None;
        }
        for (i, c) in b[..19].iter().enumerate() {
            match i {
                4 | 7 => {
                    if *c != b'-' {
                        return None;
                    }
                }
                10 => {
                    if *c != b'T' {
                        return None;
                    }
                }
                13 | 16 => {
                    if *c != b':' {
                        return None;
                    }
                }
                _ => {
                    if !c.is_ascii_digit() {
                        return None;
                    }
                }
            }
        }
        // Everything past position 19 must be a fractional part and/or 'Z'.
        let mut rest = &b[19..];
        if let Some((&b'.', frac)) = rest.split_first() {
            let digits = frac.iter().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                return None;
            }
            rest = &frac[digits..];
        }
        if !(rest.is_empty() || rest == b"Z") {
            return None;
        }

        let num = |range: std::ops::Range<usize>| -> i32 {
            s[range].parse().unwrap_or(0)
        };
        let ts = Timestamp {
            year: num(0..4),
            month: num(5..7) - 1,
            day: num(8..10) - 1,
            hour: num(11..13),
            minute: num(14..16),
            second: num(17..19),
        };
        if ts.year < 1970
            || !(0..12).contains(&ts.month)
            || ts.day < 0
            || ts.day >= days_in_month(ts.year, ts.month)
            || !(0..24).contains(&ts.hour)
            || !(0..60).contains(&ts.minute)
            || !(0..60).contains(&ts.second)
        {
            return None;
        }
        Some(ts)
    }

    /// Format as a 24-character ISO-8601 string with a `.000` sub-second field.
    pub fn format_iso(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.000Z",
            self.year,
            self.month + 1,
            self.day + 1,
            self.hour,
            self.minute,
            self.second
        )
    }

    /// Days since the Unix epoch.
    fn days_from_epoch(&self) -> i64 {
        let mut days: i64 = 0;
        for y in 1970..self.year {
            days += if is_leap_year(y) { 366 } else { 365 };
        }
        for m in 0..self.month {
            days += i64::from(days_in_month(self.year, m));
        }
        days + i64::from(self.day)
    }

    /// Signed difference `self - rhs` in seconds, saturating at
    /// `±OTIME_MAX` instead of wrapping.
    pub fn seconds_since(&self, rhs: &Timestamp) -> TimeSecs {
        let days = self.days_from_epoch() - rhs.days_from_epoch();
        let intraday = i64::from(self.hour - rhs.hour) * 3600
            + i64::from(self.minute - rhs.minute) * 60
            + i64::from(self.second - rhs.second);
        let total = days * 86400 + intraday;
        if total > i64::from(OTIME_MAX) {
            OTIME_MAX
        } else if total < -i64::from(OTIME_MAX) {
            -OTIME_MAX
        } else {
            total as TimeSecs
        }
    }

    /// Add a signed number of seconds, carrying through the Gregorian
    /// calendar.
    pub fn plus_seconds(&self, secs: i64) -> Timestamp {
        let mut out = *self;
        let mut carry = secs;

        out.second += (carry % 60) as i32;
        carry /= 60;
        if out.second < 0 {
            out.second += 60;
            carry -= 1;
        } else if out.second >= 60 {
            out.second -= 60;
            carry += 1;
        }

        out.minute += (carry % 60) as i32;
        carry /= 60;
        if out.minute < 0 {
            out.minute += 60;
            carry -= 1;
        } else if out.minute >= 60 {
            out.minute -= 60;
            carry += 1;
        }

        out.hour += (carry % 24) as i32;
        carry /= 24;
        if out.hour < 0 {
            out.hour += 24;
            carry -= 1;
        } else if out.hour >= 24 {
            out.hour -= 24;
            carry += 1;
        }

        let mut day = i64::from(out.day) + carry;
        while day < 0 {
            out.month -= 1;
            if out.month < 0 {
                out.month += 12;
                out.year -= 1;
            }
            day += i64::from(days_in_month(out.year, out.month));
        }
        while day >= i64::from(days_in_month(out.year, out.month)) {
            day -= i64::from(days_in_month(out.year, out.month));
            out.month += 1;
            if out.month >= 12 {
                out.month -= 12;
                out.year += 1;
            }
        }
        out.day = day as i32;

        if out < MIN_TIME {
            MIN_TIME
        } else {
            out
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_iso())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format_iso())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse_iso(&s).ok_or_else(|| D::Error::custom("not a JSON date string"))
    }
}

/// Wall clock derived from the monotonic tick counter.
///
/// `set` records the pairing `(base_ocpp, base_tick)`; from then on any tick
/// value maps to a wall timestamp, including ticks that predate `base_tick`
/// (events recorded before the clock was set are back-dated).
#[derive(Debug, Clone, Default)]
pub struct Clock {
    base_ocpp: Timestamp,
    base_tick: u64,
    valid: bool,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a wall-time anchor has been established this boot.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Anchor wall time to the current tick. Returns false (and leaves the
    /// clock untouched) if the string does not parse.
    pub fn set(&mut self, iso: &str, now_tick: u64) -> bool {
        match Timestamp::parse_iso(iso) {
            Some(ts) => {
                self.base_ocpp = ts;
                self.base_tick = now_tick;
                self.valid = true;
                true
            }
            None => false,
        }
    }

    /// Current wall time. Before the first `set` this counts up from the
    /// epoch, which keeps arithmetic meaningful for tests and local logs.
    pub fn now(&self, now_tick: u64) -> Timestamp {
        self.at_tick(now_tick, now_tick)
    }

    /// Wall time of an arbitrary tick, observed at `now_tick`.
    pub fn at_tick(&self, tick: u64, _now_tick: u64) -> Timestamp {
        let delta_ms = tick as i64 - self.base_tick as i64;
        self.base_ocpp.plus_seconds(delta_ms / 1000)
    }
}

/// Moment of an event, either already on the wall clock or still anchored to
/// the tick counter of the current boot.
///
/// Tick anchors are not meaningful across reboots; they persist as a bare
/// pre-boot marker and reload as `Unset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventTime {
    #[default]
    Unset,
    Tick(u64),
    Wall(Timestamp),
}

impl EventTime {
    pub fn wall(&self) -> Option<Timestamp> {
        match self {
            EventTime::Wall(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, EventTime::Unset)
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Preboot {
            preboot: bool,
        }
        #[derive(Serialize)]
        struct Wall {
            ts: Timestamp,
        }
        match self {
            EventTime::Unset => serializer.serialize_none(),
            EventTime::Tick(_) => Preboot { preboot: true }.serialize(serializer),
            EventTime::Wall(ts) => Wall { ts: *ts }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for EventTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            preboot: bool,
            #[serde(default)]
            ts: Option<Timestamp>,
        }
        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        Ok(match raw {
            None => EventTime::Unset,
            Some(r) => {
                if let Some(ts) = r.ts {
                    EventTime::Wall(ts)
                } else {
                    // A tick anchor from a previous boot is unrecoverable.
                    let _ = r.preboot;
                    EventTime::Unset
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let ts = Timestamp::parse_iso("2023-01-01T00:00:00.000Z").unwrap();
        assert_eq!(ts.format_iso(), "2023-01-01T00:00:00.000Z");
        assert_eq!(ts.format_iso().len(), JSONDATE_LENGTH);

        let ts = Timestamp::parse_iso("2020-10-01T20:53:32.486Z").unwrap();
        assert_eq!(ts.format_iso(), "2020-10-01T20:53:32.000Z");
    }

    #[test]
    fn parse_accepts_bare_and_fractional_forms() {
        assert!(Timestamp::parse_iso("2023-06-15T11:22:33").is_some());
        assert!(Timestamp::parse_iso("2023-06-15T11:22:33Z").is_some());
        assert!(Timestamp::parse_iso("2023-06-15T11:22:33.5Z").is_some());
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(Timestamp::parse_iso("").is_none());
        assert!(Timestamp::parse_iso("2023-06-15").is_none());
        assert!(Timestamp::parse_iso("2023-06-15 11:22:33Z").is_none());
        assert!(Timestamp::parse_iso("2023-13-15T11:22:33Z").is_none());
        assert!(Timestamp::parse_iso("2023-02-30T11:22:33Z").is_none());
        assert!(Timestamp::parse_iso("2023-06-15T25:22:33Z").is_none());
        assert!(Timestamp::parse_iso("not-a-date-string!!!!").is_none());
        assert!(Timestamp::parse_iso("2023-06-15T11:22:33.Z").is_none());
        assert!(Timestamp::parse_iso("1969-12-31T23:59:59Z").is_none());
    }

    #[test]
    fn addition_carries_through_the_calendar() {
        let ts = Timestamp::parse_iso("2022-12-31T23:59:30Z").unwrap();
        assert_eq!(ts.plus_seconds(30).format_iso(), "2023-01-01T00:00:00.000Z");

        // 2024 is a leap year.
        let ts = Timestamp::parse_iso("2024-02-28T12:00:00Z").unwrap();
        assert_eq!(
            ts.plus_seconds(86400).format_iso(),
            "2024-02-29T12:00:00.000Z"
        );
        let ts = Timestamp::parse_iso("2023-02-28T12:00:00Z").unwrap();
        assert_eq!(
            ts.plus_seconds(86400).format_iso(),
            "2023-03-01T12:00:00.000Z"
        );
    }

    #[test]
    fn subtraction_yields_seconds() {
        let a = Timestamp::parse_iso("2023-01-02T00:00:00Z").unwrap();
        let b = Timestamp::parse_iso("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(a.seconds_since(&b), 86400);
        assert_eq!(b.seconds_since(&a), -86400);

        let far = MAX_TIME;
        assert!(far.seconds_since(&MIN_TIME) < INFINITY_THLD);
    }

    #[test]
    fn negative_addition_borrows() {
        let ts = Timestamp::parse_iso("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(
            ts.plus_seconds(-1).format_iso(),
            "2022-12-31T23:59:59.000Z"
        );
        assert_eq!(
            ts.plus_seconds(-7200).format_iso(),
            "2022-12-31T22:00:00.000Z"
        );
    }

    #[test]
    fn ordering_is_lexicographic_on_fields() {
        let a = Timestamp::parse_iso("2023-01-01T00:00:00Z").unwrap();
        let b = Timestamp::parse_iso("2023-01-01T00:00:01Z").unwrap();
        let c = Timestamp::parse_iso("2024-01-01T00:00:00Z").unwrap();
        assert!(a < b && b < c);
        assert!(a >= MIN_TIME && c < MAX_TIME);
    }

    #[test]
    fn clock_back_dates_pre_set_ticks() {
        let mut clock = Clock::new();
        assert!(!clock.is_valid());

        // Event at tick 0, clock set two hours later.
        assert!(clock.set("2023-01-01T00:00:00.000Z", 7_200_000));
        assert!(clock.is_valid());

        let backdated = clock.at_tick(0, 7_200_000);
        assert_eq!(backdated.format_iso(), "2022-12-31T22:00:00.000Z");

        let now = clock.now(7_200_000);
        assert_eq!(now.format_iso(), "2023-01-01T00:00:00.000Z");
    }

    #[test]
    fn clock_rejects_garbage_and_stays_invalid() {
        let mut clock = Clock::new();
        assert!(!clock.set("once upon a time", 1000));
        assert!(!clock.is_valid());
    }

    #[test]
    fn event_time_survives_wall_round_trip_only() {
        let wall = EventTime::Wall(Timestamp::parse_iso("2023-05-01T10:00:00Z").unwrap());
        let json = serde_json::to_string(&wall).unwrap();
        assert_eq!(serde_json::from_str::<EventTime>(&json).unwrap(), wall);

        let tick = EventTime::Tick(123_456);
        let json = serde_json::to_string(&tick).unwrap();
        assert_eq!(
            serde_json::from_str::<EventTime>(&json).unwrap(),
            EventTime::Unset
        );

        let json = serde_json::to_string(&EventTime::Unset).unwrap();
        assert_eq!(
            serde_json::from_str::<EventTime>(&json).unwrap(),
            EventTime::Unset
        );
    }
}
