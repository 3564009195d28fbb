//! Per-connector status state machine.
//!
//! Derives the externally visible ChargePointStatus from the hardware
//! inputs, availability and the transaction phase, debounces reporting by
//! `MinimumStatusDuration`, and tracks the shadow `reported` state so every
//! stable status is reported exactly once.

use tracing::debug;

use crate::ocpp::types::{AvailabilityType, ChargePointStatus};

/// Hardware inputs of one connector, captured once per tick. `None` means
/// the host configured no such sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSnapshot {
    pub plugged: Option<bool>,
    pub ready: Option<bool>,
    pub faulted: bool,
}

impl InputSnapshot {
    /// Plug presence with the no-sensor default: a missing plug sensor
    /// never blocks charging.
    pub fn plugged_or_default(&self) -> bool {
        self.plugged.unwrap_or(true)
    }

    fn ready_or_default(&self) -> bool {
        self.ready.unwrap_or(true)
    }
}

/// Transaction phase of the connector as the state machine sees it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxSnapshot {
    pub running: bool,
    pub session_active: bool,
}

/// One connector (id 0 is the charge point itself; it never carries
/// transactions but reports status like any other).
#[derive(Debug)]
pub struct Connector {
    pub id: u32,
    pub availability: AvailabilityType,
    /// Availability change deferred until the running transaction ends.
    pub scheduled_availability: Option<AvailabilityType>,
    pub reserved: bool,
    /// Session-ended-while-plugged grace: holds Finishing until unplug.
    pub finishing: bool,
    /// Tick of the last periodic meter sample.
    pub last_meter_sample: u64,

    state: ChargePointStatus,
    state_since: u64,
    reported: Option<ChargePointStatus>,
    last_report_at: u64,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            availability: AvailabilityType::Operative,
            scheduled_availability: None,
            reserved: false,
            finishing: false,
            last_meter_sample: 0,
            state: ChargePointStatus::Available,
            state_since: 0,
            reported: None,
            last_report_at: 0,
        }
    }

    pub fn status(&self) -> ChargePointStatus {
        self.state
    }

    pub fn reported(&self) -> Option<ChargePointStatus> {
        self.reported
    }

    pub fn is_operative(&self) -> bool {
        self.availability == AvailabilityType::Operative && self.state != ChargePointStatus::Faulted
    }

    /// The transition table. Priority top to bottom, first match wins.
    fn evaluate(&self, inputs: &InputSnapshot, tx: &TxSnapshot) -> ChargePointStatus {
        if inputs.faulted {
            return ChargePointStatus::Faulted;
        }
        if self.availability == AvailabilityType::Inoperative && !tx.running {
            return ChargePointStatus::Unavailable;
        }
        if self.reserved && !tx.running {
            return ChargePointStatus::Reserved;
        }
        if tx.running {
            if !inputs.ready_or_default() {
                return ChargePointStatus::SuspendedEvse;
            }
            if !inputs.plugged_or_default() {
                return ChargePointStatus::SuspendedEv;
            }
            return ChargePointStatus::Charging;
        }
        if tx.session_active || (inputs.plugged == Some(true) && !self.finishing) {
            return ChargePointStatus::Preparing;
        }
        if self.finishing && inputs.plugged == Some(true) {
            return ChargePointStatus::Finishing;
        }
        ChargePointStatus::Available
    }

    /// Advance the state machine one tick. Returns a status to report, if
    /// one is due.
    pub fn update(
        &mut self,
        inputs: &InputSnapshot,
        tx: &TxSnapshot,
        now: u64,
        min_status_duration_s: i32,
    ) -> Option<ChargePointStatus> {
        // The ending-session grace ends when the cable leaves.
        if inputs.plugged == Some(false) {
            self.finishing = false;
        }

        let target = self.evaluate(inputs, tx);
        if target != self.state {
            debug!("connector {}: {:?} -> {:?}", self.id, self.state, target);
            self.state = target;
            self.state_since = now;
        }

        if self.reported == Some(self.state) {
            return None;
        }
        let min_ms = (min_status_duration_s.max(0) as u64) * 1000;
        if now.saturating_sub(self.state_since) < min_ms && self.reported.is_some() {
            // Debouncing; a further change may supersede this state.
            return None;
        }
        if self.reported.is_some() && now.saturating_sub(self.last_report_at) < min_ms {
            return None;
        }

        self.reported = Some(self.state);
        self.last_report_at = now;
        Some(self.state)
    }
}
