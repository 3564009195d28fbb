//! Property tests for the core invariants:
//! - Running transactions always trace back to one StartTransaction call
//!   carrying the server-assigned id, unless silent held throughout
//! - Completed transactions confirm exactly one StopTransaction whose
//!   meter and timestamp never run backwards
//! - Timestamp arithmetic: round trips, inverse add/sub, ordering
//! - Clock back-dating of pre-set events
//! - Transaction ring: eviction vs StoreFull, reboot equivalence
//! - Connector reporting: distinct consecutive states, debounce spacing

use proptest::prelude::*;

use ocpp_chargepoint::config::ConfigValue;
use ocpp_chargepoint::connector::{Connector, InputSnapshot, TxSnapshot};
use ocpp_chargepoint::time::{Clock, EventTime, Timestamp};
use ocpp_chargepoint::tx::{Transaction, TransactionStore, MAX_TRANSACTIONS};
use ocpp_chargepoint::{
    ChargerCredentials, CoreError, Engine, EngineConfig, LoopbackConnection, MemFilesystem,
};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

// ============================================================================
// Strategies
// ============================================================================

fn epoch() -> Timestamp {
    Timestamp::parse_iso("1970-01-01T00:00:00Z").unwrap()
}

/// Timestamps across the whole admitted range (1970 .. ~2033).
fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0i64..2_000_000_000).prop_map(|secs| epoch().plus_seconds(secs))
}

/// Timestamps far enough from both range ends for ±3 years of slack.
fn mid_range_timestamp() -> impl Strategy<Value = Timestamp> {
    (200_000_000i64..1_700_000_000).prop_map(|secs| epoch().plus_seconds(secs))
}

/// Lifecycle stage of a stored transaction record.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Preparing,
    StartRequested,
    Running,
    StopRequested,
    Completed,
    Aborted,
}

fn stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::Preparing),
        Just(Stage::StartRequested),
        Just(Stage::Running),
        Just(Stage::StopRequested),
        Just(Stage::Completed),
        Just(Stage::Aborted),
    ]
}

fn apply_stage(store: &mut TransactionStore, connector_id: u32, stage: Stage) -> u32 {
    let wall = Timestamp::parse_iso("2023-05-01T12:00:00Z").unwrap();
    let tx = store.allocate(connector_id).unwrap();
    let tx_nr = tx.tx_nr;
    tx.set_id_tag("propTag");
    tx.session.ts = EventTime::Wall(wall);
    match stage {
        Stage::Preparing => {}
        Stage::StartRequested | Stage::Running | Stage::StopRequested | Stage::Completed => {
            tx.start.rpc.requested = true;
            tx.start.ts = EventTime::Wall(wall);
            tx.start.meter = 0;
            if !matches!(stage, Stage::StartRequested) {
                tx.start.rpc.confirmed = true;
                tx.start.transaction_id = 1;
            }
            if matches!(stage, Stage::StopRequested | Stage::Completed) {
                tx.end_session();
                tx.stop.rpc.requested = true;
                tx.stop.ts = EventTime::Wall(wall.plus_seconds(5));
                tx.stop.meter = 10;
            }
            if matches!(stage, Stage::Completed) {
                tx.stop.rpc.confirmed = true;
            }
        }
        Stage::Aborted => tx.end_session(),
    }
    store.commit(connector_id, tx_nr).unwrap();
    tx_nr
}

/// The set of unconfirmed boundary RPCs in a store.
fn unconfirmed(store: &TransactionStore, connector_id: u32) -> Vec<(u32, &'static str)> {
    let mut out = Vec::new();
    for tx in store.iter(connector_id) {
        if tx.start.rpc.requested && !tx.start.rpc.confirmed {
            out.push((tx.tx_nr, "start"));
        }
        if tx.stop.rpc.requested && !tx.stop.rpc.confirmed {
            out.push((tx.tx_nr, "stop"));
        }
    }
    out
}

/// One charging session in a generated lifecycle.
#[derive(Debug, Clone)]
struct SessionPlan {
    /// Skip the Authorize round-trip (host vouches for the tag).
    pre_authorized: bool,
    /// Withdraw the session before StartTransaction was requested.
    abort: bool,
    /// Energy delivered while the session runs.
    meter_delta: i32,
    /// Session duration before `end` is called.
    run_ms: u64,
}

fn session_plan() -> impl Strategy<Value = SessionPlan> {
    (
        any::<bool>(),
        prop::bool::weighted(0.25),
        0..5_000i32,
        0..7_200_000u64,
    )
        .prop_map(|(pre_authorized, abort, meter_delta, run_ms)| SessionPlan {
            pre_authorized,
            abort,
            meter_delta,
            run_ms,
        })
}

/// At most 6 sessions plus one lost pre-boot record keeps the ring under
/// its 8 slots, so nothing is evicted and the whole history stays
/// inspectable.
fn lifecycle_plans() -> impl Strategy<Value = Vec<SessionPlan>> {
    prop::collection::vec(session_plan(), 1..=6)
}

fn loopback_engine(fs: MemFilesystem, mtime: Rc<Cell<u64>>, conn: LoopbackConnection) -> Engine {
    let tick = mtime.clone();
    Engine::new(
        Box::new(conn),
        ChargerCredentials::new("test-runner1234"),
        EngineConfig::new()
            .with_connectors(2)
            .with_filesystem(Rc::new(fs))
            .with_tick_source(move || tick.get()),
    )
}

fn run_ticks(engine: &mut Engine, mtime: &Rc<Cell<u64>>, ticks: u32) {
    for _ in 0..ticks {
        mtime.set(mtime.get() + 10);
        engine.tick();
    }
}

type StartCall = (String, i64, Timestamp);
type StopCall = (i64, i64, Timestamp);

/// Drive a generated sequence of sessions through a loopback engine and
/// collect the boundary calls that went over the wire, the surviving
/// records, and the idTags whose transactions reached Running.
///
/// With `include_lost`, a pre-boot session is opened offline first and the
/// engine is power-cycled before its tick-anchored start timestamp could be
/// re-anchored: that transaction reached Running and must settle silently.
fn run_lifecycles(
    plans: &[SessionPlan],
    include_lost: bool,
    set_clock: bool,
) -> (Vec<StartCall>, Vec<StopCall>, Vec<Transaction>, Vec<String>) {
    let fs = MemFilesystem::new();
    let mtime = Rc::new(Cell::new(0u64));
    let meter = Rc::new(Cell::new(0i32));
    let mut running_tags = Vec::new();

    if include_lost {
        let conn = LoopbackConnection::new();
        conn.set_connected(false);
        let mut engine = loopback_engine(fs.clone(), mtime.clone(), conn);
        engine
            .configuration_mut()
            .set("AO_PreBootTransactions", ConfigValue::Bool(true));
        run_ticks(&mut engine, &mtime, 5);
        engine.begin_transaction_authorized(1, "lostTag").unwrap();
        run_ticks(&mut engine, &mtime, 5);
        assert!(engine.is_transaction_running(1));
        running_tags.push("lostTag".to_string());
        // Power cycle: the engine is dropped with the boundary unreported.
    }

    let mut engine = loopback_engine(fs, mtime.clone(), LoopbackConnection::new());

    let starts: Rc<RefCell<Vec<StartCall>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = starts.clone();
    engine.set_on_request("StartTransaction", move |payload| {
        if let Some(ts) = payload["timestamp"].as_str().and_then(Timestamp::parse_iso) {
            sink.borrow_mut().push((
                payload["idTag"].as_str().unwrap_or("").to_string(),
                payload["meterStart"].as_i64().unwrap_or(-1),
                ts,
            ));
        }
    });
    let stops: Rc<RefCell<Vec<StopCall>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = stops.clone();
    engine.set_on_request("StopTransaction", move |payload| {
        if let Some(ts) = payload["timestamp"].as_str().and_then(Timestamp::parse_iso) {
            sink.borrow_mut().push((
                payload["transactionId"].as_i64().unwrap_or(-1),
                payload["meterStop"].as_i64().unwrap_or(-1),
                ts,
            ));
        }
    });

    let m = meter.clone();
    engine.set_meter_input(1, move || m.get());
    if set_clock {
        assert!(engine.set_clock("2023-01-01T00:00:00.000Z"));
    }
    run_ticks(&mut engine, &mtime, 12);

    for (i, plan) in plans.iter().enumerate() {
        let tag = format!("tag{}", i);
        if plan.pre_authorized {
            engine.begin_transaction_authorized(1, &tag).unwrap();
        } else {
            engine.begin_transaction(1, &tag).unwrap();
        }
        if plan.abort {
            assert!(engine.abort_transaction(1));
            run_ticks(&mut engine, &mtime, 10);
            continue;
        }
        run_ticks(&mut engine, &mtime, 20);
        running_tags.push(tag);

        meter.set(meter.get() + plan.meter_delta);
        mtime.set(mtime.get() + plan.run_ms);
        engine.end_transaction(1, None);
        run_ticks(&mut engine, &mtime, 20);
    }

    let records: Vec<Transaction> = engine.transaction_history(1).cloned().collect();
    let starts_out = starts.borrow().clone();
    let stops_out = stops.borrow().clone();
    (starts_out, stops_out, records, running_tags)
}

// ============================================================================
// Transaction lifecycle properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every transaction that reached Running either put exactly one
    /// StartTransaction on the wire and holds the server-assigned id its
    /// StopTransaction later carried, or was silent throughout with all
    /// four boundary flags down.
    #[test]
    fn running_transactions_trace_to_one_start_call(
        plans in lifecycle_plans(),
        include_lost in any::<bool>(),
        set_clock in any::<bool>(),
    ) {
        let (starts, stops, records, running_tags) =
            run_lifecycles(&plans, include_lost, set_clock);

        for tag in &running_tags {
            let tx = records.iter().find(|t| &t.session.id_tag == tag);
            prop_assert!(tx.is_some(), "record for {} vanished", tag);
            let tx = tx.unwrap();
            let sent: Vec<&StartCall> =
                starts.iter().filter(|(t, _, _)| t == tag).collect();

            if tx.silent {
                prop_assert!(sent.is_empty(), "silent tx {} reached the wire", tag);
                prop_assert!(!tx.start.rpc.requested && !tx.start.rpc.confirmed);
                prop_assert!(!tx.stop.rpc.requested && !tx.stop.rpc.confirmed);
            } else {
                prop_assert_eq!(sent.len(), 1, "{} start calls for {}", sent.len(), tag);
                prop_assert!(tx.start.rpc.confirmed);
                prop_assert!(tx.start.transaction_id >= 1);
                // The id the server returned is the one the stop carried.
                let with_id: Vec<&StopCall> = stops
                    .iter()
                    .filter(|(id, _, _)| *id == i64::from(tx.start.transaction_id))
                    .collect();
                prop_assert_eq!(with_id.len(), 1);
            }
        }

        // Transactions that never reached Running never reached the wire.
        for tx in &records {
            if !running_tags.contains(&tx.session.id_tag) {
                prop_assert!(starts.iter().all(|(t, _, _)| t != &tx.session.id_tag));
            }
        }
    }

    /// Every Completed transaction confirmed exactly one StopTransaction,
    /// and neither its meter reading nor its timestamp runs backwards.
    #[test]
    fn completed_transactions_confirm_one_stop_call(
        plans in lifecycle_plans(),
        include_lost in any::<bool>(),
        set_clock in any::<bool>(),
    ) {
        let (starts, stops, records, _) = run_lifecycles(&plans, include_lost, set_clock);

        for tx in records.iter().filter(|t| t.is_completed() && !t.silent) {
            prop_assert!(tx.start.transaction_id >= 1);
            prop_assert!(tx.stop.rpc.confirmed);
            let with_id: Vec<&StopCall> = stops
                .iter()
                .filter(|(id, _, _)| *id == i64::from(tx.start.transaction_id))
                .collect();
            prop_assert_eq!(with_id.len(), 1, "tx {} stop calls", tx.tx_nr);

            prop_assert!(tx.meter_start_defined() && tx.meter_stop_defined());
            prop_assert!(
                tx.stop.meter >= tx.start.meter,
                "meter ran backwards: {} -> {}",
                tx.start.meter,
                tx.stop.meter
            );

            prop_assert!(tx.start.ts.wall().is_some() && tx.stop.ts.wall().is_some());
            let start_ts = tx.start.ts.wall().unwrap();
            let stop_ts = tx.stop.ts.wall().unwrap();
            prop_assert!(stop_ts >= start_ts, "stop {} before start {}", stop_ts, start_ts);

            // The wire payloads agree with the record.
            let (_, meter_stop, sent_ts) = with_id[0];
            prop_assert_eq!(*meter_stop, i64::from(tx.stop.meter));
            prop_assert!(*sent_ts >= start_ts);
            let start_call = starts
                .iter()
                .find(|(tag, _, _)| tag == &tx.session.id_tag);
            prop_assert!(start_call.is_some());
            prop_assert_eq!(start_call.unwrap().1, i64::from(tx.start.meter));
        }
    }
}

// ============================================================================
// Timestamp and clock properties
// ============================================================================

proptest! {
    #[test]
    fn format_parse_round_trip(ts in timestamp()) {
        let rendered = ts.format_iso();
        prop_assert_eq!(rendered.len(), 24);
        let back = Timestamp::parse_iso(&rendered).unwrap();
        prop_assert_eq!(back, ts);
    }

    #[test]
    fn addition_and_subtraction_are_inverse(
        ts in mid_range_timestamp(),
        secs in -100_000_000i64..100_000_000,
    ) {
        let shifted = ts.plus_seconds(secs);
        prop_assert_eq!(shifted.seconds_since(&ts) as i64, secs);
        // And shifting back lands on the original.
        prop_assert_eq!(shifted.plus_seconds(-secs), ts);
    }

    #[test]
    fn ordering_agrees_with_difference(a in timestamp(), b in timestamp()) {
        let diff = a.seconds_since(&b);
        if diff > 0 {
            prop_assert!(a > b);
        } else if diff < 0 {
            prop_assert!(a < b);
        }
        // diff == 0 can still mean a != b within the same second; the
        // broken-down form has no sub-second resolution, so no claim there.
    }

    /// An event Δ before the clock set is emitted as `set_ts − Δ` (± 1 s of
    /// truncation).
    #[test]
    fn backdating_is_exact_to_a_second(
        set_tick in 10_000u64..1_000_000_000,
        delta_ms in 0u64..500_000_000,
    ) {
        prop_assume!(delta_ms <= set_tick);
        let base = Timestamp::parse_iso("2023-01-01T00:00:00Z").unwrap();
        let mut clock = Clock::new();
        prop_assert!(clock.set("2023-01-01T00:00:00.000Z", set_tick));

        let emitted = clock.at_tick(set_tick - delta_ms, set_tick);
        let expected = base.plus_seconds(-((delta_ms / 1000) as i64));
        let error = emitted.seconds_since(&expected);
        prop_assert!(error.abs() <= 1, "error {} s", error);
    }
}

// ============================================================================
// Transaction ring properties
// ============================================================================

proptest! {
    /// Allocation from a full ring either evicts a settled oldest record or
    /// fails with StoreFull; never both, never anything else.
    #[test]
    fn full_ring_evicts_xor_rejects(stages in prop::collection::vec(stage(), MAX_TRANSACTIONS)) {
        let mut store = TransactionStore::new(2, None);
        for s in &stages {
            apply_stage(&mut store, 1, *s);
        }

        let oldest_settled = store
            .iter(1)
            .next()
            .map(|tx| tx.is_settled())
            .unwrap();
        let count_before = store.iter(1).count();

        match store.allocate(1) {
            Ok(tx) => {
                prop_assert!(oldest_settled);
                prop_assert_eq!(tx.tx_nr, MAX_TRANSACTIONS as u32 + 1);
                prop_assert_eq!(store.iter(1).count(), count_before);
            }
            Err(CoreError::StoreFull) => {
                prop_assert!(!oldest_settled);
                prop_assert_eq!(store.iter(1).count(), count_before);
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    /// After a reboot with an intact store, the set of unconfirmed boundary
    /// RPCs is exactly the set present before.
    #[test]
    fn reboot_preserves_unconfirmed_boundaries(
        stages in prop::collection::vec(stage(), 1..=MAX_TRANSACTIONS)
    ) {
        let fs = MemFilesystem::new();
        let before = {
            let mut store = TransactionStore::new(2, Some(Rc::new(fs.clone())));
            for s in &stages {
                apply_stage(&mut store, 1, *s);
            }
            unconfirmed(&store, 1)
        };

        let mut reloaded = TransactionStore::new(2, Some(Rc::new(fs)));
        reloaded.load_all();
        prop_assert_eq!(unconfirmed(&reloaded, 1), before);
    }
}

// ============================================================================
// Connector reporting properties
// ============================================================================

proptest! {
    /// Reported statuses never repeat back to back, and two reports are at
    /// least MinimumStatusDuration apart.
    #[test]
    fn reports_are_distinct_and_debounced(
        steps in prop::collection::vec(
            (prop::option::of(any::<bool>()), any::<bool>(), any::<bool>(), any::<bool>()),
            1..60,
        ),
        min_duration_s in 0i32..3,
    ) {
        let mut connector = Connector::new(1);
        let mut reports: Vec<(u64, _)> = Vec::new();
        let mut now = 0u64;

        for (plugged, running, session_active, faulted) in steps {
            now += 100;
            let inputs = InputSnapshot { plugged, ready: None, faulted };
            let tx = TxSnapshot { running, session_active };
            if let Some(status) = connector.update(&inputs, &tx, now, min_duration_s) {
                reports.push((now, status));
            }
        }

        for pair in reports.windows(2) {
            prop_assert_ne!(pair[0].1, pair[1].1, "repeated report");
            prop_assert!(
                pair[1].0 - pair[0].0 >= (min_duration_s as u64) * 1000,
                "reports {} ms apart with {} s debounce",
                pair[1].0 - pair[0].0,
                min_duration_s
            );
        }
    }
}
