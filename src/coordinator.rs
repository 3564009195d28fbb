//! Transaction coordinator.
//!
//! Orchestrates Authorize → StartTransaction → StopTransaction against the
//! store and the connector state machines. There is no call-stack
//! continuation anywhere in here: a boundary whose reply is outstanding is
//! exactly a record with `requested && !confirmed`, which is why the whole
//! flow survives reboots. Records are addressed by `(connector_id, tx_nr)`
//! and re-borrowed per step.

use tracing::{debug, info, warn};

use crate::connector::TxSnapshot;
use crate::engine::Model;
use crate::error::CoreError;
use crate::ocpp::engine::SendProfile;
use crate::ocpp::types::ResetType;
use crate::ops::{
    Authorize, BootNotification, Heartbeat, MeterValues, StartTransaction, StatusNotification,
    StopTransaction,
};
use crate::time::EventTime;

impl Model {
    /// Open a charging session on a connector.
    pub(crate) fn begin_session(
        &mut self,
        connector_id: u32,
        id_tag: &str,
        pre_authorized: bool,
    ) -> Result<(), CoreError> {
        if !self.tx_connector_valid(connector_id) {
            return Err(CoreError::UnknownConnector(connector_id));
        }
        if self
            .store
            .head(connector_id)
            .map(|tx| tx.is_preparing() || tx.is_running())
            .unwrap_or(false)
        {
            return Err(CoreError::Busy);
        }

        let online = self.connected && self.boot.accepted;
        let cache_allowed = if online {
            self.config.bool("LocalPreAuthorize")
        } else {
            self.config.bool("LocalAuthorizeOffline")
        };
        let authorized =
            pre_authorized || (cache_allowed && self.auth_cache.lookup(id_tag) == Some(true));

        let now = self.now;
        let session_ts = if self.clock.is_valid() {
            EventTime::Wall(self.clock.now(now))
        } else {
            EventTime::Tick(now)
        };

        let tx = self.store.allocate(connector_id)?;
        tx.set_id_tag(id_tag);
        tx.session.ts = session_ts;
        tx.session.authorized = authorized;
        tx.session_tick = Some(now);
        let tx_nr = tx.tx_nr;

        if let Some(connector) = self.connectors.get_mut(connector_id as usize) {
            connector.finishing = false;
        }
        self.commit_tx(connector_id, tx_nr);
        info!(
            "connector {}: session opened for {:?} (tx {}, authorized={})",
            connector_id, id_tag, tx_nr, authorized
        );

        if !authorized {
            self.send(
                Box::new(Authorize::new(connector_id, tx_nr)),
                SendProfile::Plain,
            );
        }
        Ok(())
    }

    /// Close the session on a connector; the stop boundary follows on the
    /// next tick. Returns whether there was a session to close.
    pub(crate) fn end_session(
        &mut self,
        connector_id: u32,
        reason: &str,
        carry_id_tag: bool,
    ) -> bool {
        let plugged = self.input_snapshot(connector_id).plugged == Some(true);
        let Some(tx) = self.store.head_mut(connector_id) else {
            return false;
        };
        if !tx.is_active() {
            return false;
        }
        tx.set_stop_reason(reason);
        if carry_id_tag {
            let tag = tx.session.id_tag.clone();
            tx.set_stop_id_tag(&tag);
        }
        let was_running = tx.start.rpc.requested;
        tx.end_session();
        let tx_nr = tx.tx_nr;

        if was_running && plugged {
            if let Some(connector) = self.connectors.get_mut(connector_id as usize) {
                connector.finishing = true;
            }
        }
        self.commit_tx(connector_id, tx_nr);
        info!(
            "connector {}: session ended ({})",
            connector_id,
            if reason.is_empty() { "-" } else { reason }
        );
        true
    }

    /// Abort: a session that never requested StartTransaction disappears
    /// without any RPC; a running one ends normally.
    pub(crate) fn abort_session(&mut self, connector_id: u32) -> bool {
        let Some(tx) = self.store.head_mut(connector_id) else {
            return false;
        };
        if tx.is_preparing() {
            tx.end_session();
            let tx_nr = tx.tx_nr;
            self.commit_tx(connector_id, tx_nr);
            debug!("connector {}: session aborted", connector_id);
            true
        } else {
            self.end_session(connector_id, "Other", false)
        }
    }

    /// End the running transaction carrying this server-assigned id.
    pub(crate) fn remote_stop(&mut self, transaction_id: i32) -> bool {
        for connector_id in 1..self.connectors.len() as u32 {
            let matches = self
                .store
                .head(connector_id)
                .map(|tx| {
                    tx.is_running() && tx.server_transaction_id() == Some(transaction_id)
                })
                .unwrap_or(false);
            if matches {
                return self.end_session(connector_id, "Remote", false);
            }
        }
        false
    }

    pub(crate) fn commit_tx(&mut self, connector_id: u32, tx_nr: u32) {
        if let Err(e) = self.store.commit(connector_id, tx_nr) {
            warn!("connector {}: commit of tx {} failed: {}", connector_id, tx_nr, e);
        }
    }

    // --- per-tick work ------------------------------------------------------

    pub(crate) fn tick_transactions(&mut self, now: u64) {
        self.tick_boot(now);
        if self.clock.is_valid() {
            self.rewrite_tick_anchors(now);
        }
        for connector_id in 0..self.connectors.len() as u32 {
            self.tick_connector(connector_id, now);
        }
        self.tick_heartbeat(now);
        self.tick_reset();
    }

    fn tick_boot(&mut self, now: u64) {
        if self.connected && !self.boot.accepted && !self.boot.queued && now >= self.boot.retry_at
        {
            self.boot.queued = true;
            self.send(Box::new(BootNotification::new()), SendProfile::Boot);
        }
    }

    /// First clock-valid moment: turn tick anchors of this boot into wall
    /// timestamps, back-dating events that predate the clock set.
    fn rewrite_tick_anchors(&mut self, now: u64) {
        for connector_id in 1..self.connectors.len() as u32 {
            let tx_nrs: Vec<u32> = self.store.iter(connector_id).map(|tx| tx.tx_nr).collect();
            for tx_nr in tx_nrs {
                let clock = self.clock.clone();
                let Some(tx) = self.store.get_mut(connector_id, tx_nr) else {
                    continue;
                };
                let mut changed = false;
                for ts in [&mut tx.session.ts, &mut tx.start.ts, &mut tx.stop.ts] {
                    if let EventTime::Tick(tick) = *ts {
                        *ts = EventTime::Wall(clock.at_tick(tick, now));
                        changed = true;
                    }
                }
                // A stop may never predate its start; the minimum positive
                // delta is one second.
                if let (Some(start), Some(stop)) = (tx.start.ts.wall(), tx.stop.ts.wall()) {
                    if tx.stop.rpc.requested && stop.seconds_since(&start) < 1 {
                        tx.stop.ts = EventTime::Wall(start.plus_seconds(1));
                        changed = true;
                    }
                }
                if changed {
                    debug!(
                        "connector {}: tx {} re-anchored to wall time",
                        connector_id, tx_nr
                    );
                    self.commit_tx(connector_id, tx_nr);
                }
            }
        }
    }

    fn tick_connector(&mut self, connector_id: u32, now: u64) {
        let snapshot = self.input_snapshot(connector_id);

        if connector_id >= 1 {
            self.supervise_session(connector_id, now, &snapshot);
            self.drive_boundaries(connector_id, now, &snapshot);
            self.apply_scheduled_availability(connector_id);
            self.sample_meter(connector_id, now);
        }

        // Connector state machine and status reporting.
        let tx_state = if connector_id >= 1 {
            self.store
                .head(connector_id)
                .map(|tx| TxSnapshot {
                    running: tx.is_running(),
                    session_active: tx.is_active(),
                })
                .unwrap_or_default()
        } else {
            TxSnapshot::default()
        };
        let min_status = self.config.int("MinimumStatusDuration");
        let report = self
            .connectors
            .get_mut(connector_id as usize)
            .and_then(|c| c.update(&snapshot, &tx_state, now, min_status));
        if let Some(status) = report {
            self.send(
                Box::new(StatusNotification::new(connector_id, status)),
                SendProfile::Status { connector_id },
            );
        }
    }

    /// Session-level supervision: deauthorization, ConnectionTimeOut, lost
    /// pre-boot timestamps.
    fn supervise_session(
        &mut self,
        connector_id: u32,
        now: u64,
        snapshot: &crate::connector::InputSnapshot,
    ) {
        let timeout_ms = (self.config.int("ConnectionTimeOut").max(0) as u64) * 1000;
        let stop_on_invalid = self.config.bool("StopTransactionOnInvalidId");
        let Some(tx) = self.store.head_mut(connector_id) else {
            return;
        };
        let tx_nr = tx.tx_nr;

        if tx.session_tick.is_none() {
            tx.session_tick = Some(now);
        }

        // The server revoked the tag before the transaction started.
        if tx.is_preparing() && tx.session.deauthorized {
            info!("connector {}: tag deauthorized, aborting session", connector_id);
            tx.end_session();
            self.commit_tx(connector_id, tx_nr);
            return;
        }

        // Revoked while running.
        let deauthorized_running =
            tx.is_running() && tx.session.deauthorized && tx.is_active() && stop_on_invalid;
        if deauthorized_running {
            self.end_session(connector_id, "DeAuthorized", false);
            return;
        }
        let Some(tx) = self.store.head_mut(connector_id) else {
            return;
        };

        // Nobody plugged in within ConnectionTimeOut: silently abort.
        if tx.is_preparing()
            && tx.is_active()
            && snapshot.plugged == Some(false)
            && timeout_ms > 0
            && now.saturating_sub(tx.session_tick.unwrap_or(now)) >= timeout_ms
        {
            info!(
                "connector {}: no plug within ConnectionTimeOut, aborting",
                connector_id
            );
            tx.end_session();
            self.commit_tx(connector_id, tx_nr);
            return;
        }

        // A start boundary whose timestamp did not survive the reboot can
        // never be reported; the transaction is dropped wholesale.
        if tx.start.rpc.requested && !tx.start.rpc.confirmed && !tx.start.ts.is_set() {
            warn!(
                "connector {}: tx {} lost its start timestamp, dropping",
                connector_id, tx_nr
            );
            tx.start.rpc.requested = false;
            tx.stop.rpc.requested = false;
            tx.silent = true;
            tx.end_session();
            self.commit_tx(connector_id, tx_nr);
        }
    }

    /// Request and enqueue the boundary RPCs of the head transaction.
    fn drive_boundaries(
        &mut self,
        connector_id: u32,
        now: u64,
        snapshot: &crate::connector::InputSnapshot,
    ) {
        let preboot = self.config.bool("AO_PreBootTransactions");
        let boot_accepted = self.boot.accepted;
        let clock = self.clock.clone();
        let meter = self.meter_reading(connector_id);

        // Start boundary becomes due.
        let start_request = {
            let Some(tx) = self.store.head(connector_id) else {
                return;
            };
            tx.is_preparing()
                && tx.is_active()
                && tx.session.authorized
                && !tx.session.deauthorized
                && snapshot.plugged_or_default()
                && (boot_accepted || preboot)
        };
        if start_request {
            let ts = if clock.is_valid() {
                EventTime::Wall(clock.now(now))
            } else {
                EventTime::Tick(now)
            };
            let tx = self.store.head_mut(connector_id).expect("head checked");
            let tx_nr = tx.tx_nr;
            tx.start.ts = ts;
            tx.start.meter = meter.unwrap_or(0);
            tx.start.rpc.requested = true;
            match self.store.commit(connector_id, tx_nr) {
                Ok(()) => info!("connector {}: StartTransaction requested", connector_id),
                Err(e) => {
                    // Never mark a boundary requested without durability.
                    warn!(
                        "connector {}: start commit failed ({}), aborting session",
                        connector_id, e
                    );
                    let tx = self.store.head_mut(connector_id).expect("head checked");
                    tx.start.rpc.requested = false;
                    tx.start.ts = EventTime::Unset;
                    tx.set_stop_reason("Other");
                    tx.end_session();
                    self.commit_tx(connector_id, tx_nr);
                    return;
                }
            }
        }

        // Stop boundary becomes due once the session is withdrawn.
        let stop_request = self
            .store
            .head(connector_id)
            .map(|tx| tx.start.rpc.requested && !tx.is_active() && !tx.stop.rpc.requested)
            .unwrap_or(false);
        if stop_request {
            let tx = self.store.head_mut(connector_id).expect("head checked");
            let tx_nr = tx.tx_nr;
            let ts = if clock.is_valid() {
                let mut wall = clock.now(now);
                if let Some(start) = tx.start.ts.wall() {
                    if wall.seconds_since(&start) < 1 {
                        wall = start.plus_seconds(1);
                    }
                }
                EventTime::Wall(wall)
            } else {
                EventTime::Tick(now)
            };
            tx.stop.ts = ts;
            tx.stop.meter = meter.unwrap_or(0);
            tx.stop.rpc.requested = true;
            match self.store.commit(connector_id, tx_nr) {
                Ok(()) => info!("connector {}: StopTransaction requested", connector_id),
                Err(e) => {
                    warn!(
                        "connector {}: stop commit failed ({}), retrying next tick",
                        connector_id, e
                    );
                    let tx = self.store.head_mut(connector_id).expect("head checked");
                    tx.stop.rpc.requested = false;
                    tx.stop.ts = EventTime::Unset;
                    return;
                }
            }
        }

        // A stop timestamp lost across a reboot falls back to the smallest
        // positive delta after the recorded start.
        let Some(tx) = self.store.head_mut(connector_id) else {
            return;
        };
        let tx_nr = tx.tx_nr;
        if tx.stop.rpc.requested && !tx.stop.rpc.confirmed && !tx.stop.ts.is_set() {
            if let Some(start) = tx.start.ts.wall() {
                tx.stop.ts = EventTime::Wall(start.plus_seconds(1));
                self.commit_tx(connector_id, tx_nr);
            }
        }

        // Hand due boundaries to the outbox, start strictly before stop.
        let Some(tx) = self.store.head_mut(connector_id) else {
            return;
        };
        if !tx.silent {
            if tx.start.rpc.requested
                && !tx.start.rpc.confirmed
                && !tx.start_enqueued
                && tx.start.ts.wall().is_some()
            {
                tx.start_enqueued = true;
                let tx_nr = tx.tx_nr;
                self.send(
                    Box::new(StartTransaction::new(connector_id, tx_nr)),
                    SendProfile::Transactional {
                        connector_id,
                        tx_nr,
                    },
                );
                return;
            }
            if tx.stop.rpc.requested
                && !tx.stop.rpc.confirmed
                && tx.start.rpc.confirmed
                && !tx.stop_enqueued
                && tx.stop.ts.wall().is_some()
            {
                tx.stop_enqueued = true;
                let tx_nr = tx.tx_nr;
                self.send(
                    Box::new(StopTransaction::new(connector_id, tx_nr)),
                    SendProfile::Transactional {
                        connector_id,
                        tx_nr,
                    },
                );
            }
        }
    }

    fn apply_scheduled_availability(&mut self, connector_id: u32) {
        let busy = self
            .store
            .head(connector_id)
            .map(|tx| tx.is_running() || tx.is_preparing())
            .unwrap_or(false);
        if busy {
            return;
        }
        let Some(connector) = self.connectors.get_mut(connector_id as usize) else {
            return;
        };
        if let Some(kind) = connector.scheduled_availability.take() {
            connector.availability = kind;
            info!("connector {}: scheduled availability applied ({:?})", connector_id, kind);
            self.persist_availability(connector_id);
        }
    }

    fn sample_meter(&mut self, connector_id: u32, now: u64) {
        let interval_ms = (self.config.int("MeterValueSampleInterval").max(0) as u64) * 1000;
        let running = self
            .store
            .head(connector_id)
            .map(|tx| tx.is_running())
            .unwrap_or(false);
        let has_meter = self
            .inputs
            .get(connector_id as usize)
            .map(|i| i.meter.is_some())
            .unwrap_or(false);

        let Some(connector) = self.connectors.get_mut(connector_id as usize) else {
            return;
        };
        if !running || !has_meter || interval_ms == 0 {
            connector.last_meter_sample = now;
            return;
        }
        if now.saturating_sub(connector.last_meter_sample) >= interval_ms {
            connector.last_meter_sample = now;
            self.send(Box::new(MeterValues::new(connector_id)), SendProfile::Plain);
        }
    }

    fn tick_heartbeat(&mut self, now: u64) {
        if !self.boot.accepted {
            return;
        }
        let interval_ms = (self.config.int("HeartbeatInterval").max(0) as u64) * 1000;
        if interval_ms > 0 && now.saturating_sub(self.heartbeat_last) >= interval_ms {
            self.heartbeat_last = now;
            self.send(Box::new(Heartbeat::new()), SendProfile::Plain);
        }
    }

    fn tick_reset(&mut self) {
        let Some(kind) = self.pending_reset else {
            return;
        };
        if !self.reset_tx_ended {
            let reason = match kind {
                ResetType::Hard => "HardReset",
                ResetType::Soft => "SoftReset",
            };
            for connector_id in 1..self.connectors.len() as u32 {
                let active = self
                    .store
                    .head(connector_id)
                    .map(|tx| tx.is_active())
                    .unwrap_or(false);
                if active {
                    self.end_session(connector_id, reason, false);
                }
            }
            self.reset_tx_ended = true;
        }

        let ready = match kind {
            ResetType::Hard => true,
            // Soft reset waits until every boundary settled.
            ResetType::Soft => (1..self.connectors.len() as u32)
                .all(|connector_id| self.store.head(connector_id).is_none()),
        };
        if ready {
            info!("executing {:?} reset", kind);
            if let Some(mut hook) = self.reset_hook.take() {
                hook(kind);
                self.reset_hook = Some(hook);
            }
            self.pending_reset = None;
            self.reset_tx_ended = false;
        }
    }
}
