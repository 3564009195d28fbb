//! Transaction records.
//!
//! A transaction is initiated by the charge point and processed by the
//! central system. The client side is everything generated at the station
//! (timestamps, meter readings, the session); the server side is what the
//! central system assigns (the transactionId). Each boundary RPC carries a
//! sync pair `{requested, confirmed}` that doubles as the persistent
//! continuation state while a reply is outstanding.

use serde::{Deserialize, Serialize};

use crate::ocpp::types::{IDTAG_LEN_MAX, REASON_LEN_MAX};
use crate::time::EventTime;

/// Schema marker written as the final field of every persisted record. A
/// document without it is treated as partially written and discarded.
pub const TX_SCHEMA_VERSION: u8 = 1;

fn truncated(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Request/confirm state of one boundary RPC.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RpcSync {
    pub requested: bool,
    pub confirmed: bool,
}

impl RpcSync {
    pub fn is_completed(&self) -> bool {
        self.requested && self.confirmed
    }
}

/// Facts about the charging session itself (before and independent of the
/// boundary RPCs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSession {
    pub id_tag: String,
    pub authorized: bool,
    pub deauthorized: bool,
    pub ts: EventTime,
    pub active: bool,
    pub tx_profile_id: i32,
}

impl Default for ChargingSession {
    fn default() -> Self {
        Self {
            id_tag: String::new(),
            authorized: false,
            deauthorized: false,
            ts: EventTime::Unset,
            active: true,
            tx_profile_id: -1,
        }
    }
}

/// Client- and server-side facts of the StartTransaction boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStart {
    pub rpc: RpcSync,
    pub ts: EventTime,
    /// meterStart; negative means undefined.
    pub meter: i32,
    pub reservation_id: i32,
    /// Server-assigned id; only meaningful once the boundary is confirmed.
    pub transaction_id: i32,
}

impl Default for TransactionStart {
    fn default() -> Self {
        Self {
            rpc: RpcSync::default(),
            ts: EventTime::Unset,
            meter: -1,
            reservation_id: -1,
            transaction_id: -1,
        }
    }
}

/// Client-side facts of the StopTransaction boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStop {
    pub rpc: RpcSync,
    pub id_tag: String,
    pub ts: EventTime,
    /// meterStop; negative means undefined.
    pub meter: i32,
    pub reason: String,
}

impl Default for TransactionStop {
    fn default() -> Self {
        Self {
            rpc: RpcSync::default(),
            id_tag: String::new(),
            ts: EventTime::Unset,
            meter: -1,
            reason: String::new(),
        }
    }
}

/// One charging episode on one connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub connector_id: u32,
    pub tx_nr: u32,
    /// Silent transactions are processed locally and never reported; all
    /// four boundary flags stay false for their whole life.
    pub silent: bool,
    pub session: ChargingSession,
    pub start: TransactionStart,
    pub stop: TransactionStop,

    /// Whether the boundary has been handed to the outbox this boot.
    #[serde(skip)]
    pub start_enqueued: bool,
    #[serde(skip)]
    pub stop_enqueued: bool,
    /// Tick at which the session opened (this boot), for the
    /// ConnectionTimeOut supervision.
    #[serde(skip)]
    pub session_tick: Option<u64>,

    /// Terminal marker, written last.
    #[serde(default)]
    pub v: u8,
}

impl Transaction {
    pub fn new(connector_id: u32, tx_nr: u32) -> Self {
        Self {
            connector_id,
            tx_nr,
            silent: false,
            session: ChargingSession::default(),
            start: TransactionStart::default(),
            stop: TransactionStop::default(),
            start_enqueued: false,
            stop_enqueued: false,
            session_tick: None,
            v: TX_SCHEMA_VERSION,
        }
    }

    // --- derived predicates -------------------------------------------------

    /// The session exists but StartTransaction has not been requested yet.
    pub fn is_preparing(&self) -> bool {
        self.session.active && !self.start.rpc.requested
    }

    /// Between StartTransaction request and StopTransaction request.
    pub fn is_running(&self) -> bool {
        self.start.rpc.requested && !self.stop.rpc.requested
    }

    /// StopTransaction has been confirmed by the central system.
    pub fn is_completed(&self) -> bool {
        self.stop.rpc.confirmed
    }

    /// Ended before ever requesting StartTransaction; emits no RPCs.
    pub fn is_aborted(&self) -> bool {
        !self.start.rpc.requested && !self.session.active
    }

    pub fn is_active(&self) -> bool {
        self.session.active
    }

    /// Whether the ring may reclaim this record's slot.
    pub fn is_settled(&self) -> bool {
        self.is_completed() || self.is_aborted()
    }

    // --- mutators -----------------------------------------------------------

    pub fn set_id_tag(&mut self, id_tag: &str) {
        self.session.id_tag = truncated(id_tag, IDTAG_LEN_MAX);
    }

    pub fn set_stop_id_tag(&mut self, id_tag: &str) {
        self.stop.id_tag = truncated(id_tag, IDTAG_LEN_MAX);
    }

    pub fn set_stop_reason(&mut self, reason: &str) {
        self.stop.reason = truncated(reason, REASON_LEN_MAX);
    }

    /// Withdraw the session. Depending on where the transaction stands this
    /// means abort (before StartTransaction) or end (while running).
    pub fn end_session(&mut self) {
        self.session.active = false;
    }

    pub fn meter_start_defined(&self) -> bool {
        self.start.meter >= 0
    }

    pub fn meter_stop_defined(&self) -> bool {
        self.stop.meter >= 0
    }

    /// The server id to use in StopTransaction; only valid once the start
    /// boundary is confirmed with an id ≥ 1.
    pub fn server_transaction_id(&self) -> Option<i32> {
        if self.start.rpc.confirmed && self.start.transaction_id >= 1 {
            Some(self.start.transaction_id)
        } else {
            None
        }
    }
}
