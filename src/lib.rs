//! # OCPP 1.6J charge point client core
//!
//! Client side of OCPP 1.6 (JSON over WebSocket) for electric-vehicle
//! charging stations. The hard part lives here: the per-connector charging
//! session state machine, durable at-least-once delivery of the
//! StartTransaction / StopTransaction boundaries across power cycles, and a
//! wall clock that may be unset at boot and is corrected retroactively.
//!
//! ## Architecture
//!
//! ```text
//! Central System
//!       │ WebSocket JSON (Connection trait, host-provided)
//!       ▼
//! ┌──────────────────────────────────────────┐
//! │ Engine — tick()-driven, single-threaded  │
//! │  ┌───────────┐  ┌─────────────────────┐  │
//! │  │ RpcEngine │◄►│ OperationRegistry   │  │
//! │  │ outbox,   │  │ action → handler    │  │
//! │  │ retries   │  └─────────────────────┘  │
//! │  └─────┬─────┘                           │
//! │        ▼                                 │
//! │  ┌────────────────────────────────────┐  │
//! │  │ Model                              │  │
//! │  │  Clock │ ConfigStore │ AuthCache   │  │
//! │  │  TransactionStore (durable ring)   │  │
//! │  │  Connector state machines          │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//!       │ FilesystemAdapter (atomic replace)
//!       ▼
//!   config.jsn, tx/<connector>-<slot>.jsn
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use ocpp_chargepoint::{ChargerCredentials, Engine, EngineConfig, LoopbackConnection};
//! use ocpp_chargepoint::storage::StdFilesystem;
//!
//! let filesystem = StdFilesystem::new("/ocpp").unwrap();
//! let connection = LoopbackConnection::new();
//! let mut engine = Engine::new(
//!     Box::new(connection.clone()),
//!     ChargerCredentials::new("demo-charger").with_vendor("Example"),
//!     EngineConfig::new()
//!         .with_connectors(2)
//!         .with_filesystem(filesystem),
//! );
//!
//! engine.set_connector_plugged_input(1, || true);
//! engine.begin_transaction(1, "mIdTag").unwrap();
//! loop {
//!     engine.tick();
//!     // host sleeps or services other work between slices
//! }
//! ```
//!
//! The engine never spawns threads and never blocks; the host invokes
//! `tick()` frequently and everything up to the next suspension point runs
//! inline. Awaiting an RPC reply is persistent record state, not a call
//! stack, which is what lets unconfirmed boundaries survive reboots.

pub mod auth;
pub mod config;
pub mod connection;
pub mod connector;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ocpp;
pub mod ops;
pub mod storage;
pub mod time;
pub mod tx;

pub use connection::{Connection, LoopbackConnection};
pub use engine::{ChargerCredentials, Engine, EngineConfig, Model, TickSource};
pub use error::CoreError;
pub use ocpp::types::ChargePointStatus;
pub use storage::{FilesystemAdapter, MemFilesystem, StdFilesystem};
pub use time::{Clock, EventTime, Timestamp};
pub use tx::{Transaction, TransactionStore};
