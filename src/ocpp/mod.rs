//! OCPP-J wire layer: framing, payload types, operation registry and the
//! RPC engine.

pub mod engine;
pub mod messages;
pub mod registry;
pub mod types;

pub use engine::{Outbound, RpcEngine, SendProfile};
pub use messages::{Call, CallError, CallResult, ErrorCode, FrameError, OcppMessage};
pub use registry::{OpError, Operation, OperationRegistry};
