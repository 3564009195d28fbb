//! Heartbeat. Doubles as clock re-synchronization.

use serde_json::Value;
use tracing::warn;

use crate::engine::Model;
use crate::ocpp::registry::{OpError, Operation};
use crate::ocpp::types::{HeartbeatRequest, HeartbeatResponse};

pub struct Heartbeat;

impl Heartbeat {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Heartbeat {
    fn action(&self) -> &'static str {
        "Heartbeat"
    }

    fn request_payload(&mut self, _model: &mut Model) -> Result<Value, OpError> {
        serde_json::to_value(HeartbeatRequest {}).map_err(|e| OpError::internal(e.to_string()))
    }

    fn handle_result(&mut self, model: &mut Model, payload: &Value) {
        match serde_json::from_value::<HeartbeatResponse>(payload.clone()) {
            Ok(resp) => {
                model
                    .clock
                    .set(&resp.current_time.format_iso(), model.now);
            }
            Err(e) => warn!("Heartbeat: unreadable confirmation: {}", e),
        }
    }

    fn execute(&mut self, model: &mut Model, _payload: &Value) -> Result<Value, OpError> {
        let resp = HeartbeatResponse {
            current_time: model.clock.now(model.now),
        };
        serde_json::to_value(resp).map_err(|e| OpError::internal(e.to_string()))
    }
}
