//! Reset.
//!
//! Sets a deferred reboot flag; the coordinator ends open transactions and
//! invokes the reboot hook once the boundaries settle (immediately for a
//! hard reset).

use serde_json::Value;
use tracing::info;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{ResetRequest, ResetResponse, ResetStatus};

pub struct Reset;

impl Reset {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Reset {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Reset {
    fn action(&self) -> &'static str {
        "Reset"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: ResetRequest = parse_request(payload)?;
        info!("{:?} reset requested", req.kind);
        model.pending_reset = Some(req.kind);
        model.reset_tx_ended = false;
        serde_json::to_value(ResetResponse {
            status: ResetStatus::Accepted,
        })
        .map_err(|e| OpError::internal(e.to_string()))
    }
}
