//! UnlockConnector. Ends any running transaction, then works the latch.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{UnlockConnectorRequest, UnlockConnectorResponse, UnlockStatus};

pub struct UnlockConnector;

impl UnlockConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UnlockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for UnlockConnector {
    fn action(&self) -> &'static str {
        "UnlockConnector"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: UnlockConnectorRequest = parse_request(payload)?;

        let status = if !model.tx_connector_valid(req.connector_id) {
            UnlockStatus::NotSupported
        } else {
            model.end_session(req.connector_id, "UnlockCommand", false);
            match model.unlock_hook.take() {
                Some(mut hook) => {
                    let released = hook(req.connector_id);
                    model.unlock_hook = Some(hook);
                    if released {
                        UnlockStatus::Unlocked
                    } else {
                        UnlockStatus::UnlockFailed
                    }
                }
                None => UnlockStatus::NotSupported,
            }
        };

        serde_json::to_value(UnlockConnectorResponse { status })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
