//! RemoteStopTransaction. Ends the running transaction carrying the given
//! server-assigned id.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    RemoteStartStopStatus, RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};

pub struct RemoteStopTransaction;

impl RemoteStopTransaction {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RemoteStopTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for RemoteStopTransaction {
    fn action(&self) -> &'static str {
        "RemoteStopTransaction"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: RemoteStopTransactionRequest = parse_request(payload)?;
        let status = if model.remote_stop(req.transaction_id) {
            RemoteStartStopStatus::Accepted
        } else {
            RemoteStartStopStatus::Rejected
        };
        serde_json::to_value(RemoteStopTransactionResponse { status })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
