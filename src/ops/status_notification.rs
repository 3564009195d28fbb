//! StatusNotification.
//!
//! Carries the status captured at reporting time; while offline only the
//! latest status per connector survives in the outbox.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    ChargePointErrorCode, ChargePointStatus, StatusNotificationRequest,
    StatusNotificationResponse,
};

pub struct StatusNotification {
    connector_id: u32,
    status: ChargePointStatus,
}

impl StatusNotification {
    pub fn new(connector_id: u32, status: ChargePointStatus) -> Self {
        Self {
            connector_id,
            status,
        }
    }
}

impl Operation for StatusNotification {
    fn action(&self) -> &'static str {
        "StatusNotification"
    }

    fn request_payload(&mut self, model: &mut Model) -> Result<Value, OpError> {
        let error_code = if self.status == ChargePointStatus::Faulted {
            ChargePointErrorCode::OtherError
        } else {
            ChargePointErrorCode::NoError
        };
        let req = StatusNotificationRequest {
            connector_id: self.connector_id,
            error_code,
            status: self.status,
            timestamp: Some(model.clock.now(model.now)),
        };
        serde_json::to_value(req).map_err(|e| OpError::internal(e.to_string()))
    }

    fn execute(&mut self, _model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let _req: StatusNotificationRequest = parse_request(payload)?;
        serde_json::to_value(StatusNotificationResponse {})
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
