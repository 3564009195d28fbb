//! ChangeAvailability.
//!
//! Connector 0 addresses the whole charge point. A connector with an open
//! transaction defers the change until the transaction ends (Scheduled).

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    AvailabilityStatus, ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};

pub struct ChangeAvailability;

impl ChangeAvailability {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChangeAvailability {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for ChangeAvailability {
    fn action(&self) -> &'static str {
        "ChangeAvailability"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: ChangeAvailabilityRequest = parse_request(payload)?;

        let status = if !model.connector_valid(req.connector_id) {
            AvailabilityStatus::Rejected
        } else {
            let targets: Vec<u32> = if req.connector_id == 0 {
                (0..model.connectors.len() as u32).collect()
            } else {
                vec![req.connector_id]
            };

            let mut any_scheduled = false;
            for connector_id in targets {
                let busy = model
                    .store
                    .head(connector_id)
                    .map(|tx| tx.is_running() || tx.is_preparing())
                    .unwrap_or(false);
                let Some(connector) = model.connectors.get_mut(connector_id as usize) else {
                    continue;
                };
                if busy {
                    connector.scheduled_availability = Some(req.kind);
                    any_scheduled = true;
                } else {
                    connector.availability = req.kind;
                    connector.scheduled_availability = None;
                    model.persist_availability(connector_id);
                }
            }
            if any_scheduled {
                AvailabilityStatus::Scheduled
            } else {
                AvailabilityStatus::Accepted
            }
        };

        serde_json::to_value(ChangeAvailabilityResponse { status })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
