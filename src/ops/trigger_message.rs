//! TriggerMessage. Enqueues the requested message out-of-band.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::engine::SendProfile;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{TriggerMessageRequest, TriggerMessageResponse, TriggerMessageStatus};
use crate::ops::{BootNotification, Heartbeat, MeterValues, StatusNotification};

pub struct TriggerMessage;

impl TriggerMessage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TriggerMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for TriggerMessage {
    fn action(&self) -> &'static str {
        "TriggerMessage"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: TriggerMessageRequest = parse_request(payload)?;

        if let Some(connector_id) = req.connector_id {
            if !model.connector_valid(connector_id) {
                return serde_json::to_value(TriggerMessageResponse {
                    status: TriggerMessageStatus::Rejected,
                })
                .map_err(|e| OpError::internal(e.to_string()));
            }
        }
        let connector_targets: Vec<u32> = match req.connector_id {
            Some(id) => vec![id],
            None => (0..model.connectors.len() as u32).collect(),
        };

        let status = match req.requested_message.as_str() {
            "BootNotification" => {
                model.send(Box::new(BootNotification::new()), SendProfile::Boot);
                TriggerMessageStatus::Accepted
            }
            "Heartbeat" => {
                model.send(Box::new(Heartbeat::new()), SendProfile::Plain);
                TriggerMessageStatus::Accepted
            }
            "StatusNotification" => {
                for connector_id in connector_targets {
                    let Some(status) = model
                        .connectors
                        .get(connector_id as usize)
                        .map(|c| c.status())
                    else {
                        continue;
                    };
                    model.send(
                        Box::new(StatusNotification::new(connector_id, status)),
                        SendProfile::Status { connector_id },
                    );
                }
                TriggerMessageStatus::Accepted
            }
            "MeterValues" => {
                for connector_id in connector_targets {
                    if connector_id >= 1 {
                        model.send(Box::new(MeterValues::new(connector_id)), SendProfile::Plain);
                    }
                }
                TriggerMessageStatus::Accepted
            }
            _ => TriggerMessageStatus::NotImplemented,
        };

        serde_json::to_value(TriggerMessageResponse { status })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
