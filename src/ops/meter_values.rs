//! MeterValues.
//!
//! Periodic energy-register samples while a transaction runs.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{MeterValue, MeterValuesRequest, MeterValuesResponse, SampledValue};

pub struct MeterValues {
    connector_id: u32,
}

impl MeterValues {
    pub fn new(connector_id: u32) -> Self {
        Self { connector_id }
    }
}

impl Operation for MeterValues {
    fn action(&self) -> &'static str {
        "MeterValues"
    }

    fn request_payload(&mut self, model: &mut Model) -> Result<Value, OpError> {
        let reading = model
            .meter_reading(self.connector_id)
            .ok_or_else(|| OpError::internal("no meter input configured"))?;
        let transaction_id = model
            .store
            .head(self.connector_id)
            .and_then(|tx| tx.server_transaction_id());
        let req = MeterValuesRequest {
            connector_id: self.connector_id,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: model.clock.now(model.now),
                sampled_value: vec![SampledValue {
                    value: reading.to_string(),
                    context: Some("Sample.Periodic".to_string()),
                    measurand: Some("Energy.Active.Import.Register".to_string()),
                    unit: Some("Wh".to_string()),
                }],
            }],
        };
        serde_json::to_value(req).map_err(|e| OpError::internal(e.to_string()))
    }

    fn execute(&mut self, _model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let _req: MeterValuesRequest = parse_request(payload)?;
        serde_json::to_value(MeterValuesResponse {}).map_err(|e| OpError::internal(e.to_string()))
    }
}
