//! GetConfiguration. Reports declared keys, capped by
//! GetConfigurationMaxKeys; unknown requested keys are echoed back.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{GetConfigurationRequest, GetConfigurationResponse, KeyValue};

pub struct GetConfiguration;

impl GetConfiguration {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for GetConfiguration {
    fn action(&self) -> &'static str {
        "GetConfiguration"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: GetConfigurationRequest = parse_request(payload)?;
        let max_keys = model.config.int("GetConfigurationMaxKeys").max(1) as usize;

        let mut reported = Vec::new();
        let mut unknown = Vec::new();

        match req.key {
            Some(keys) => {
                for key in keys {
                    if model.config.contains(&key) {
                        if let Some((k, readonly, value)) = model
                            .config
                            .iter_reported()
                            .find(|(k, _, _)| *k == key.as_str())
                        {
                            reported.push(KeyValue {
                                key: k.to_string(),
                                readonly,
                                value: Some(value),
                            });
                        }
                    } else {
                        unknown.push(key);
                    }
                }
            }
            None => {
                for (key, readonly, value) in model.config.iter_reported() {
                    reported.push(KeyValue {
                        key: key.to_string(),
                        readonly,
                        value: Some(value),
                    });
                }
            }
        }
        reported.truncate(max_keys);

        let resp = GetConfigurationResponse {
            configuration_key: Some(reported),
            unknown_key: (!unknown.is_empty()).then_some(unknown),
        };
        serde_json::to_value(resp).map_err(|e| OpError::internal(e.to_string()))
    }
}
