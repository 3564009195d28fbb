//! ChangeConfiguration. Delegates to the configuration registry; the
//! batched save runs at the end of the current tick.

use serde_json::Value;

use crate::config::SetOutcome;
use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{
    cistring_ok, ChangeConfigurationRequest, ChangeConfigurationResponse, ConfigurationStatus,
};

const KEY_LEN_MAX: usize = 50;
const VALUE_LEN_MAX: usize = 500;

pub struct ChangeConfiguration;

impl ChangeConfiguration {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChangeConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for ChangeConfiguration {
    fn action(&self) -> &'static str {
        "ChangeConfiguration"
    }

    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let req: ChangeConfigurationRequest = parse_request(payload)?;
        if !cistring_ok(&req.key, KEY_LEN_MAX) {
            return Err(OpError::property("key exceeds CiString50"));
        }
        if !cistring_ok(&req.value, VALUE_LEN_MAX) {
            return Err(OpError::property("value exceeds CiString500"));
        }

        let status = match model.config.set_from_remote(&req.key, &req.value) {
            SetOutcome::Accepted => ConfigurationStatus::Accepted,
            SetOutcome::Rejected => ConfigurationStatus::Rejected,
            SetOutcome::ReadOnly => ConfigurationStatus::Rejected,
            SetOutcome::NotSupported => ConfigurationStatus::NotSupported,
        };
        serde_json::to_value(ChangeConfigurationResponse { status })
            .map_err(|e| OpError::internal(e.to_string()))
    }
}
