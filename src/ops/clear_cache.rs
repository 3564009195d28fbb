//! ClearCache. Empties the authorization cache.

use serde_json::Value;

use crate::engine::Model;
use crate::ocpp::registry::{OpError, Operation};
use crate::ocpp::types::{ClearCacheResponse, ClearCacheStatus};

pub struct ClearCache;

impl ClearCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClearCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for ClearCache {
    fn action(&self) -> &'static str {
        "ClearCache"
    }

    fn execute(&mut self, model: &mut Model, _payload: &Value) -> Result<Value, OpError> {
        model.auth_cache.clear();
        serde_json::to_value(ClearCacheResponse {
            status: ClearCacheStatus::Accepted,
        })
        .map_err(|e| OpError::internal(e.to_string()))
    }
}
