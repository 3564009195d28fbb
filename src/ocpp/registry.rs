//! Operation registry.
//!
//! Maps OCPP action names to handler factories. A handler covers up to four
//! responsibilities: serializing its outbound request, parsing an inbound
//! request, executing the server-role effect, and digesting the response to
//! its own call. Most operations only implement the subset they need.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::messages::{CallError, ErrorCode};
use crate::engine::Model;

/// Failure while handling an operation, surfaced to the peer as CALLERROR.
#[derive(Debug)]
pub struct OpError {
    pub code: ErrorCode,
    pub description: String,
}

impl OpError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }

    pub fn property(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::PropertyConstraintViolation, description)
    }

    pub fn not_supported(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSupported, description)
    }
}

/// Parse an inbound payload into its typed form, classifying failures the
/// way OCPP-J prescribes: a missing field is an occurrence violation, a
/// malformed one a property violation.
pub fn parse_request<T: DeserializeOwned>(payload: &Value) -> Result<T, OpError> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        let msg = e.to_string();
        let code = if msg.contains("missing field") {
            ErrorCode::OccurenceConstraintViolation
        } else {
            ErrorCode::PropertyConstraintViolation
        };
        OpError::new(code, msg)
    })
}

/// One OCPP action, in either RPC role.
pub trait Operation {
    /// The OCPP action name.
    fn action(&self) -> &'static str;

    /// Build the request payload for an outbound CALL. Called at send time
    /// (and again on retry); must be a pure function of the model.
    fn request_payload(&mut self, _model: &mut Model) -> Result<Value, OpError> {
        Err(OpError::internal("not an outbound operation"))
    }

    /// Digest the CALLRESULT payload of our own call.
    fn handle_result(&mut self, _model: &mut Model, _payload: &Value) {}

    /// Digest a CALLERROR for our own call. Retry scheduling is the RPC
    /// engine's business; this hook only observes.
    fn handle_error(&mut self, _model: &mut Model, error: &CallError) {
        warn!(
            "{}: CALLERROR {:?}: {}",
            self.action(),
            error.error_code,
            error.error_description
        );
    }

    /// Called when the engine stops trying to deliver this call.
    fn give_up(&mut self, _model: &mut Model) {}

    /// Execute the server-role effect of an inbound CALL and produce the
    /// confirmation payload.
    fn execute(&mut self, _model: &mut Model, _payload: &Value) -> Result<Value, OpError> {
        Err(OpError::not_supported("no server role for this action"))
    }
}

type Factory = Box<dyn Fn() -> Box<dyn Operation>>;
type Observer = Box<dyn FnMut(&Value)>;

/// Action-name → handler-factory table, plus test observers.
#[derive(Default)]
pub struct OperationRegistry {
    factories: HashMap<String, Factory>,
    observers: HashMap<String, Observer>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for an action. Re-registering replaces the prior
    /// factory.
    pub fn register(
        &mut self,
        action: impl Into<String>,
        factory: impl Fn() -> Box<dyn Operation> + 'static,
    ) {
        let action = action.into();
        if self.factories.insert(action.clone(), Box::new(factory)).is_some() {
            debug!("registry: replaced handler for {}", action);
        }
    }

    /// Instantiate a handler for an inbound CALL.
    pub fn create(&self, action: &str) -> Option<Box<dyn Operation>> {
        self.factories.get(action).map(|f| f())
    }

    /// Install an observer invoked after handler execution with the parsed
    /// request payload. One observer per action; mainly a test hook.
    pub fn set_on_request(
        &mut self,
        action: impl Into<String>,
        observer: impl FnMut(&Value) + 'static,
    ) {
        self.observers.insert(action.into(), Box::new(observer));
    }

    pub fn notify_request(&mut self, action: &str, payload: &Value) {
        if let Some(observer) = self.observers.get_mut(action) {
            observer(payload);
        }
    }
}
