//! OCPP-J message framing.
//!
//! Every OCPP-J message is a JSON array:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// OCPP-J message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// CALLERROR codes defined by OCPP-J 1.6.
///
/// `OccurenceConstraintViolation` is the official spelling; the typo ships
/// in OCPP 1.6 and peers expect it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

/// Errors in message framing.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not an OCPP-J array")]
    InvalidFormat,

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),
}

/// CALL frame (request).
#[derive(Debug, Clone)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Serialize to the wire form `[2, messageId, action, payload]`.
    pub fn to_text(&self) -> String {
        json!([
            MessageType::Call as i32,
            &self.message_id,
            &self.action,
            &self.payload
        ])
        .to_string()
    }
}

/// CALLRESULT frame (success response).
#[derive(Debug, Clone)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Serialize to the wire form `[3, messageId, payload]`.
    pub fn to_text(&self) -> String {
        json!([MessageType::CallResult as i32, &self.message_id, &self.payload]).to_string()
    }
}

/// CALLERROR frame.
#[derive(Debug, Clone)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Serialize to the wire form
    /// `[4, messageId, errorCode, errorDescription, errorDetails]`.
    pub fn to_text(&self) -> String {
        json!([
            MessageType::CallError as i32,
            &self.message_id,
            format!("{:?}", self.error_code),
            &self.error_description,
            &self.error_details
        ])
        .to_string()
    }
}

/// Parsed OCPP-J message of any kind.
#[derive(Debug, Clone)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl OcppMessage {
    /// Parse a text frame.
    ///
    /// On failure the frame's messageId is recovered when possible so the
    /// caller can answer with a CALLERROR instead of dropping silently.
    pub fn parse(text: &str) -> Result<Self, (Option<String>, FrameError)> {
        let array: Vec<Value> =
            serde_json::from_str(text).map_err(|e| (None, FrameError::Json(e)))?;

        let message_id = array
            .get(1)
            .and_then(Value::as_str)
            .map(str::to_string);
        let fail = |e: FrameError| (message_id.clone(), e);

        let msg_type = array
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| fail(FrameError::InvalidFormat))?;
        let id = message_id
            .clone()
            .ok_or_else(|| fail(FrameError::InvalidFormat))?;

        match msg_type {
            2 => {
                if array.len() != 4 {
                    return Err(fail(FrameError::InvalidFormat));
                }
                let action = array[2]
                    .as_str()
                    .ok_or_else(|| fail(FrameError::InvalidFormat))?
                    .to_string();
                Ok(OcppMessage::Call(Call {
                    message_id: id,
                    action,
                    payload: array[3].clone(),
                }))
            }
            3 => {
                if array.len() != 3 {
                    return Err(fail(FrameError::InvalidFormat));
                }
                Ok(OcppMessage::CallResult(CallResult {
                    message_id: id,
                    payload: array[2].clone(),
                }))
            }
            4 => {
                if array.len() != 5 {
                    return Err(fail(FrameError::InvalidFormat));
                }
                let error_code = array[2]
                    .as_str()
                    .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
                    .unwrap_or(ErrorCode::GenericError);
                Ok(OcppMessage::CallError(CallError {
                    message_id: id,
                    error_code,
                    error_description: array[3].as_str().unwrap_or("").to_string(),
                    error_details: array[4].clone(),
                }))
            }
            other => Err(fail(FrameError::UnknownMessageType(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_serialization() {
        let call = Call::new("42", "Heartbeat", json!({}));
        let text = call.to_text();
        assert!(text.starts_with("[2,"));
        assert!(text.contains("\"Heartbeat\""));
    }

    #[test]
    fn call_parsing() {
        let msg = OcppMessage::parse(r#"[2, "msg-123", "Heartbeat", {}]"#).unwrap();
        match msg {
            OcppMessage::Call(call) => {
                assert_eq!(call.message_id, "msg-123");
                assert_eq!(call.action, "Heartbeat");
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn call_result_parsing() {
        let msg =
            OcppMessage::parse(r#"[3, "msg-123", {"currentTime": "2026-01-20T12:00:00Z"}]"#)
                .unwrap();
        match msg {
            OcppMessage::CallResult(result) => {
                assert_eq!(result.message_id, "msg-123");
                assert_eq!(result.payload["currentTime"], "2026-01-20T12:00:00Z");
            }
            _ => panic!("Expected CallResult"),
        }
    }

    #[test]
    fn call_error_parsing() {
        let msg =
            OcppMessage::parse(r#"[4, "msg-123", "NotImplemented", "no such action", {}]"#)
                .unwrap();
        match msg {
            OcppMessage::CallError(error) => {
                assert_eq!(error.message_id, "msg-123");
                assert_eq!(error.error_code, ErrorCode::NotImplemented);
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn parse_recovers_message_id_for_error_replies() {
        // Wrong arity, but the id is there.
        let err = OcppMessage::parse(r#"[2, "msg-9", "Heartbeat"]"#).unwrap_err();
        assert_eq!(err.0.as_deref(), Some("msg-9"));

        // Unknown message type.
        let err = OcppMessage::parse(r#"[7, "msg-10", {}]"#).unwrap_err();
        assert_eq!(err.0.as_deref(), Some("msg-10"));

        // Not even JSON: nothing to reply to.
        let err = OcppMessage::parse("hello world").unwrap_err();
        assert!(err.0.is_none());
    }

    #[test]
    fn unknown_error_code_degrades_to_generic() {
        let msg = OcppMessage::parse(r#"[4, "m", "SomethingNew", "", {}]"#).unwrap();
        match msg {
            OcppMessage::CallError(e) => assert_eq!(e.error_code, ErrorCode::GenericError),
            _ => panic!("Expected CallError"),
        }
    }
}
