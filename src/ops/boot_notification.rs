//! BootNotification.
//!
//! First call out after a (re)connect; nothing else leaves the outbox until
//! the central system accepts the registration. The confirmation is also
//! the time authority: it anchors the wall clock.

use serde_json::Value;
use tracing::{info, warn};

use crate::config::ConfigValue;
use crate::engine::Model;
use crate::ocpp::registry::{parse_request, OpError, Operation};
use crate::ocpp::types::{BootNotificationRequest, BootNotificationResponse, RegistrationStatus};

pub struct BootNotification;

impl BootNotification {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BootNotification {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for BootNotification {
    fn action(&self) -> &'static str {
        "BootNotification"
    }

    fn request_payload(&mut self, model: &mut Model) -> Result<Value, OpError> {
        let req = BootNotificationRequest {
            charge_point_model: model.credentials.charge_point_model.clone(),
            charge_point_vendor: model.credentials.charge_point_vendor.clone(),
            charge_point_serial_number: model.credentials.charge_point_serial_number.clone(),
            firmware_version: model.credentials.firmware_version.clone(),
        };
        serde_json::to_value(req).map_err(|e| OpError::internal(e.to_string()))
    }

    fn handle_result(&mut self, model: &mut Model, payload: &Value) {
        let resp: BootNotificationResponse = match serde_json::from_value(payload.clone()) {
            Ok(resp) => resp,
            Err(e) => {
                warn!("BootNotification: unreadable confirmation: {}", e);
                model.boot.queued = false;
                model.boot.retry_at = model.now + model.boot_retry_ms();
                return;
            }
        };

        match resp.status {
            RegistrationStatus::Accepted => {
                info!("registration accepted, interval {} s", resp.interval);
                model.boot.accepted = true;
                model.boot.queued = false;
                model
                    .clock
                    .set(&resp.current_time.format_iso(), model.now);
                model.heartbeat_last = model.now;
                if resp.interval > 0 {
                    model
                        .config
                        .set("HeartbeatInterval", ConfigValue::Int(resp.interval));
                }
            }
            RegistrationStatus::Pending | RegistrationStatus::Rejected => {
                let delay_ms = if resp.interval > 0 {
                    resp.interval as u64 * 1000
                } else {
                    model.boot_retry_ms()
                };
                info!(
                    "registration {:?}, retrying in {} ms",
                    resp.status, delay_ms
                );
                model.boot.queued = false;
                model.boot.retry_at = model.now + delay_ms;
            }
        }
    }

    /// Server role for the loopback echo: accept the registration with the
    /// local clock and heartbeat cadence.
    fn execute(&mut self, model: &mut Model, payload: &Value) -> Result<Value, OpError> {
        let _req: BootNotificationRequest = parse_request(payload)?;
        let resp = BootNotificationResponse {
            status: RegistrationStatus::Accepted,
            current_time: model.clock.now(model.now),
            interval: model.config.int("HeartbeatInterval"),
        };
        serde_json::to_value(resp).map_err(|e| OpError::internal(e.to_string()))
    }
}
