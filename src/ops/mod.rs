//! OCPP operations, one module per action.
//!
//! Client-originated actions also carry a server role so that a loopback
//! connection lets the engine answer its own requests with plausible mock
//! confirmations; that is what makes full protocol exchanges runnable in
//! unit tests without a central system.

pub mod authorize;
pub mod boot_notification;
pub mod change_availability;
pub mod change_configuration;
pub mod clear_cache;
pub mod get_configuration;
pub mod heartbeat;
pub mod meter_values;
pub mod remote_start_transaction;
pub mod remote_stop_transaction;
pub mod reset;
pub mod start_transaction;
pub mod status_notification;
pub mod stop_transaction;
pub mod trigger_message;
pub mod unlock_connector;

pub use authorize::Authorize;
pub use boot_notification::BootNotification;
pub use change_availability::ChangeAvailability;
pub use change_configuration::ChangeConfiguration;
pub use clear_cache::ClearCache;
pub use get_configuration::GetConfiguration;
pub use heartbeat::Heartbeat;
pub use meter_values::MeterValues;
pub use remote_start_transaction::RemoteStartTransaction;
pub use remote_stop_transaction::RemoteStopTransaction;
pub use reset::Reset;
pub use start_transaction::StartTransaction;
pub use status_notification::StatusNotification;
pub use stop_transaction::StopTransaction;
pub use trigger_message::TriggerMessage;
pub use unlock_connector::UnlockConnector;

use crate::ocpp::registry::OperationRegistry;

/// Install the default handler set: the Core and RemoteTrigger profiles,
/// plus echo roles for the client-originated actions.
pub fn register_core_operations(registry: &mut OperationRegistry) {
    registry.register("ChangeAvailability", || Box::new(ChangeAvailability::new()));
    registry.register("ChangeConfiguration", || Box::new(ChangeConfiguration::new()));
    registry.register("ClearCache", || Box::new(ClearCache::new()));
    registry.register("GetConfiguration", || Box::new(GetConfiguration::new()));
    registry.register("RemoteStartTransaction", || {
        Box::new(RemoteStartTransaction::new())
    });
    registry.register("RemoteStopTransaction", || {
        Box::new(RemoteStopTransaction::new())
    });
    registry.register("Reset", || Box::new(Reset::new()));
    registry.register("TriggerMessage", || Box::new(TriggerMessage::new()));
    registry.register("UnlockConnector", || Box::new(UnlockConnector::new()));

    // Echo roles: answering our own requests over a loopback connection.
    registry.register("Authorize", || Box::new(Authorize::new(0, 0)));
    registry.register("BootNotification", || Box::new(BootNotification::new()));
    registry.register("Heartbeat", || Box::new(Heartbeat::new()));
    registry.register("MeterValues", || Box::new(MeterValues::new(0)));
    registry.register("StartTransaction", || Box::new(StartTransaction::new(0, 0)));
    registry.register("StatusNotification", || {
        Box::new(StatusNotification::new(0, crate::ocpp::types::ChargePointStatus::Available))
    });
    registry.register("StopTransaction", || Box::new(StopTransaction::new(0, 0)));
}
