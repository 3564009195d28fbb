//! Engine: the single-threaded heart of the charge point client.
//!
//! The `Model` owns every piece of state the protocol acts on (clock,
//! configuration, transaction store, connectors, caches); operations and the
//! coordinator mutate it and stage outbound calls. The `Engine` wraps the
//! model together with the RPC engine, the operation registry and the
//! transport, and drives everything from a host-invoked `tick()`.
//!
//! ```text
//! Central System
//!       │ WebSocket JSON (Connection trait)
//!       ▼
//! ┌───────────────────────────────────┐
//! │ Engine::tick()                    │
//! │  ┌──────────┐   ┌──────────────┐  │
//! │  │ RpcEngine│◄─►│ Registry     │  │
//! │  └────┬─────┘   └──────┬───────┘  │
//! │       ▼                ▼          │
//! │  ┌─────────────────────────────┐  │
//! │  │ Model: clock │ config │ tx  │  │
//! │  │ store │ connectors │ cache  │  │
//! │  └─────────────────────────────┘  │
//! └───────────────────────────────────┘
//! ```

use std::rc::Rc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};

use crate::auth::AuthCache;
use crate::config::{ConfigStore, ConfigValue};
use crate::connection::Connection;
use crate::connector::{Connector, InputSnapshot};
use crate::error::CoreError;
use crate::ocpp::engine::{Outbound, RpcEngine, SendProfile};
use crate::ocpp::registry::{Operation, OperationRegistry};
use crate::ocpp::types::{AvailabilityType, ChargePointStatus, ResetType};
use crate::storage::FilesystemAdapter;
use crate::time::Clock;
use crate::tx::{Transaction, TransactionStore};

/// Delay before BootNotification is retried when no interval is known.
const BOOT_RETRY_MS: u64 = 60_000;

/// Identity reported in BootNotification.
#[derive(Debug, Clone)]
pub struct ChargerCredentials {
    pub charge_point_model: String,
    pub charge_point_vendor: String,
    pub charge_point_serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

impl ChargerCredentials {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            charge_point_model: model.into(),
            charge_point_vendor: "Generic".to_string(),
            charge_point_serial_number: None,
            firmware_version: None,
        }
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.charge_point_vendor = vendor.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.charge_point_serial_number = Some(serial.into());
        self
    }

    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }
}

/// Source of monotonic milliseconds. Swappable so tests drive time.
pub type TickSource = Box<dyn Fn() -> u64>;

/// Construction-time settings of the engine.
pub struct EngineConfig {
    /// Number of connectors including connector 0 (the charge point itself).
    pub connector_count: usize,
    pub filesystem: Option<Rc<dyn FilesystemAdapter>>,
    pub tick_source: Option<TickSource>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connector_count: 2,
            filesystem: None,
            tick_source: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connectors(mut self, count: usize) -> Self {
        self.connector_count = count.max(1);
        self
    }

    pub fn with_filesystem(mut self, filesystem: Rc<dyn FilesystemAdapter>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn with_tick_source(mut self, source: impl Fn() -> u64 + 'static) -> Self {
        self.tick_source = Some(Box::new(source));
        self
    }
}

/// BootNotification bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct BootState {
    pub accepted: bool,
    /// Whether a BootNotification currently sits in the outbox.
    pub queued: bool,
    /// No new attempt before this tick (server said Pending/Rejected).
    pub retry_at: u64,
}

/// Hardware input callbacks of one connector. A missing callback means the
/// charger has no such sensor.
#[derive(Default)]
pub(crate) struct ConnectorInputs {
    pub plugged: Option<Box<dyn Fn() -> bool>>,
    pub ready: Option<Box<dyn Fn() -> bool>>,
    pub faulted: Option<Box<dyn Fn() -> bool>>,
    pub meter: Option<Box<dyn Fn() -> i32>>,
}

/// Everything the protocol acts on. Exclusively owned by the engine; no
/// external mutation while `tick` may run.
pub struct Model {
    pub(crate) now: u64,
    pub(crate) connected: bool,
    pub(crate) clock: Clock,
    pub(crate) config: ConfigStore,
    pub(crate) store: TransactionStore,
    pub(crate) connectors: Vec<Connector>,
    pub(crate) inputs: Vec<ConnectorInputs>,
    pub(crate) auth_cache: AuthCache,
    pub(crate) credentials: ChargerCredentials,
    pub(crate) boot: BootState,
    pub(crate) heartbeat_last: u64,
    pub(crate) pending_reset: Option<ResetType>,
    pub(crate) reset_tx_ended: bool,
    pub(crate) unlock_hook: Option<Box<dyn FnMut(u32) -> bool>>,
    pub(crate) reset_hook: Option<Box<dyn FnMut(ResetType)>>,
    /// Outbound operations staged by the coordinator and by inbound
    /// handlers, drained into the RPC engine after each phase.
    pub(crate) staging: Vec<Outbound>,
    /// Transaction ids handed out by the loopback echo role.
    next_mock_tx_id: i32,
}

impl Model {
    fn new(
        credentials: ChargerCredentials,
        connector_count: usize,
        filesystem: Option<Rc<dyn FilesystemAdapter>>,
    ) -> Self {
        let mut config = ConfigStore::new(filesystem.clone());
        declare_standard_keys(&mut config, connector_count);
        config.load();

        let mut store = TransactionStore::new(connector_count, filesystem);
        store.load_all();

        let mut connectors = Vec::with_capacity(connector_count);
        let mut inputs = Vec::with_capacity(connector_count);
        for id in 0..connector_count as u32 {
            let mut connector = Connector::new(id);
            if config.bool(&availability_key(id)) {
                connector.availability = AvailabilityType::Inoperative;
            }
            connectors.push(connector);
            inputs.push(ConnectorInputs::default());
        }

        Self {
            now: 0,
            connected: false,
            clock: Clock::new(),
            config,
            store,
            connectors,
            inputs,
            auth_cache: AuthCache::new(),
            credentials,
            boot: BootState::default(),
            heartbeat_last: 0,
            pending_reset: None,
            reset_tx_ended: false,
            unlock_hook: None,
            reset_hook: None,
            staging: Vec::new(),
            next_mock_tx_id: 1000,
        }
    }

    /// Stage an outbound operation for the RPC engine.
    pub(crate) fn send(&mut self, op: Box<dyn Operation>, profile: SendProfile) {
        self.staging.push(Outbound { op, profile });
    }

    pub(crate) fn boot_accepted(&self) -> bool {
        self.boot.accepted
    }

    pub(crate) fn boot_retry_ms(&self) -> u64 {
        BOOT_RETRY_MS
    }

    pub(crate) fn connector_valid(&self, connector_id: u32) -> bool {
        (connector_id as usize) < self.connectors.len()
    }

    /// Physical connectors carry transactions; connector 0 does not.
    pub(crate) fn tx_connector_valid(&self, connector_id: u32) -> bool {
        connector_id >= 1 && self.connector_valid(connector_id)
    }

    pub(crate) fn input_snapshot(&self, connector_id: u32) -> InputSnapshot {
        let Some(inputs) = self.inputs.get(connector_id as usize) else {
            return InputSnapshot::default();
        };
        InputSnapshot {
            plugged: inputs.plugged.as_ref().map(|f| f()),
            ready: inputs.ready.as_ref().map(|f| f()),
            faulted: inputs.faulted.as_ref().map(|f| f()).unwrap_or(false),
        }
    }

    pub(crate) fn meter_reading(&self, connector_id: u32) -> Option<i32> {
        self.inputs
            .get(connector_id as usize)?
            .meter
            .as_ref()
            .map(|f| f())
    }

    pub(crate) fn next_mock_transaction_id(&mut self) -> i32 {
        let id = self.next_mock_tx_id;
        self.next_mock_tx_id += 1;
        id
    }

    pub(crate) fn persist_availability(&mut self, connector_id: u32) {
        let inoperative = self
            .connectors
            .get(connector_id as usize)
            .map(|c| c.availability == AvailabilityType::Inoperative)
            .unwrap_or(false);
        self.config
            .set(&availability_key(connector_id), ConfigValue::Bool(inoperative));
    }
}

pub(crate) fn availability_key(connector_id: u32) -> String {
    format!("AO_AvailabilityInoperative-{}", connector_id)
}

fn declare_standard_keys(config: &mut ConfigStore, connector_count: usize) {
    use ConfigValue::{Bool, Int, Text};

    config.declare("HeartbeatInterval", Int(86400), false, true);
    config.declare("MeterValueSampleInterval", Int(60), false, true);
    config.declare("ConnectionTimeOut", Int(30), false, true);
    config.declare("MinimumStatusDuration", Int(0), false, true);
    config.declare("TransactionMessageAttempts", Int(3), false, true);
    config.declare("TransactionMessageRetryInterval", Int(60), false, true);
    config.declare("AuthorizeRemoteTxRequests", Bool(false), false, true);
    config.declare("LocalAuthorizeOffline", Bool(true), false, true);
    config.declare("LocalPreAuthorize", Bool(true), false, true);
    config.declare("StopTransactionOnInvalidId", Bool(true), false, true);
    config.declare(
        "NumberOfConnectors",
        Int(connector_count.saturating_sub(1) as i32),
        true,
        false,
    );
    config.declare(
        "SupportedFeatureProfiles",
        Text("Core,RemoteTrigger".to_string()),
        true,
        false,
    );
    config.declare("AO_PreBootTransactions", Bool(false), false, true);
    config.declare("GetConfigurationMaxKeys", Int(30), true, false);
    config.declare("DefaultMessageTimeout", Int(30), false, false);
    for id in 0..connector_count as u32 {
        config.declare(&availability_key(id), Bool(false), false, true);
    }
}

/// The charge point client. Hosts construct one, wire up their hardware
/// inputs, and call `tick()` frequently.
pub struct Engine {
    model: Model,
    rpc: RpcEngine,
    registry: OperationRegistry,
    connection: Box<dyn Connection>,
    tick_source: TickSource,
}

impl Engine {
    pub fn new(
        connection: Box<dyn Connection>,
        credentials: ChargerCredentials,
        settings: EngineConfig,
    ) -> Self {
        let tick_source = settings.tick_source.unwrap_or_else(|| {
            let start = Instant::now();
            Box::new(move || start.elapsed().as_millis() as u64)
        });

        let model = Model::new(credentials, settings.connector_count, settings.filesystem);

        let mut registry = OperationRegistry::new();
        crate::ops::register_core_operations(&mut registry);

        info!(
            "engine up: {} connector(s), {} recovered transaction record(s)",
            model.connectors.len(),
            (0..model.connectors.len() as u32)
                .map(|c| model.store.iter(c).count())
                .sum::<usize>()
        );

        Self {
            model,
            rpc: RpcEngine::new(),
            registry,
            connection,
            tick_source,
        }
    }

    /// Run one scheduling slice: drain inbound frames, drive the
    /// transaction coordinator and connector state machines, send what
    /// became due. Never blocks, never panics across this boundary.
    pub fn tick(&mut self) {
        let now = (self.tick_source)();
        self.model.now = now;
        self.connection.tick(now);

        let connected = self.connection.connected();
        if self.model.connected && !connected {
            warn!("connection lost");
            self.rpc.on_disconnect();
        }
        self.model.connected = connected;

        while let Some(text) = self.connection.poll(now) {
            self.rpc.process_incoming(
                &text,
                &mut self.model,
                &mut self.registry,
                self.connection.as_mut(),
                now,
            );
            self.drain_staging();
        }

        self.model.tick_transactions(now);
        self.drain_staging();

        self.rpc
            .tick(&mut self.model, self.connection.as_mut(), now);
        self.drain_staging();

        self.model.config.save();
    }

    fn drain_staging(&mut self) {
        let staged: Vec<Outbound> = self.model.staging.drain(..).collect();
        for outbound in staged {
            self.rpc.enqueue(outbound);
        }
    }

    // --- session API --------------------------------------------------------

    /// Start a charging session; authorization is resolved against the
    /// cache or via an Authorize call.
    pub fn begin_transaction(
        &mut self,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<(), CoreError> {
        self.model.begin_session(connector_id, id_tag, false)
    }

    /// Start a charging session whose tag is already authorized (e.g. by a
    /// local whitelist or an out-of-band decision).
    pub fn begin_transaction_authorized(
        &mut self,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<(), CoreError> {
        self.model.begin_session(connector_id, id_tag, true)
    }

    /// End the session on a connector. `reason` lands in StopTransaction;
    /// `None` means a regular local stop.
    pub fn end_transaction(&mut self, connector_id: u32, reason: Option<&str>) -> bool {
        self.model.end_session(connector_id, reason.unwrap_or("Local"), true)
    }

    /// Abort the session if no StartTransaction was requested yet,
    /// otherwise end it.
    pub fn abort_transaction(&mut self, connector_id: u32) -> bool {
        self.model.abort_session(connector_id)
    }

    /// Whether energy delivery is permitted right now.
    pub fn charge_permitted(&self, connector_id: u32) -> bool {
        self.model
            .store
            .head(connector_id)
            .map(|tx| tx.is_running() && tx.is_active())
            .unwrap_or(false)
    }

    pub fn is_transaction_running(&self, connector_id: u32) -> bool {
        self.model
            .store
            .head(connector_id)
            .map(Transaction::is_running)
            .unwrap_or(false)
    }

    /// The transaction currently processed on a connector, if any.
    pub fn transaction(&self, connector_id: u32) -> Option<&Transaction> {
        self.model.store.head(connector_id)
    }

    /// All retained transaction records of a connector in `tx_nr` order:
    /// the live session plus settled history still occupying ring slots.
    pub fn transaction_history(&self, connector_id: u32) -> impl Iterator<Item = &Transaction> {
        self.model.store.iter(connector_id)
    }

    /// Whether the charge point as a whole is operative.
    pub fn is_operative(&self) -> bool {
        self.model
            .connectors
            .first()
            .map(Connector::is_operative)
            .unwrap_or(false)
    }

    pub fn connector_status(&self, connector_id: u32) -> Option<ChargePointStatus> {
        self.model
            .connectors
            .get(connector_id as usize)
            .map(Connector::status)
    }

    // --- hardware bindings --------------------------------------------------

    pub fn set_connector_plugged_input(
        &mut self,
        connector_id: u32,
        input: impl Fn() -> bool + 'static,
    ) {
        if let Some(inputs) = self.model.inputs.get_mut(connector_id as usize) {
            inputs.plugged = Some(Box::new(input));
        }
    }

    pub fn set_evse_ready_input(
        &mut self,
        connector_id: u32,
        input: impl Fn() -> bool + 'static,
    ) {
        if let Some(inputs) = self.model.inputs.get_mut(connector_id as usize) {
            inputs.ready = Some(Box::new(input));
        }
    }

    pub fn set_connector_faulted_input(
        &mut self,
        connector_id: u32,
        input: impl Fn() -> bool + 'static,
    ) {
        if let Some(inputs) = self.model.inputs.get_mut(connector_id as usize) {
            inputs.faulted = Some(Box::new(input));
        }
    }

    pub fn set_meter_input(&mut self, connector_id: u32, input: impl Fn() -> i32 + 'static) {
        if let Some(inputs) = self.model.inputs.get_mut(connector_id as usize) {
            inputs.meter = Some(Box::new(input));
        }
    }

    /// Hook invoked by UnlockConnector; returns whether the latch released.
    pub fn set_unlock_connector_handler(&mut self, hook: impl FnMut(u32) -> bool + 'static) {
        self.model.unlock_hook = Some(Box::new(hook));
    }

    /// Hook invoked when a Reset is due to be executed.
    pub fn set_reset_handler(&mut self, hook: impl FnMut(ResetType) + 'static) {
        self.model.reset_hook = Some(Box::new(hook));
    }

    /// Mark a connector as reserved (the reservation bookkeeping itself is
    /// host business).
    pub fn set_connector_reserved(&mut self, connector_id: u32, reserved: bool) {
        if let Some(connector) = self.model.connectors.get_mut(connector_id as usize) {
            connector.reserved = reserved;
        }
    }

    // --- host plumbing ------------------------------------------------------

    /// Set the wall clock directly (normally it follows BootNotification).
    pub fn set_clock(&mut self, iso: &str) -> bool {
        let now = (self.tick_source)();
        self.model.clock.set(iso, now)
    }

    pub fn clock_valid(&self) -> bool {
        self.model.clock.is_valid()
    }

    pub fn configuration(&self) -> &ConfigStore {
        &self.model.config
    }

    pub fn configuration_mut(&mut self) -> &mut ConfigStore {
        &mut self.model.config
    }

    /// Observe inbound requests of one action (test hook).
    pub fn set_on_request(&mut self, action: impl Into<String>, observer: impl FnMut(&Value) + 'static) {
        self.registry.set_on_request(action, observer);
    }

    /// Replace the handler factory of an action.
    pub fn register_operation(
        &mut self,
        action: impl Into<String>,
        factory: impl Fn() -> Box<dyn Operation> + 'static,
    ) {
        self.registry.register(action, factory);
    }
}
