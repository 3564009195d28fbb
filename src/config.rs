//! Typed configuration registry.
//!
//! Keys are declared with a default, a type, and flags (read-only,
//! persistable). The central system reads and writes them through
//! GetConfiguration / ChangeConfiguration; the core reads them by name.
//! Mutations set a dirty flag; `save` performs one batched write of the
//! persistable subset through the filesystem adapter.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::FilesystemAdapter;

/// Location of the persisted configuration document.
pub const CONFIG_FILE: &str = "config.jsn";

/// A configuration value in one of the three OCPP-visible shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i32),
    Text(String),
}

impl ConfigValue {
    /// Render the way GetConfiguration reports values.
    pub fn to_field(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::Text(s) => s.clone(),
        }
    }

    /// Parse a ChangeConfiguration value against the declared shape.
    fn parse_as(&self, raw: &str) -> Option<ConfigValue> {
        match self {
            ConfigValue::Bool(_) => match raw {
                "true" | "True" | "TRUE" => Some(ConfigValue::Bool(true)),
                "false" | "False" | "FALSE" => Some(ConfigValue::Bool(false)),
                _ => None,
            },
            ConfigValue::Int(_) => raw.trim().parse().ok().map(ConfigValue::Int),
            ConfigValue::Text(_) => Some(ConfigValue::Text(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct ConfigEntry {
    value: ConfigValue,
    readonly: bool,
    persistable: bool,
}

/// Outcome of a write attempt from the central system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Accepted,
    Rejected,
    ReadOnly,
    NotSupported,
}

/// Key→value store backing the OCPP configuration surface.
pub struct ConfigStore {
    entries: BTreeMap<String, ConfigEntry>,
    filesystem: Option<Rc<dyn FilesystemAdapter>>,
    dirty: bool,
}

impl ConfigStore {
    pub fn new(filesystem: Option<Rc<dyn FilesystemAdapter>>) -> Self {
        Self {
            entries: BTreeMap::new(),
            filesystem,
            dirty: false,
        }
    }

    /// Declare a key. A value already present (from an earlier declare or
    /// from `load`) wins over the default; flags are always refreshed.
    pub fn declare(
        &mut self,
        key: &str,
        default: ConfigValue,
        readonly: bool,
        persistable: bool,
    ) {
        self.entries
            .entry(key.to_string())
            .and_modify(|e| {
                e.readonly = readonly;
                e.persistable = persistable;
            })
            .or_insert(ConfigEntry {
                value: default,
                readonly,
                persistable,
            });
    }

    pub fn int(&self, key: &str) -> i32 {
        match self.entries.get(key).map(|e| &e.value) {
            Some(ConfigValue::Int(i)) => *i,
            _ => 0,
        }
    }

    pub fn bool(&self, key: &str) -> bool {
        matches!(
            self.entries.get(key).map(|e| &e.value),
            Some(ConfigValue::Bool(true))
        )
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key).map(|e| &e.value) {
            Some(ConfigValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Direct typed write from the host side. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: ConfigValue) {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.value != value {
                entry.value = value;
                self.dirty = true;
            }
        } else {
            warn!("set of undeclared configuration key {}", key);
        }
    }

    /// Write from ChangeConfiguration: enforces existence, mutability and
    /// the declared value shape.
    pub fn set_from_remote(&mut self, key: &str, raw: &str) -> SetOutcome {
        let Some(entry) = self.entries.get_mut(key) else {
            return SetOutcome::NotSupported;
        };
        if entry.readonly {
            return SetOutcome::ReadOnly;
        }
        match entry.value.parse_as(raw) {
            Some(value) => {
                if entry.value != value {
                    entry.value = value;
                    self.dirty = true;
                }
                SetOutcome::Accepted
            }
            None => SetOutcome::Rejected,
        }
    }

    /// Iterate `(key, readonly, reported value)` in key order.
    pub fn iter_reported(&self) -> impl Iterator<Item = (&str, bool, String)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.as_str(), e.readonly, e.value.to_field()))
    }

    /// Merge persisted values over the declared defaults.
    pub fn load(&mut self) {
        let Some(fs) = self.filesystem.clone() else {
            return;
        };
        let Some(content) = fs.read(CONFIG_FILE) else {
            return;
        };
        match serde_json::from_str::<BTreeMap<String, ConfigValue>>(&content) {
            Ok(values) => {
                for (key, value) in values {
                    match self.entries.get_mut(&key) {
                        Some(entry) => entry.value = value,
                        None => {
                            // Key persisted by a previous firmware; keep it
                            // writable so the server can still manage it.
                            self.entries.insert(
                                key,
                                ConfigEntry {
                                    value,
                                    readonly: false,
                                    persistable: true,
                                },
                            );
                        }
                    }
                }
                debug!("configuration loaded");
            }
            Err(e) => warn!("discarding unreadable configuration: {}", e),
        }
    }

    /// Persist the persistable subset if anything changed since the last
    /// save.
    pub fn save(&mut self) {
        if !self.dirty {
            return;
        }
        let Some(fs) = self.filesystem.clone() else {
            self.dirty = false;
            return;
        };
        let subset: BTreeMap<&str, &ConfigValue> = self
            .entries
            .iter()
            .filter(|(_, e)| e.persistable)
            .map(|(k, e)| (k.as_str(), &e.value))
            .collect();
        match serde_json::to_string(&subset) {
            Ok(json) => match fs.write(CONFIG_FILE, &json) {
                Ok(()) => self.dirty = false,
                Err(e) => warn!("configuration save failed: {}", e),
            },
            Err(e) => warn!("configuration serialization failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemFilesystem;

    fn store_with(fs: MemFilesystem) -> ConfigStore {
        let mut store = ConfigStore::new(Some(Rc::new(fs)));
        store.declare("HeartbeatInterval", ConfigValue::Int(86400), false, true);
        store.declare("NumberOfConnectors", ConfigValue::Int(1), true, false);
        store.declare(
            "LocalAuthorizeOffline",
            ConfigValue::Bool(true),
            false,
            true,
        );
        store
    }

    #[test]
    fn declared_defaults_are_readable() {
        let store = store_with(MemFilesystem::new());
        assert_eq!(store.int("HeartbeatInterval"), 86400);
        assert!(store.bool("LocalAuthorizeOffline"));
        assert_eq!(store.int("NoSuchKey"), 0);
    }

    #[test]
    fn remote_writes_respect_type_and_mutability() {
        let mut store = store_with(MemFilesystem::new());

        assert_eq!(
            store.set_from_remote("HeartbeatInterval", "300"),
            SetOutcome::Accepted
        );
        assert_eq!(store.int("HeartbeatInterval"), 300);

        assert_eq!(
            store.set_from_remote("HeartbeatInterval", "soon"),
            SetOutcome::Rejected
        );
        assert_eq!(
            store.set_from_remote("NumberOfConnectors", "5"),
            SetOutcome::ReadOnly
        );
        assert_eq!(
            store.set_from_remote("Unknown", "1"),
            SetOutcome::NotSupported
        );
    }

    #[test]
    fn save_and_load_round_trip_persistable_keys() {
        let fs = MemFilesystem::new();
        {
            let mut store = store_with(fs.clone());
            store.set_from_remote("HeartbeatInterval", "120");
            store.set_from_remote("LocalAuthorizeOffline", "false");
            store.save();
        }

        let mut reloaded = store_with(fs);
        reloaded.load();
        assert_eq!(reloaded.int("HeartbeatInterval"), 120);
        assert!(!reloaded.bool("LocalAuthorizeOffline"));
        // Volatile keys are not persisted.
        assert_eq!(reloaded.int("NumberOfConnectors"), 1);
    }

    #[test]
    fn save_is_a_no_op_when_clean() {
        let fs = MemFilesystem::new();
        let mut store = store_with(fs.clone());
        store.save();
        assert!(fs.is_empty());
    }
}
