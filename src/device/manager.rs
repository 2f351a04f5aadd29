//! Device manager: registry and router for named devices.
//!
//! The manager exclusively owns the `device_id → (adapter, configuration)`
//! mapping. Per-device operations are independent; one device's failure
//! never affects dispatch to the others.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use super::{AdapterCatalog, DeviceAdapter};
use crate::config::DeviceDefinition;
use crate::error::{AppResult, EmitterError};

struct DeviceRecord {
    adapter: Box<dyn DeviceAdapter>,
    config: Value,
}

/// Per-device entry returned by [`DeviceManager::system_status`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    /// Whether the adapter reports an established link
    pub connected: bool,
    /// Adapter-reported status snapshot (or an error object)
    pub status: Value,
    /// The configuration record stored at registration
    pub config: Value,
}

/// Registry and command router for multiple named devices.
#[derive(Default)]
pub struct DeviceManager {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager from enabled device definitions using the built-in
    /// adapter catalog.
    pub fn from_settings(definitions: &[DeviceDefinition]) -> AppResult<Self> {
        Self::from_settings_with(definitions, &AdapterCatalog::with_builtin())
    }

    /// Build a manager from enabled device definitions using a caller-supplied
    /// catalog.
    pub fn from_settings_with(
        definitions: &[DeviceDefinition],
        catalog: &AdapterCatalog,
    ) -> AppResult<Self> {
        let mut manager = Self::new();
        for definition in definitions.iter().filter(|definition| definition.enabled) {
            let adapter = catalog.build(definition)?;
            let config = serde_json::to_value(definition).unwrap_or(Value::Null);
            manager.register(definition.id.clone(), adapter, config);
        }
        Ok(manager)
    }

    /// Register a device, overwriting any existing registration for the id.
    pub fn register(&mut self, id: impl Into<String>, adapter: Box<dyn DeviceAdapter>, config: Value) {
        let id = id.into();
        if self
            .devices
            .insert(id.clone(), DeviceRecord { adapter, config })
            .is_some()
        {
            warn!(device = %id, "replacing existing device registration");
        } else {
            info!(device = %id, "device registered");
        }
    }

    /// Whether a device id is registered.
    pub fn is_registered(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Registered device ids, sorted for stable iteration.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Attempt to connect every registered device.
    ///
    /// Does not stop on the first failure; returns a per-device success map.
    pub async fn connect_all(&mut self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (id, record) in &mut self.devices {
            let connected = match record.adapter.connect().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(device = %id, %err, "device connect failed");
                    false
                }
            };
            results.insert(id.clone(), connected);
        }
        results
    }

    /// Disconnect every registered device. Never fails.
    pub async fn disconnect_all(&mut self) {
        for record in self.devices.values_mut() {
            record.adapter.disconnect().await;
        }
    }

    /// Route a command to one device.
    pub async fn send(&mut self, device_id: &str, command: &str, params: &Value) -> AppResult<Value> {
        let record = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| EmitterError::DeviceNotRegistered(device_id.to_string()))?;
        record.adapter.send_command(command, params).await
    }

    /// Send the same command to every registered device independently,
    /// collecting a per-device result map. One device's failure is isolated
    /// from the others.
    pub async fn broadcast(
        &mut self,
        command: &str,
        params: &Value,
    ) -> HashMap<String, AppResult<Value>> {
        let mut results = HashMap::new();
        for (id, record) in &mut self.devices {
            let result = record.adapter.send_command(command, params).await;
            if let Err(err) = &result {
                warn!(device = %id, %err, "broadcast command failed");
            }
            results.insert(id.clone(), result);
        }
        results
    }

    /// Per-device connection flag, status snapshot, and stored configuration.
    pub async fn system_status(&mut self) -> HashMap<String, DeviceReport> {
        let mut report = HashMap::new();
        for (id, record) in &mut self.devices {
            let status = match record.adapter.read_status().await {
                Ok(value) => value,
                Err(err) => serde_json::json!({ "error": err.to_string() }),
            };
            report.insert(
                id.clone(),
                DeviceReport {
                    connected: record.adapter.is_connected(),
                    status,
                    config: record.config.clone(),
                },
            );
        }
        report
    }
}
