//! Adapter catalog: builds boxed adapters from device definitions.
//!
//! The built-in catalog covers the shipped transports; callers can register
//! additional factories for custom adapter types before building a manager
//! from configuration.

use std::collections::HashMap;
use std::time::Duration;

use super::{DeviceAdapter, MockAdapter, ModbusAdapter, TcpAdapter};
use crate::config::{DeviceDefinition, VALID_DEVICE_TYPES};
use crate::error::{AppResult, EmitterError};

type AdapterBuilder = Box<dyn Fn(&DeviceDefinition) -> AppResult<Box<dyn DeviceAdapter>> + Send + Sync>;

/// Registry of adapter factories keyed by device type.
pub struct AdapterCatalog {
    builders: HashMap<String, AdapterBuilder>,
}

impl Default for AdapterCatalog {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl AdapterCatalog {
    /// Empty catalog with no factories.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Catalog pre-loaded with the shipped adapter types.
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register_factory("tcp", Box::new(build_tcp));
        catalog.register_factory("modbus", Box::new(build_modbus));
        catalog.register_factory("mock", Box::new(|_| Ok(Box::new(MockAdapter::new()))));
        #[cfg(feature = "device_serial")]
        catalog.register_factory("serial", Box::new(build_serial));
        #[cfg(not(feature = "device_serial"))]
        catalog.register_factory("serial", Box::new(|_| Err(EmitterError::SerialFeatureDisabled)));
        catalog
    }

    /// Register (or replace) a factory for a device type.
    pub fn register_factory(&mut self, device_type: impl Into<String>, builder: AdapterBuilder) {
        self.builders.insert(device_type.into(), builder);
    }

    /// Build an adapter for a device definition.
    pub fn build(&self, definition: &DeviceDefinition) -> AppResult<Box<dyn DeviceAdapter>> {
        let builder = self.builders.get(&definition.r#type).ok_or_else(|| {
            EmitterError::Configuration(format!(
                "Unsupported device type '{}'. Must be one of: {}",
                definition.r#type,
                VALID_DEVICE_TYPES.join(", ")
            ))
        })?;
        builder(definition)
    }
}

fn build_tcp(definition: &DeviceDefinition) -> AppResult<Box<dyn DeviceAdapter>> {
    let tcp = definition.tcp.as_ref().ok_or_else(|| {
        EmitterError::Configuration(format!(
            "Device '{}' missing 'tcp' configuration block",
            definition.id
        ))
    })?;
    Ok(Box::new(
        TcpAdapter::new(tcp.host.clone(), tcp.port)
            .with_timeout(Duration::from_millis(tcp.timeout_ms)),
    ))
}

fn build_modbus(definition: &DeviceDefinition) -> AppResult<Box<dyn DeviceAdapter>> {
    let modbus = definition.modbus.as_ref().ok_or_else(|| {
        EmitterError::Configuration(format!(
            "Device '{}' missing 'modbus' configuration block",
            definition.id
        ))
    })?;
    Ok(Box::new(
        ModbusAdapter::new(modbus.host.clone())
            .with_port(modbus.port)
            .with_unit_id(modbus.unit_id),
    ))
}

#[cfg(feature = "device_serial")]
fn build_serial(definition: &DeviceDefinition) -> AppResult<Box<dyn DeviceAdapter>> {
    let serial = definition.serial.as_ref().ok_or_else(|| {
        EmitterError::Configuration(format!(
            "Device '{}' missing 'serial' configuration block",
            definition.id
        ))
    })?;
    Ok(Box::new(
        super::SerialLineAdapter::new(serial.port.clone(), serial.baud_rate)
            .with_timeout(Duration::from_millis(serial.timeout_ms)),
    ))
}
