//! Register-based industrial protocol adapter.
//!
//! Commands map onto holding-register reads and writes against a local
//! register image; the image stands in for the PLC gateway, and wire-level
//! framing stays out of this layer.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::DeviceAdapter;
use crate::error::{AppResult, EmitterError};

/// Holding register: supply voltage, 0.1 V per count.
pub const REG_VOLTAGE: u16 = 0x0000;
/// Holding register: supply current, 0.1 A per count.
pub const REG_CURRENT: u16 = 0x0001;
/// Holding register: enclosure temperature, 0.1 °C per count.
pub const REG_TEMPERATURE: u16 = 0x0002;

/// Adapter for devices reached through a Modbus-style register map.
pub struct ModbusAdapter {
    host: String,
    port: u16,
    unit_id: u8,
    connected: bool,
    holding: BTreeMap<u16, u16>,
}

impl ModbusAdapter {
    /// Create a disconnected adapter for the gateway at `host`.
    pub fn new(host: impl Into<String>) -> Self {
        let mut holding = BTreeMap::new();
        holding.insert(REG_VOLTAGE, 2200);
        holding.insert(REG_CURRENT, 15);
        holding.insert(REG_TEMPERATURE, 255);
        Self {
            host: host.into(),
            port: 502,
            unit_id: 1,
            connected: false,
            holding,
        }
    }

    /// Set the gateway TCP port. Default: 502.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the Modbus unit identifier. Default: 1.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Seed a holding register (used by tests and bench setups).
    pub fn with_register(mut self, address: u16, value: u16) -> Self {
        self.holding.insert(address, value);
        self
    }

    fn require_u64(params: &Value, key: &str) -> AppResult<u64> {
        params
            .get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| EmitterError::Protocol(format!("missing '{key}' parameter")))
    }

    fn read_holding(&self, params: &Value) -> AppResult<Value> {
        let address = Self::require_u64(params, "address")? as u16;
        let count = params.get("count").and_then(Value::as_u64).unwrap_or(1) as u16;

        let mut values = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let register = address.checked_add(offset).ok_or_else(|| {
                EmitterError::Protocol("register address out of range".to_string())
            })?;
            let value = self.holding.get(&register).ok_or_else(|| {
                EmitterError::Protocol(format!("illegal data address 0x{register:04x}"))
            })?;
            values.push(*value);
        }
        Ok(json!({ "address": address, "values": values }))
    }

    fn write_holding(&mut self, params: &Value) -> AppResult<Value> {
        let address = Self::require_u64(params, "address")? as u16;
        let value = Self::require_u64(params, "value")?;
        let value = u16::try_from(value)
            .map_err(|_| EmitterError::Protocol(format!("value {value} exceeds 16 bits")))?;
        self.holding.insert(address, value);
        debug!(address, value, "holding register written");
        Ok(json!({ "status": "ok", "address": address }))
    }
}

#[async_trait]
impl DeviceAdapter for ModbusAdapter {
    fn protocol(&self) -> &'static str {
        "modbus"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> AppResult<()> {
        self.connected = true;
        debug!(host = %self.host, port = self.port, unit = self.unit_id, "modbus gateway session open");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn send_command(&mut self, command: &str, params: &Value) -> AppResult<Value> {
        if !self.connected {
            return Err(EmitterError::DeviceNotConnected);
        }
        match command {
            "read_holding" => self.read_holding(params),
            "write_holding" => self.write_holding(params),
            other => Err(EmitterError::Protocol(format!(
                "unsupported function '{other}'"
            ))),
        }
    }

    async fn read_status(&mut self) -> AppResult<Value> {
        if !self.connected {
            return Err(EmitterError::DeviceNotConnected);
        }
        let scaled = |register: u16| {
            self.holding
                .get(&register)
                .map(|raw| f64::from(*raw) * 0.1)
                .unwrap_or(0.0)
        };
        Ok(json!({
            "voltage_v": scaled(REG_VOLTAGE),
            "current_a": scaled(REG_CURRENT),
            "temperature_c": scaled(REG_TEMPERATURE),
        }))
    }
}
