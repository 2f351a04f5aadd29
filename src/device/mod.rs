//! Device communication layer.
//!
//! A transport-agnostic command/response abstraction over heterogeneous
//! device links, plus the [`DeviceManager`] that registers, connects, and
//! routes commands to named devices. This layer is independent of the
//! emission state machine; transport failures never drive controller state.
//!
//! Each adapter variant encodes its own framing internally; the shared
//! contract is only `connect` / `disconnect` / `send_command` / `read_status`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppResult;

pub mod catalog;
pub mod manager;
pub mod mock;
pub mod modbus;
#[cfg(feature = "device_serial")]
pub mod serial;
pub mod tcp;

pub use catalog::AdapterCatalog;
pub use manager::{DeviceManager, DeviceReport};
pub use mock::MockAdapter;
pub use modbus::ModbusAdapter;
#[cfg(feature = "device_serial")]
pub use serial::SerialLineAdapter;
pub use tcp::TcpAdapter;

/// Command/response contract implemented by every device transport.
///
/// `send_command` on a disconnected adapter must return
/// [`crate::error::EmitterError::DeviceNotConnected`] before attempting any
/// I/O.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Short transport identifier ("tcp", "serial", "modbus", "mock").
    fn protocol(&self) -> &'static str;

    /// Whether the transport link is currently established.
    fn is_connected(&self) -> bool;

    /// Establish the transport link.
    async fn connect(&mut self) -> AppResult<()>;

    /// Tear the link down. Idempotent, never fails.
    async fn disconnect(&mut self);

    /// Send a named command with JSON parameters, returning the device's
    /// JSON response.
    async fn send_command(&mut self, command: &str, params: &Value) -> AppResult<Value>;

    /// Read the device's health snapshot.
    async fn read_status(&mut self) -> AppResult<Value>;
}
