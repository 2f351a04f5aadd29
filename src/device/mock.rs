//! Mock device adapter for testing.
//!
//! Provides a simulated transport for exercising the device manager without
//! physical hardware: simulated latency, controllable failure injection, and
//! call logging for test verification.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::DeviceAdapter;
use crate::error::{AppResult, EmitterError};

/// Mock transport adapter.
///
/// Clones share state, so a test can hand a boxed clone to the manager and
/// keep the original as a probe.
#[derive(Clone)]
pub struct MockAdapter {
    connected: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
    should_fail_next: Arc<AtomicBool>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// Create a disconnected mock adapter with no latency.
    pub fn new() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            should_fail_next: Arc::new(AtomicBool::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the simulated per-operation latency.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.lock_latency() = latency;
        self
    }

    /// Inject a failure for the next operation.
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Set the connection state directly.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Get the call log.
    pub fn call_log(&self) -> Vec<String> {
        self.lock_log().clone()
    }

    /// Clear the call log.
    pub fn clear_log(&self) {
        self.lock_log().clear();
    }

    fn check_failure(&self) -> AppResult<()> {
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(EmitterError::Transport("injected failure".to_string()));
        }
        Ok(())
    }

    fn log_call(&self, call: String) {
        self.lock_log().push(call);
    }

    async fn simulate_latency(&self) {
        let latency = *self.lock_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn lock_latency(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.call_log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DeviceAdapter for MockAdapter {
    fn protocol(&self) -> &'static str {
        "mock"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.log_call("connect".to_string());
        self.check_failure()?;
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.log_call("disconnect".to_string());
        self.set_connected(false);
    }

    async fn send_command(&mut self, command: &str, params: &Value) -> AppResult<Value> {
        self.log_call(format!("send_command: {command}"));
        if !self.is_connected() {
            return Err(EmitterError::DeviceNotConnected);
        }
        self.simulate_latency().await;
        self.check_failure()?;
        Ok(json!({
            "status": "ok",
            "command": command,
            "parameters": params,
        }))
    }

    async fn read_status(&mut self) -> AppResult<Value> {
        self.log_call("read_status".to_string());
        if !self.is_connected() {
            return Err(EmitterError::DeviceNotConnected);
        }
        self.simulate_latency().await;
        self.check_failure()?;
        Ok(json!({ "protocol": "mock", "healthy": true }))
    }
}
