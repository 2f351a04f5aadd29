//! Power-optimization loop: tracks the output setpoint while emitting.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{EmissionRequest, Subsystem, SubsystemStatus};
use crate::error::{AppResult, EmitterError};

const SUBSYSTEM_NAME: &str = "optimizer";

struct LoopState {
    current_power_w: f64,
    stability: f64,
}

struct Inner {
    active: AtomicBool,
    state: Mutex<LoopState>,
    latency: Mutex<Duration>,
    fail_next: AtomicBool,
}

/// Simulated power-optimization loop.
///
/// Beyond the common [`Subsystem`] surface it exposes the role-specific
/// operations the controller drives directly: the real-time optimization
/// loop, setpoint adjustment, and the warm-up ramp preparation.
#[derive(Clone)]
pub struct PowerOptimizer {
    inner: Arc<Inner>,
}

impl Default for PowerOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerOptimizer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                active: AtomicBool::new(false),
                state: Mutex::new(LoopState {
                    current_power_w: 0.0,
                    stability: 0.99,
                }),
                latency: Mutex::new(Duration::from_millis(300)),
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    /// Set the simulated latency for slow operations.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.lock_latency() = latency;
        self
    }

    /// Trip a failure on the next fallible operation.
    pub fn inject_next_failure(&self) {
        self.inner.fail_next.store(true, Ordering::SeqCst);
    }

    /// Whether the real-time loop is running.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Start the real-time optimization loop.
    pub async fn start_optimization(&mut self) {
        self.inner.active.store(true, Ordering::SeqCst);
        info!("real-time optimization started");
    }

    /// Stop the real-time optimization loop. Idempotent.
    pub async fn stop_optimization(&mut self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("real-time optimization stopped");
        }
    }

    /// Move the loop to a new power setpoint.
    pub async fn adjust_power(&mut self, power_w: f64) -> AppResult<()> {
        self.check_failure()?;
        let mut state = self.lock_state();
        debug!(
            from_w = state.current_power_w,
            to_w = power_w,
            "adjusting power setpoint"
        );
        state.current_power_w = power_w;
        Ok(())
    }

    /// Pre-position the loop for an upcoming power level (warm-up ramp).
    pub async fn prepare_for_power(&mut self, power_w: f64) {
        debug!(target_w = power_w, "preparing for power level");
    }

    fn check_failure(&self) -> AppResult<()> {
        if self.inner.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EmitterError::Subsystem {
                subsystem: SUBSYSTEM_NAME,
                reason: "injected fault".to_string(),
            });
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let latency = *self.lock_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn lock_latency(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.inner
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Subsystem for PowerOptimizer {
    fn name(&self) -> &'static str {
        SUBSYSTEM_NAME
    }

    async fn initialize(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.check_failure()?;
        info!("optimizer warmed up");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.inner.active.store(false, Ordering::SeqCst);
        info!("optimizer shut down");
    }

    async fn calibrate(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.check_failure()?;
        let mut state = self.lock_state();
        state.stability = 0.995;
        info!(stability = state.stability, "optimizer calibrated");
        Ok(())
    }

    async fn configure(&mut self, request: &EmissionRequest) -> AppResult<()> {
        self.check_failure()?;
        debug!(
            frequency_hz = request.frequency_hz,
            duty_cycle = request.duty_cycle,
            "optimization loop configured"
        );
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        let state = self.lock_state();
        json!({
            "optimization_active": self.is_active(),
            "current_power_w": state.current_power_w,
            "stability": state.stability,
        })
    }
}
