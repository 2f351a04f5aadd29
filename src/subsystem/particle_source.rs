//! Particle jet source: dispenses the droplet capsules the emitter fires on.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{EmissionRequest, Subsystem, SubsystemStatus};
use crate::error::{AppResult, EmitterError};

const SUBSYSTEM_NAME: &str = "particle_source";

/// Capsules loaded into the reservoir by a full initialization.
const RESERVOIR_CAPSULES: u32 = 5_000;

struct JetState {
    status: &'static str,
    capsule_count: u32,
    uniformity: f64,
}

struct Inner {
    state: Mutex<JetState>,
    latency: Mutex<Duration>,
    fail_next: AtomicBool,
}

/// Simulated particle jet source.
///
/// Clones share state, which lets tests keep a probe handle on a subsystem
/// after handing it to the controller.
#[derive(Clone)]
pub struct ParticleSource {
    inner: Arc<Inner>,
}

impl Default for ParticleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(JetState {
                    status: "initialized",
                    capsule_count: 0,
                    uniformity: 0.95,
                }),
                latency: Mutex::new(Duration::from_millis(500)),
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

    fn lock_state(&self) -> std::sync::MutexGuard<'_, JetState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Subsystem for ParticleSource {
    fn name(&self) -> &'static str {
        SUBSYSTEM_NAME
    }

    async fn initialize(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.check_failure()?;
        let mut state = self.lock_state();
        state.status = "ready";
        state.capsule_count = RESERVOIR_CAPSULES;
        info!(capsules = state.capsule_count, "particle source ready");
        Ok(())
    }

    async fn shutdown(&mut self) {
        let mut state = self.lock_state();
        state.status = "off";
        state.capsule_count = 0;
        info!("particle source shut down");
    }

    async fn calibrate(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.check_failure()?;
        let mut state = self.lock_state();
        state.uniformity = 0.98;
        info!(uniformity = state.uniformity, "particle jet calibrated");
        Ok(())
    }

    async fn configure(&mut self, request: &EmissionRequest) -> AppResult<()> {
        self.check_failure()?;
        debug!(
            power_w = request.power_w,
            mode = ?request.mode,
            "jet configured for emission"
        );
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        let state = self.lock_state();
        json!({
            "status": state.status,
            "capsule_count": state.capsule_count,
            "uniformity": state.uniformity,
        })
    }
}
