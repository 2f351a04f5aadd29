//! Performance monitor: tracks stability, conversion efficiency, and
//! temperature while the source is emitting.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{EmissionRequest, Subsystem, SubsystemStatus};
use crate::error::{AppResult, EmitterError};

const SUBSYSTEM_NAME: &str = "monitor";

struct Metrics {
    stability: f64,
    conversion_efficiency: f64,
    temperature_c: f64,
}

struct Inner {
    active: AtomicBool,
    metrics: Mutex<Metrics>,
    latency: Mutex<Duration>,
    fail_next: AtomicBool,
}

/// Simulated performance monitor.
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<Inner>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                active: AtomicBool::new(false),
                metrics: Mutex::new(Metrics {
                    stability: 0.99,
                    conversion_efficiency: 1.35,
                    temperature_c: 25.0,
                }),
                latency: Mutex::new(Duration::from_millis(200)),
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

    /// Whether power monitoring is running.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Start power monitoring for an emission.
    pub async fn start_monitoring(&mut self) {
        self.inner.active.store(true, Ordering::SeqCst);
        info!("power monitoring started");
    }

    /// Stop power monitoring. Idempotent.
    pub async fn stop_monitoring(&mut self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            info!("power monitoring stopped");
        }
    }

    /// Snapshot of the current performance metrics.
    pub fn current_metrics(&self) -> Value {
        let metrics = self.lock_metrics();
        json!({
            "stability": metrics.stability,
            "conversion_efficiency": metrics.conversion_efficiency,
            "temperature_c": metrics.temperature_c,
        })
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

    fn lock_metrics(&self) -> std::sync::MutexGuard<'_, Metrics> {
        self.inner
            .metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Subsystem for PerformanceMonitor {
    fn name(&self) -> &'static str {
        SUBSYSTEM_NAME
    }

    async fn initialize(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.check_failure()?;
        info!("performance sensors online");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.inner.active.store(false, Ordering::SeqCst);
        info!("performance monitor shut down");
    }

    async fn calibrate(&mut self) -> AppResult<()> {
        self.simulate_latency().await;
        self.check_failure()?;
        info!("performance sensors calibrated");
        Ok(())
    }

    async fn configure(&mut self, request: &EmissionRequest) -> AppResult<()> {
        self.check_failure()?;
        debug!(
            duration_secs = request.duration_secs,
            "monitoring window configured"
        );
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        json!({
            "monitoring_active": self.is_active(),
            "metrics": self.current_metrics(),
        })
    }
}
