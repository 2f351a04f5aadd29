//! Light source controller and state machine.
//!
//! [`EmitterController`] orchestrates the three subsystems against the
//! lifecycle state machine, validates emission requests, applies the timed
//! auto-stop, and publishes state/power change notifications on the event
//! bus.
//!
//! # State machine
//!
//! ```text
//! Off ──power_on──▶ Standby ──warm-up──▶ Ready ──start_emission──▶ Emitting
//!  ▲                    │                  │ ▲                        │
//!  │                    ▼                  ▼ │                        │
//!  └──power_off── [any] Error ◀──failure── Calibrating   stop/timer ──┘
//! ```
//!
//! # Concurrency
//!
//! All state-mutating operations serialize on one internal async mutex. The
//! deferred auto-stop runs as a spawned task that takes the same mutex, so a
//! fired timer can never interleave with a manual stop. Events are collected
//! under the lock and delivered after it is released, in operation order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EmitterConfig;
use crate::core::{EmissionRequest, EmitterState, EmitterStatus, Subsystem};
use crate::error::{AppResult, EmitterError};
use crate::events::{EmitterEvent, EventBus, EventHandler, EventKind, SubscriptionId};
use crate::subsystem::{ParticleSource, PerformanceMonitor, PowerOptimizer};

/// Warm-up ramp: (fraction of max power, share of the configured warm-up time)
/// for each hold step.
const WARMUP_RAMP: [(f64, f64); 4] = [(0.10, 0.2), (0.30, 0.3), (0.60, 0.3), (0.80, 0.2)];

struct Inner {
    state: EmitterState,
    current_power_w: f64,
    operating_secs: f64,
    emitting_since: Option<Instant>,
    /// Incremented on every accepted emission; lets a stale auto-stop timer
    /// detect that a newer emission has started.
    emission_epoch: u64,
    auto_stop: Option<JoinHandle<()>>,
    particle_source: ParticleSource,
    optimizer: PowerOptimizer,
    monitor: PerformanceMonitor,
}

/// Main controller for the pulsed light source.
///
/// Owns the configuration, the three subsystems, and the event bus. Created
/// in `Off`; callers should drive it back to `Off` with
/// [`EmitterController::power_off`] before dropping it.
pub struct EmitterController {
    config: EmitterConfig,
    events: EventBus,
    inner: Arc<Mutex<Inner>>,
}

impl EmitterController {
    /// Create a controller with freshly built subsystems.
    pub fn new(config: EmitterConfig) -> AppResult<Self> {
        Self::with_subsystems(
            config,
            ParticleSource::new(),
            PowerOptimizer::new(),
            PerformanceMonitor::new(),
        )
    }

    /// Create a controller around caller-built subsystems (used by tests to
    /// keep probe handles and tune simulated latencies).
    pub fn with_subsystems(
        config: EmitterConfig,
        particle_source: ParticleSource,
        optimizer: PowerOptimizer,
        monitor: PerformanceMonitor,
    ) -> AppResult<Self> {
        config.validate()?;
        info!(
            wavelength_m = config.wavelength_m,
            max_power_w = config.max_power_w,
            "emitter controller created"
        );
        Ok(Self {
            config,
            events: EventBus::new(),
            inner: Arc::new(Mutex::new(Inner {
                state: EmitterState::Off,
                current_power_w: 0.0,
                operating_secs: 0.0,
                emitting_since: None,
                emission_epoch: 0,
                auto_stop: None,
                particle_source,
                optimizer,
                monitor,
            })),
        })
    }

    /// The immutable configuration this controller was built with.
    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Register a handler for controller notifications.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        self.events.subscribe(kind, handler)
    }

    /// Remove a previously registered handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Power the source on: initialize the particle source, warm up the
    /// optimizer, and run the warm-up ramp.
    ///
    /// Permitted from `Off` (and from `Error`, as the recovery path). Any
    /// failure during the sequence drives the machine to `Error`; a fresh
    /// `power_on` or `calibrate` is required to leave it.
    pub async fn power_on(&self) -> AppResult<()> {
        let mut guard = self.inner.lock().await;
        if !matches!(guard.state, EmitterState::Off | EmitterState::Error) {
            return Err(EmitterError::State {
                operation: "power_on",
                state: guard.state,
            });
        }

        let mut pending = Vec::new();
        let inner = &mut *guard;
        transition(inner, EmitterState::Standby, &mut pending);

        let outcome = startup_sequence(inner, &self.config).await;
        match &outcome {
            Ok(()) => {
                transition(inner, EmitterState::Ready, &mut pending);
                info!("light source ready");
            }
            Err(err) => {
                error!(%err, "power-on sequence failed");
                transition(inner, EmitterState::Error, &mut pending);
            }
        }

        drop(guard);
        self.flush(&pending);
        outcome
    }

    /// Drive the source back to `Off`. Idempotent and infallible: a running
    /// emission is stopped first, then the optimizer and the particle source
    /// are shut down in that order.
    pub async fn power_off(&self) {
        let mut pending = Vec::new();
        {
            let mut guard = self.inner.lock().await;
            if let Some(handle) = guard.auto_stop.take() {
                handle.abort();
            }
            let inner = &mut *guard;
            stop_emission_locked(inner, &mut pending).await;
            inner.optimizer.shutdown().await;
            inner.particle_source.shutdown().await;
            transition(inner, EmitterState::Off, &mut pending);
            inner.current_power_w = 0.0;
        }
        self.flush(&pending);
        info!("light source powered off");
    }

    /// Run calibration on all three subsystems and aggregate the result.
    ///
    /// All three calibrations are attempted; success requires all of them.
    /// On success the machine lands in `Ready`, on any failure in `Error`.
    /// A running emission is stopped before calibrating.
    pub async fn calibrate(&self) -> AppResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(handle) = guard.auto_stop.take() {
            handle.abort();
        }

        let mut pending = Vec::new();
        let inner = &mut *guard;
        stop_emission_locked(inner, &mut pending).await;
        transition(inner, EmitterState::Calibrating, &mut pending);

        let mut outcome: AppResult<()> = Ok(());
        let subsystems: [&mut dyn Subsystem; 3] = [
            &mut inner.particle_source,
            &mut inner.optimizer,
            &mut inner.monitor,
        ];
        for subsystem in subsystems {
            if let Err(err) = subsystem.calibrate().await {
                error!(subsystem = subsystem.name(), %err, "calibration failed");
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }

        match &outcome {
            Ok(()) => {
                transition(inner, EmitterState::Ready, &mut pending);
                info!("system calibration complete");
            }
            Err(_) => transition(inner, EmitterState::Error, &mut pending),
        }

        drop(guard);
        self.flush(&pending);
        outcome
    }

    /// Start an emission.
    ///
    /// Rejected without a state change unless the source is `Ready` and the
    /// request passes validation. Configures all three subsystems, starts the
    /// optimization loop and the monitor, and, for `duration_secs > 0`,
    /// schedules a cancellable auto-stop.
    pub async fn start_emission(&self, request: EmissionRequest) -> AppResult<()> {
        let mut guard = self.inner.lock().await;
        if guard.state != EmitterState::Ready {
            return Err(EmitterError::State {
                operation: "start_emission",
                state: guard.state,
            });
        }
        request.validate(self.config.max_power_w)?;

        let mut pending = Vec::new();
        let inner = &mut *guard;

        // A configure failure is a failed start, not a state transition.
        let subsystems: [&mut dyn Subsystem; 3] = [
            &mut inner.particle_source,
            &mut inner.optimizer,
            &mut inner.monitor,
        ];
        for subsystem in subsystems {
            subsystem.configure(&request).await?;
        }

        inner.optimizer.start_optimization().await;
        transition(inner, EmitterState::Emitting, &mut pending);
        inner.current_power_w = request.power_w;
        inner.emitting_since = Some(Instant::now());
        inner.emission_epoch += 1;
        inner.monitor.start_monitoring().await;

        if request.duration_secs > 0.0 {
            let epoch = inner.emission_epoch;
            let duration = Duration::from_secs_f64(request.duration_secs);
            let inner_arc = Arc::clone(&self.inner);
            let events = self.events.clone();
            inner.auto_stop = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                auto_stop(inner_arc, events, epoch).await;
            }));
        }

        info!(
            power_w = request.power_w,
            duration_secs = request.duration_secs,
            "emission started"
        );
        drop(guard);
        self.flush(&pending);
        Ok(())
    }

    /// Stop a running emission. No-op unless the source is `Emitting`.
    /// Cancels any pending auto-stop.
    pub async fn stop_emission(&self) {
        let mut pending = Vec::new();
        {
            let mut guard = self.inner.lock().await;
            if let Some(handle) = guard.auto_stop.take() {
                handle.abort();
            }
            let inner = &mut *guard;
            stop_emission_locked(inner, &mut pending).await;
        }
        self.flush(&pending);
    }

    /// Change the output power while emitting.
    ///
    /// Rejected (no state change, no event) unless the source is `Emitting`
    /// and the power is in `(0, max_power]`. On success publishes exactly one
    /// power-update event.
    pub async fn set_power(&self, power_w: f64) -> AppResult<()> {
        let mut guard = self.inner.lock().await;
        if guard.state != EmitterState::Emitting {
            return Err(EmitterError::State {
                operation: "set_power",
                state: guard.state,
            });
        }
        if !(power_w > 0.0 && power_w <= self.config.max_power_w) {
            return Err(EmitterError::Validation(format!(
                "power {:.3e} W outside (0, {:.3e}] W",
                power_w, self.config.max_power_w
            )));
        }

        guard.optimizer.adjust_power(power_w).await?;
        guard.current_power_w = power_w;
        drop(guard);

        self.events.publish(&EmitterEvent::PowerUpdate { power_w });
        info!(power_w, "output power adjusted");
        Ok(())
    }

    /// Read-only snapshot of the controller and its subsystems.
    pub async fn status(&self) -> EmitterStatus {
        let guard = self.inner.lock().await;
        let mut operating_time_secs = guard.operating_secs;
        if let Some(started) = guard.emitting_since {
            operating_time_secs += started.elapsed().as_secs_f64();
        }

        let mut subsystems = BTreeMap::new();
        for subsystem in [
            &guard.particle_source as &dyn Subsystem,
            &guard.optimizer,
            &guard.monitor,
        ] {
            subsystems.insert(subsystem.name().to_string(), subsystem.status());
        }

        EmitterStatus {
            state: guard.state,
            current_power_w: guard.current_power_w,
            wavelength_m: self.config.wavelength_m,
            operating_time_secs,
            subsystems,
        }
    }

    fn flush(&self, pending: &[EmitterEvent]) {
        for event in pending {
            self.events.publish(event);
        }
    }
}

/// Record a state transition and queue its notification. No-op when the
/// state is unchanged, which keeps `power_off` silent once already `Off`.
fn transition(inner: &mut Inner, new: EmitterState, pending: &mut Vec<EmitterEvent>) {
    if inner.state == new {
        return;
    }
    let old = inner.state;
    inner.state = new;
    info!(%old, %new, "state transition");
    pending.push(EmitterEvent::StateChange {
        old,
        new,
        timestamp: Utc::now(),
    });
}

/// Subsystem bring-up and warm-up ramp, run with the state lock held.
async fn startup_sequence(inner: &mut Inner, config: &EmitterConfig) -> AppResult<()> {
    inner.particle_source.initialize().await?;
    inner.optimizer.initialize().await?;

    for (fraction, share) in WARMUP_RAMP {
        let target_w = config.max_power_w * fraction;
        inner.optimizer.prepare_for_power(target_w).await;
        tokio::time::sleep(Duration::from_secs_f64(config.warmup_secs * share)).await;
    }
    Ok(())
}

/// Stop path shared by manual stop, the auto-stop timer, `calibrate`, and
/// `power_off`. Must be called with the state lock held.
async fn stop_emission_locked(inner: &mut Inner, pending: &mut Vec<EmitterEvent>) {
    if inner.state != EmitterState::Emitting {
        return;
    }
    inner.optimizer.stop_optimization().await;
    inner.monitor.stop_monitoring().await;
    if let Some(started) = inner.emitting_since.take() {
        inner.operating_secs += started.elapsed().as_secs_f64();
    }
    transition(inner, EmitterState::Ready, pending);
    inner.current_power_w = 0.0;
    info!("emission stopped");
}

/// Deferred auto-stop body. The epoch check makes a timer that lost the race
/// against a manual stop (or a newer emission) a no-op.
async fn auto_stop(inner_arc: Arc<Mutex<Inner>>, events: EventBus, epoch: u64) {
    let mut pending = Vec::new();
    {
        let mut guard = inner_arc.lock().await;
        if guard.emission_epoch != epoch || guard.state != EmitterState::Emitting {
            warn!(epoch, "auto-stop timer expired for a superseded emission");
            return;
        }
        guard.auto_stop = None;
        let inner = &mut *guard;
        stop_emission_locked(inner, &mut pending).await;
    }
    for event in &pending {
        events.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_ramp_shape() {
        // Monotonic power fractions below full power, shares summing to one.
        let mut last = 0.0;
        for (fraction, _) in WARMUP_RAMP {
            assert!(fraction > last && fraction < 1.0);
            last = fraction;
        }
        let total: f64 = WARMUP_RAMP.iter().map(|(_, share)| share).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EmitterConfig {
            max_power_w: 0.0,
            ..EmitterConfig::default()
        };
        assert!(EmitterController::new(config).is_err());
    }
}
