//! End-to-end tests for the emitter state machine: startup, emission,
//! auto-stop, calibration aggregation, and shutdown convergence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_test::traced_test;

use euv_emitter::subsystem::{ParticleSource, PerformanceMonitor, PowerOptimizer};
use euv_emitter::{
    EmissionRequest, EmitterConfig, EmitterController, EmitterError, EmitterEvent, EmitterState,
    EventKind, Subsystem,
};

const MAX_POWER_W: f64 = 5.0e-9;

fn fast_config() -> EmitterConfig {
    EmitterConfig {
        wavelength_m: 5.8e-9,
        max_power_w: MAX_POWER_W,
        stability_target: 0.01,
        warmup_secs: 0.02,
        calibration_interval_secs: 3600.0,
    }
}

struct Harness {
    controller: EmitterController,
    particle_source: ParticleSource,
    optimizer: PowerOptimizer,
    monitor: PerformanceMonitor,
}

fn harness() -> Harness {
    let particle_source = ParticleSource::new().with_latency(Duration::ZERO);
    let optimizer = PowerOptimizer::new().with_latency(Duration::ZERO);
    let monitor = PerformanceMonitor::new().with_latency(Duration::ZERO);
    let controller = EmitterController::with_subsystems(
        fast_config(),
        particle_source.clone(),
        optimizer.clone(),
        monitor.clone(),
    )
    .unwrap();
    Harness {
        controller,
        particle_source,
        optimizer,
        monitor,
    }
}

/// Collect state-change pairs for assertions.
fn track_states(controller: &EmitterController) -> Arc<Mutex<Vec<(EmitterState, EmitterState)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.subscribe(
        EventKind::StateChange,
        Box::new(move |event| {
            if let EmitterEvent::StateChange { old, new, .. } = event {
                sink.lock().unwrap().push((*old, *new));
            }
            Ok(())
        }),
    );
    seen
}

/// Collect power-update payloads for assertions.
fn track_power(controller: &EmitterController) -> Arc<Mutex<Vec<f64>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.subscribe(
        EventKind::PowerUpdate,
        Box::new(move |event| {
            if let EmitterEvent::PowerUpdate { power_w } = event {
                sink.lock().unwrap().push(*power_w);
            }
            Ok(())
        }),
    );
    seen
}

#[tokio::test]
async fn test_power_on_reaches_ready_through_standby() {
    let h = harness();
    let states = track_states(&h.controller);

    h.controller.power_on().await.unwrap();
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            (EmitterState::Off, EmitterState::Standby),
            (EmitterState::Standby, EmitterState::Ready),
        ]
    );
    // Subsystems actually came up
    assert_eq!(h.particle_source.status()["status"], "ready");
}

#[tokio::test]
async fn test_power_on_twice_is_rejected() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    let result = h.controller.power_on().await;
    assert!(matches!(result, Err(EmitterError::State { .. })));
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);
}

#[tokio::test]
async fn test_failed_startup_lands_in_error_and_recovers() {
    let h = harness();
    h.particle_source.inject_next_failure();

    assert!(h.controller.power_on().await.is_err());
    assert_eq!(h.controller.status().await.state, EmitterState::Error);

    // A fresh power_on is the recovery path out of Error.
    h.controller.power_on().await.unwrap();
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);
}

#[tokio::test]
async fn test_timed_emission_stops_automatically() {
    let h = harness();
    h.controller.power_on().await.unwrap();

    h.controller
        .start_emission(EmissionRequest::new(3.0e-9).with_duration(0.2))
        .await
        .unwrap();

    let status = h.controller.status().await;
    assert_eq!(status.state, EmitterState::Emitting);
    assert_eq!(status.current_power_w, 3.0e-9);
    assert!(h.optimizer.is_active());
    assert!(h.monitor.is_active());

    tokio::time::sleep(Duration::from_millis(350)).await;

    let status = h.controller.status().await;
    assert_eq!(status.state, EmitterState::Ready);
    assert_eq!(status.current_power_w, 0.0);
    assert!(!h.optimizer.is_active());
    assert!(!h.monitor.is_active());
    assert!(status.operating_time_secs > 0.0);
}

#[tokio::test]
async fn test_overrange_request_is_rejected_without_transition() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    let states = track_states(&h.controller);

    let result = h
        .controller
        .start_emission(EmissionRequest::new(6.0e-9).with_duration(1.0))
        .await;
    assert!(matches!(result, Err(EmitterError::Validation(_))));
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);
    assert!(states.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_emission_requires_ready() {
    let h = harness();
    let result = h
        .controller
        .start_emission(EmissionRequest::new(1.0e-9))
        .await;
    assert!(matches!(
        result,
        Err(EmitterError::State {
            state: EmitterState::Off,
            ..
        })
    ));
    assert_eq!(h.controller.status().await.state, EmitterState::Off);
}

#[tokio::test]
async fn test_configure_failure_is_a_failed_start() {
    let h = harness();
    h.controller.power_on().await.unwrap();

    h.monitor.inject_next_failure();
    let result = h
        .controller
        .start_emission(EmissionRequest::new(1.0e-9))
        .await;
    assert!(matches!(result, Err(EmitterError::Subsystem { .. })));
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);

    // The injected fault is consumed; the next attempt goes through.
    h.controller
        .start_emission(EmissionRequest::new(1.0e-9))
        .await
        .unwrap();
    assert_eq!(h.controller.status().await.state, EmitterState::Emitting);
}

#[tokio::test]
async fn test_set_power_publishes_exactly_one_update() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    h.controller
        .start_emission(EmissionRequest::new(2.0e-9))
        .await
        .unwrap();
    let updates = track_power(&h.controller);

    h.controller.set_power(4.0e-9).await.unwrap();
    assert_eq!(h.controller.status().await.current_power_w, 4.0e-9);
    assert_eq!(*updates.lock().unwrap(), vec![4.0e-9]);
}

#[tokio::test]
async fn test_set_power_out_of_range_changes_nothing() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    h.controller
        .start_emission(EmissionRequest::new(2.0e-9))
        .await
        .unwrap();
    let updates = track_power(&h.controller);

    assert!(h.controller.set_power(9.0e-9).await.is_err());
    assert!(h.controller.set_power(0.0).await.is_err());
    assert_eq!(h.controller.status().await.current_power_w, 2.0e-9);
    assert!(updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_set_power_requires_emitting() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    let updates = track_power(&h.controller);

    let result = h.controller.set_power(1.0e-9).await;
    assert!(matches!(result, Err(EmitterError::State { .. })));
    assert_eq!(h.controller.status().await.current_power_w, 0.0);
    assert!(updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_manual_stop_cancels_pending_auto_stop() {
    let h = harness();
    h.controller.power_on().await.unwrap();

    // First emission would auto-stop at t=200ms.
    h.controller
        .start_emission(EmissionRequest::new(2.0e-9).with_duration(0.2))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.controller.stop_emission().await;
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);

    // Second, indefinite emission. A stale timer from the first one would
    // kill it around t=200ms.
    h.controller
        .start_emission(EmissionRequest::new(2.0e-9))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.controller.status().await.state, EmitterState::Emitting);

    h.controller.stop_emission().await;
}

#[tokio::test]
async fn test_stop_emission_is_a_noop_when_not_emitting() {
    let h = harness();
    let states = track_states(&h.controller);
    h.controller.stop_emission().await;
    assert_eq!(h.controller.status().await.state, EmitterState::Off);
    assert!(states.lock().unwrap().is_empty());
}

#[traced_test]
#[tokio::test]
async fn test_calibration_failure_drives_error_state() {
    let h = harness();
    h.controller.power_on().await.unwrap();

    h.optimizer.inject_next_failure();
    let result = h.controller.calibrate().await;
    assert!(matches!(result, Err(EmitterError::Subsystem { .. })));
    assert_eq!(h.controller.status().await.state, EmitterState::Error);
    assert!(logs_contain("calibration failed"));

    // Calibrate is also a recovery path out of Error.
    h.controller.calibrate().await.unwrap();
    assert_eq!(h.controller.status().await.state, EmitterState::Ready);
}

#[tokio::test]
async fn test_calibration_success_returns_to_ready() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    let states = track_states(&h.controller);

    h.controller.calibrate().await.unwrap();
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            (EmitterState::Ready, EmitterState::Calibrating),
            (EmitterState::Calibrating, EmitterState::Ready),
        ]
    );
    // Calibration reached all three subsystems
    assert_eq!(h.particle_source.status()["uniformity"], 0.98);
    assert_eq!(h.optimizer.status()["stability"], 0.995);
}

#[tokio::test]
async fn test_power_off_converges_from_every_state() {
    // From Off: stays Off, silently.
    let h = harness();
    let states = track_states(&h.controller);
    h.controller.power_off().await;
    assert_eq!(h.controller.status().await.state, EmitterState::Off);
    assert!(states.lock().unwrap().is_empty());

    // From Ready.
    let h = harness();
    h.controller.power_on().await.unwrap();
    h.controller.power_off().await;
    assert_eq!(h.controller.status().await.state, EmitterState::Off);

    // From Error.
    let h = harness();
    h.particle_source.inject_next_failure();
    let _ = h.controller.power_on().await;
    h.controller.power_off().await;
    assert_eq!(h.controller.status().await.state, EmitterState::Off);
}

#[tokio::test]
async fn test_power_off_while_emitting_stops_first() {
    let h = harness();
    h.controller.power_on().await.unwrap();
    h.controller
        .start_emission(EmissionRequest::new(2.0e-9).with_duration(5.0))
        .await
        .unwrap();

    h.controller.power_off().await;
    let status = h.controller.status().await;
    assert_eq!(status.state, EmitterState::Off);
    assert_eq!(status.current_power_w, 0.0);
    assert!(!h.optimizer.is_active());
    assert_eq!(h.particle_source.status()["status"], "off");

    // The cancelled auto-stop timer must not resurface later.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.controller.status().await.state, EmitterState::Off);
}

#[tokio::test]
async fn test_status_snapshot_fields() {
    let h = harness();
    h.controller.power_on().await.unwrap();

    let status = h.controller.status().await;
    assert_eq!(status.wavelength_m, 5.8e-9);
    assert_eq!(status.current_power_w, 0.0);
    assert_eq!(status.operating_time_secs, 0.0);
    assert_eq!(status.subsystems.len(), 3);
    assert!(status.subsystems.contains_key("particle_source"));
    assert!(status.subsystems.contains_key("optimizer"));
    assert!(status.subsystems.contains_key("monitor"));
    assert_eq!(
        status.subsystems["monitor"]["metrics"]["conversion_efficiency"],
        1.35
    );
}

#[tokio::test]
async fn test_operating_time_accumulates_across_emissions() {
    let h = harness();
    h.controller.power_on().await.unwrap();

    for _ in 0..2 {
        h.controller
            .start_emission(EmissionRequest::new(1.0e-9))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.controller.stop_emission().await;
    }

    let status = h.controller.status().await;
    assert!(status.operating_time_secs >= 0.1);
    assert_eq!(status.state, EmitterState::Ready);
}

#[tokio::test]
async fn test_unsubscribe_silences_handler() {
    let h = harness();
    let states = track_states(&h.controller);
    let counter = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&counter);
    let id = h.controller.subscribe(
        EventKind::StateChange,
        Box::new(move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        }),
    );

    assert!(h.controller.unsubscribe(id));
    h.controller.power_on().await.unwrap();
    assert_eq!(*counter.lock().unwrap(), 0);
    // The remaining subscriber still saw both transitions.
    assert_eq!(states.lock().unwrap().len(), 2);
}
