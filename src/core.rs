//! Core types and traits for the emitter control system.
//!
//! This module defines the foundational abstractions shared across the crate:
//!
//! - [`EmitterState`]: the six-state lifecycle of the light source
//! - [`EmissionRequest`]: validated parameters for a single emission
//! - [`Subsystem`]: capability trait implemented by every cooperating unit
//! - [`EmitterStatus`]: read-only snapshot returned by the controller
//!
//! # Thread Safety
//!
//! The [`Subsystem`] trait requires `Send + Sync` so subsystems can be driven
//! from async tasks, including the deferred auto-stop task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AppResult, EmitterError};

// =============================================================================
// Light source lifecycle
// =============================================================================

/// Light source lifecycle state.
///
/// Exactly one state is active per controller instance; transitions happen
/// only through the controller's operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitterState {
    /// Source is fully powered down
    Off,
    /// Powering up, subsystems coming online
    Standby,
    /// Running a calibration cycle
    Calibrating,
    /// Warmed up and able to accept emission requests
    Ready,
    /// Actively emitting light
    Emitting,
    /// A startup or calibration step failed (see logs)
    Error,
}

impl EmitterState {
    /// Lowercase wire/display name for the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmitterState::Off => "off",
            EmitterState::Standby => "standby",
            EmitterState::Calibrating => "calibrating",
            EmitterState::Ready => "ready",
            EmitterState::Emitting => "emitting",
            EmitterState::Error => "error",
        }
    }
}

impl fmt::Display for EmitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output mode for an emission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Continuous,
    Pulsed,
    Burst,
}

// =============================================================================
// Emission request
// =============================================================================

/// Validated parameters for a single emission.
///
/// Constructed fresh per emission attempt and never mutated after validation.
/// A `duration_secs` of `0` means the emission runs until `stop_emission` is
/// called explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmissionRequest {
    /// Requested output power in watts
    pub power_w: f64,
    /// Emission length in seconds (0 = indefinite)
    pub duration_secs: f64,
    /// Pulse repetition frequency in Hz
    pub frequency_hz: f64,
    /// Duty cycle in (0, 1]
    pub duty_cycle: f64,
    /// Output mode
    pub mode: OutputMode,
}

impl EmissionRequest {
    /// Create a continuous, indefinite request at the given power.
    pub fn new(power_w: f64) -> Self {
        Self {
            power_w,
            duration_secs: 0.0,
            frequency_hz: 0.0,
            duty_cycle: 1.0,
            mode: OutputMode::Continuous,
        }
    }

    /// Set the emission length in seconds (0 = indefinite).
    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Set the pulse repetition frequency in Hz.
    pub fn with_frequency(mut self, frequency_hz: f64) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    /// Set the duty cycle, must end up in (0, 1].
    pub fn with_duty_cycle(mut self, duty_cycle: f64) -> Self {
        self.duty_cycle = duty_cycle;
        self
    }

    /// Set the output mode.
    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check the request against the controller's power ceiling.
    ///
    /// Rejections happen before any state mutation, so a failed validation
    /// leaves the controller untouched.
    pub fn validate(&self, max_power_w: f64) -> AppResult<()> {
        if !(self.power_w > 0.0 && self.power_w <= max_power_w) {
            return Err(EmitterError::Validation(format!(
                "power {:.3e} W outside (0, {:.3e}] W",
                self.power_w, max_power_w
            )));
        }
        if !(self.duration_secs >= 0.0) {
            return Err(EmitterError::Validation(format!(
                "duration {} s must be >= 0",
                self.duration_secs
            )));
        }
        if !(self.frequency_hz >= 0.0) {
            return Err(EmitterError::Validation(format!(
                "frequency {} Hz must be >= 0",
                self.frequency_hz
            )));
        }
        if !(self.duty_cycle > 0.0 && self.duty_cycle <= 1.0) {
            return Err(EmitterError::Validation(format!(
                "duty cycle {} outside (0, 1]",
                self.duty_cycle
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Subsystem capability trait
// =============================================================================

/// Free-form health snapshot reported by a subsystem.
pub type SubsystemStatus = Value;

/// Capability trait for the cooperating units of the light source.
///
/// The controller never depends on which concrete variant it holds beyond
/// this surface; wiring a fourth subsystem into the orchestration steps is
/// the only controller change required to add one.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Stable identifier used in logs and error reports.
    fn name(&self) -> &'static str;

    /// Idempotent setup. May be slow; models a physical ramp.
    async fn initialize(&mut self) -> AppResult<()>;

    /// Release/reset. Never fails.
    async fn shutdown(&mut self);

    /// Run the subsystem's calibration cycle.
    async fn calibrate(&mut self) -> AppResult<()>;

    /// Apply emission-specific parameters ahead of an emission.
    async fn configure(&mut self, request: &EmissionRequest) -> AppResult<()>;

    /// Read-only health snapshot.
    fn status(&self) -> SubsystemStatus;
}

// =============================================================================
// Controller status snapshot
// =============================================================================

/// Read-only snapshot of the controller and its subsystems.
#[derive(Clone, Debug, Serialize)]
pub struct EmitterStatus {
    /// Current lifecycle state
    pub state: EmitterState,
    /// Output power in watts (nonzero only while emitting)
    pub current_power_w: f64,
    /// Configured wavelength in meters
    pub wavelength_m: f64,
    /// Cumulative emission time in seconds
    pub operating_time_secs: f64,
    /// Per-subsystem status maps, keyed by subsystem name
    pub subsystems: BTreeMap<String, SubsystemStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_POWER_W: f64 = 5.0e-9;

    #[test]
    fn test_state_display_roundtrip() {
        assert_eq!(EmitterState::Emitting.to_string(), "emitting");
        let json = serde_json::to_string(&EmitterState::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
    }

    #[test]
    fn test_request_defaults() {
        let request = EmissionRequest::new(2.5e-9);
        assert_eq!(request.duration_secs, 0.0);
        assert_eq!(request.duty_cycle, 1.0);
        assert_eq!(request.mode, OutputMode::Continuous);
        assert!(request.validate(MAX_POWER_W).is_ok());
    }

    #[test]
    fn test_request_rejects_power_outside_range() {
        assert!(EmissionRequest::new(0.0).validate(MAX_POWER_W).is_err());
        assert!(EmissionRequest::new(-1.0e-9).validate(MAX_POWER_W).is_err());
        assert!(EmissionRequest::new(6.0e-9).validate(MAX_POWER_W).is_err());
        assert!(EmissionRequest::new(MAX_POWER_W).validate(MAX_POWER_W).is_ok());
    }

    #[test]
    fn test_request_rejects_bad_duty_cycle() {
        let request = EmissionRequest::new(1.0e-9).with_duty_cycle(0.0);
        assert!(request.validate(MAX_POWER_W).is_err());
        let request = EmissionRequest::new(1.0e-9).with_duty_cycle(1.5);
        assert!(request.validate(MAX_POWER_W).is_err());
        let request = EmissionRequest::new(1.0e-9).with_duty_cycle(1.0);
        assert!(request.validate(MAX_POWER_W).is_ok());
    }

    #[test]
    fn test_request_rejects_negative_duration_and_frequency() {
        let request = EmissionRequest::new(1.0e-9).with_duration(-0.5);
        assert!(request.validate(MAX_POWER_W).is_err());
        let request = EmissionRequest::new(1.0e-9).with_frequency(-10.0);
        assert!(request.validate(MAX_POWER_W).is_err());
    }

    #[test]
    fn test_nan_parameters_are_rejected() {
        let request = EmissionRequest::new(f64::NAN);
        assert!(request.validate(MAX_POWER_W).is_err());
        let request = EmissionRequest::new(1.0e-9).with_duty_cycle(f64::NAN);
        assert!(request.validate(MAX_POWER_W).is_err());
    }
}
