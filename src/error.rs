//! Custom error types for the application.
//!
//! This module defines the primary error type, `EmitterError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the control system
//! can hit, from configuration and validation issues to subsystem and device
//! transport problems.
//!
//! ## Error Hierarchy
//!
//! - **`Config` / `Configuration`**: file-level parse errors (wrapped from
//!   `figment`) and semantic errors caught by the validation pass.
//! - **`Validation`**: bad emission or power parameters, rejected before any
//!   state mutation.
//! - **`State`**: an operation that is illegal in the controller's current
//!   state (e.g. `start_emission` while not ready).
//! - **`Subsystem`**: an underlying subsystem initialize/calibrate/configure
//!   call failed.
//! - **`DeviceNotRegistered` / `DeviceNotConnected` / `Transport` /
//!   `Protocol` / `Io`**: device-layer failures. These are scoped to the
//!   device layer and never drive the controller state machine.

use thiserror::Error;

use crate::core::EmitterState;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, EmitterError>;

#[derive(Error, Debug)]
pub enum EmitterError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Invalid emission parameters: {0}")]
    Validation(String),

    #[error("Operation '{operation}' not permitted while {state}")]
    State {
        operation: &'static str,
        state: EmitterState,
    },

    #[error("Subsystem '{subsystem}' failed: {reason}")]
    Subsystem {
        subsystem: &'static str,
        reason: String,
    },

    #[error("Device '{0}' is not registered")]
    DeviceNotRegistered(String),

    #[error("Device not connected")]
    DeviceNotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial support not enabled. Rebuild with --features device_serial")]
    SerialFeatureDisabled,
}
