//! Control library for a simulated pulsed EUV-class light source.
//!
//! This library contains the emitter state machine, the subsystem
//! implementations it orchestrates, the event bus its callers subscribe to,
//! and the device communication layer used by the surrounding production
//! system. It is used by the `euv-emitter` operator binary and by
//! integration tests.
//!
//! # Architecture Overview
//!
//! - [`controller::EmitterController`]: lifecycle state machine and
//!   subsystem orchestration
//! - [`core::Subsystem`]: capability trait for the particle source, power
//!   optimizer, and performance monitor
//! - [`events::EventBus`]: ordered, isolated-failure notification fan-out
//! - [`device::DeviceManager`]: registry and router over transport-specific
//!   adapters

pub mod config;
pub mod controller;
pub mod core;
pub mod device;
pub mod error;
pub mod events;
pub mod subsystem;

// Re-exports for convenience
pub use crate::config::{EmitterConfig, Settings};
pub use crate::controller::EmitterController;
pub use crate::core::{EmissionRequest, EmitterState, EmitterStatus, OutputMode, Subsystem};
pub use crate::device::{DeviceAdapter, DeviceManager};
pub use crate::error::{AppResult, EmitterError};
pub use crate::events::{EmitterEvent, EventBus, EventKind, SubscriptionId};
