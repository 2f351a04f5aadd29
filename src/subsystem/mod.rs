//! Subsystem implementations for the light source.
//!
//! Each variant implements the [`crate::core::Subsystem`] capability trait
//! and is independently initializable, calibratable, and configurable per
//! emission. Physical behavior is simulated: delays and reported metrics are
//! illustrative stand-ins for the real units.
//!
//! All variants share the same test hooks: a configurable simulated latency
//! and one-shot failure injection that trips the next fallible operation.

pub mod monitor;
pub mod optimizer;
pub mod particle_source;

pub use monitor::PerformanceMonitor;
pub use optimizer::PowerOptimizer;
pub use particle_source::ParticleSource;
