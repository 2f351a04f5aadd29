//! Configuration loading and validation.
//!
//! Configuration is loaded with Figment from:
//! 1. a TOML file (base configuration, `config/emitter.toml` by default)
//! 2. environment variables prefixed with `EUV_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys use a double underscore separator:
//!
//! ```text
//! EUV_APPLICATION__LOG_LEVEL=debug
//! EUV_EMITTER__MAX_POWER_W=4.0e-9
//! ```
//!
//! After loading, [`Settings::validate`] checks the log level, the emitter
//! physics parameters, and every device definition before anything is built
//! from them.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{AppResult, EmitterError};

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Static emitter parameters
    #[serde(default)]
    pub emitter: EmitterConfig,
    /// Device definitions for the device manager
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

/// Static emitter parameters, immutable after controller construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Emission wavelength in meters
    #[serde(default = "default_wavelength_m")]
    pub wavelength_m: f64,
    /// Maximum output power in watts
    #[serde(default = "default_max_power_w")]
    pub max_power_w: f64,
    /// Relative stability target in (0, 1]
    #[serde(default = "default_stability_target")]
    pub stability_target: f64,
    /// Total warm-up ramp time in seconds
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: f64,
    /// Recommended interval between calibrations in seconds
    #[serde(default = "default_calibration_interval_secs")]
    pub calibration_interval_secs: f64,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            wavelength_m: default_wavelength_m(),
            max_power_w: default_max_power_w(),
            stability_target: default_stability_target(),
            warmup_secs: default_warmup_secs(),
            calibration_interval_secs: default_calibration_interval_secs(),
        }
    }
}

impl EmitterConfig {
    /// Validate the physics parameters.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.wavelength_m > 0.0) {
            return Err(EmitterError::Configuration(format!(
                "wavelength_m must be > 0, got {}",
                self.wavelength_m
            )));
        }
        if !(self.max_power_w > 0.0) {
            return Err(EmitterError::Configuration(format!(
                "max_power_w must be > 0, got {}",
                self.max_power_w
            )));
        }
        if !(self.stability_target > 0.0 && self.stability_target <= 1.0) {
            return Err(EmitterError::Configuration(format!(
                "stability_target must be in (0, 1], got {}",
                self.stability_target
            )));
        }
        if !(self.warmup_secs >= 0.0) {
            return Err(EmitterError::Configuration(format!(
                "warmup_secs must be >= 0, got {}",
                self.warmup_secs
            )));
        }
        if !(self.calibration_interval_secs >= 0.0) {
            return Err(EmitterError::Configuration(format!(
                "calibration_interval_secs must be >= 0, got {}",
                self.calibration_interval_secs
            )));
        }
        Ok(())
    }
}

/// Device definition in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device identifier
    pub id: String,
    /// Adapter type (tcp, serial, modbus, mock)
    pub r#type: String,
    /// Whether this device is wired into the manager
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// TCP transport configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpDeviceConfig>,
    /// Serial-line transport configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<SerialDeviceConfig>,
    /// Modbus register-image configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modbus: Option<ModbusDeviceConfig>,
}

/// TCP device transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpDeviceConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    /// Connect/command timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Serial-line device transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    #[serde(default = "default_serial_timeout_ms")]
    pub timeout_ms: u64,
}

/// Modbus device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusDeviceConfig {
    /// Gateway host name or address
    pub host: String,
    /// TCP port
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// Modbus unit identifier
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "euv-emitter".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_wavelength_m() -> f64 {
    5.8e-9
}

fn default_max_power_w() -> f64 {
    5.0e-9
}

fn default_stability_target() -> f64 {
    0.01
}

fn default_warmup_secs() -> f64 {
    10.0
}

fn default_calibration_interval_secs() -> f64 {
    3600.0
}

fn default_enabled() -> bool {
    true
}

fn default_tcp_port() -> u16 {
    5025
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_serial_timeout_ms() -> u64 {
    1000
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

// ============================================================================
// Loading and validation
// ============================================================================

/// Adapter types the built-in catalog can construct.
pub const VALID_DEVICE_TYPES: [&str; 4] = ["tcp", "serial", "modbus", "mock"];

impl Settings {
    /// Load configuration from `config/emitter.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/emitter.toml")
    }

    /// Load configuration from a specific file path plus `EUV_` environment
    /// overrides, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EUV_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    ///
    /// Checks:
    /// - Log level is one of trace/debug/info/warn/error
    /// - Emitter physics parameters are in range
    /// - Device ids are unique and each definition carries the configuration
    ///   block its type requires
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(EmitterError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.emitter.validate()?;

        let mut ids = HashSet::new();
        for device in &self.devices {
            if device.id.is_empty() {
                return Err(EmitterError::Configuration(
                    "Device id cannot be empty".to_string(),
                ));
            }
            if !ids.insert(&device.id) {
                return Err(EmitterError::Configuration(format!(
                    "Duplicate device id: '{}'",
                    device.id
                )));
            }
            self.validate_device(device)?;
        }

        Ok(())
    }

    /// Get all enabled device definitions.
    pub fn enabled_devices(&self) -> Vec<&DeviceDefinition> {
        self.devices.iter().filter(|device| device.enabled).collect()
    }

    fn validate_device(&self, device: &DeviceDefinition) -> AppResult<()> {
        match device.r#type.as_str() {
            "tcp" => {
                let tcp = device.tcp.as_ref().ok_or_else(|| {
                    EmitterError::Configuration(format!(
                        "Device '{}' missing 'tcp' configuration block",
                        device.id
                    ))
                })?;
                if tcp.host.is_empty() {
                    return Err(EmitterError::Configuration(format!(
                        "Device '{}': 'host' cannot be empty",
                        device.id
                    )));
                }
            }
            "serial" => {
                let serial = device.serial.as_ref().ok_or_else(|| {
                    EmitterError::Configuration(format!(
                        "Device '{}' missing 'serial' configuration block",
                        device.id
                    ))
                })?;
                if serial.port.is_empty() {
                    return Err(EmitterError::Configuration(format!(
                        "Device '{}': 'port' cannot be empty",
                        device.id
                    )));
                }
            }
            "modbus" => {
                let modbus = device.modbus.as_ref().ok_or_else(|| {
                    EmitterError::Configuration(format!(
                        "Device '{}' missing 'modbus' configuration block",
                        device.id
                    ))
                })?;
                if modbus.host.is_empty() {
                    return Err(EmitterError::Configuration(format!(
                        "Device '{}': 'host' cannot be empty",
                        device.id
                    )));
                }
            }
            "mock" => {}
            other => {
                return Err(EmitterError::Configuration(format!(
                    "Invalid device type '{}' for device '{}'. Must be one of: {}",
                    other,
                    device.id,
                    VALID_DEVICE_TYPES.join(", ")
                )));
            }
        }
        Ok(())
    }
}
