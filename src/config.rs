//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! configuration suitable for a BlueOS companion computer.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OdometerError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Telemetry source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    /// Message roots queried with GET, tried in order.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Targets for NAMED_VALUE_FLOAT pushes, tried in order.
    #[serde(default = "default_post_endpoints")]
    pub post_endpoints: Vec<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Optional "true local time" endpoint; system time is used without it.
    #[serde(default)]
    pub local_time_url: Option<String>,

    #[serde(default = "default_forward_enabled")]
    pub forward_enabled: bool,
}

/// Accounting engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_tick_interval_s")]
    pub tick_interval_s: u64,

    #[serde(default = "default_retry_delay_s")]
    pub retry_delay_s: u64,

    #[serde(default = "default_time_jump_tolerance_s")]
    pub time_jump_tolerance_s: u64,

    #[serde(default = "default_dive_depth_m")]
    pub dive_depth_m: f64,

    #[serde(default = "default_swap_voltage_v")]
    pub swap_voltage_v: f64,

    #[serde(default = "default_hard_use_voltage_drop_v")]
    pub hard_use_voltage_drop_v: f64,

    #[serde(default = "default_hard_use_pwm_deviation")]
    pub hard_use_pwm_deviation: u16,

    /// Forces the thruster count instead of deriving it from the vehicle type.
    #[serde(default)]
    pub thruster_count: Option<usize>,
}

/// Duty sampler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SamplerConfig {
    #[serde(default = "default_sampler_enabled")]
    pub enabled: bool,

    #[serde(default = "default_sample_interval_s")]
    pub interval_s: u64,

    #[serde(default = "default_neutral_pwm")]
    pub neutral_pwm: u16,
}

/// Persistent store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Lives on tmpfs so that it disappears on a power cycle.
    #[serde(default = "default_startup_marker")]
    pub startup_marker: PathBuf,
}

/// Health reader configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_cpu_temp_path")]
    pub cpu_temp_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_endpoints() -> Vec<String> {
    vec![
        "http://host.docker.internal/mavlink2rest/mavlink/vehicles/1/components/1/messages".to_string(),
        "http://host.docker.internal:6040/v1/mavlink/vehicles/1/components/1/messages".to_string(),
        "http://192.168.2.2/mavlink2rest/mavlink/vehicles/1/components/1/messages".to_string(),
        "http://localhost/mavlink2rest/mavlink/vehicles/1/components/1/messages".to_string(),
        "http://blueos.local/mavlink2rest/mavlink/vehicles/1/components/1/messages".to_string(),
    ]
}
fn default_post_endpoints() -> Vec<String> {
    vec![
        "http://host.docker.internal/mavlink2rest/mavlink".to_string(),
        "http://host.docker.internal:6040/v1/mavlink".to_string(),
        "http://192.168.2.2/mavlink2rest/mavlink".to_string(),
        "http://localhost/mavlink2rest/mavlink".to_string(),
        "http://blueos.local/mavlink2rest/mavlink".to_string(),
    ]
}
fn default_request_timeout_ms() -> u64 { 2000 }
fn default_forward_enabled() -> bool { true }

fn default_tick_interval_s() -> u64 { 60 }
fn default_retry_delay_s() -> u64 { 10 }
fn default_time_jump_tolerance_s() -> u64 { 300 }
fn default_dive_depth_m() -> f64 { 1.0 }
fn default_swap_voltage_v() -> f64 { 1.0 }
fn default_hard_use_voltage_drop_v() -> f64 { 2.0 }
fn default_hard_use_pwm_deviation() -> u16 { 300 }

fn default_sampler_enabled() -> bool { true }
fn default_sample_interval_s() -> u64 { 5 }
fn default_neutral_pwm() -> u16 { 1500 }

fn default_data_dir() -> PathBuf { PathBuf::from("/app/data") }
fn default_startup_marker() -> PathBuf { PathBuf::from("/tmp/rov-odometer.startup") }

fn default_cpu_temp_path() -> PathBuf { PathBuf::from("/sys/class/thermal/thermal_zone0/temp") }

fn default_log_dir() -> PathBuf { PathBuf::from("/app/logs") }
fn default_log_level() -> String { "info".to_string() }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            post_endpoints: default_post_endpoints(),
            request_timeout_ms: default_request_timeout_ms(),
            local_time_url: None,
            forward_enabled: default_forward_enabled(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: default_tick_interval_s(),
            retry_delay_s: default_retry_delay_s(),
            time_jump_tolerance_s: default_time_jump_tolerance_s(),
            dive_depth_m: default_dive_depth_m(),
            swap_voltage_v: default_swap_voltage_v(),
            hard_use_voltage_drop_v: default_hard_use_voltage_drop_v(),
            hard_use_pwm_deviation: default_hard_use_pwm_deviation(),
            thruster_count: None,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: default_sampler_enabled(),
            interval_s: default_sample_interval_s(),
            neutral_pwm: default_neutral_pwm(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            startup_marker: default_startup_marker(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { cpu_temp_path: default_cpu_temp_path() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

impl TelemetryConfig {
    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl EngineConfig {
    /// Nominal interval between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_s)
    }

    /// Delay before retrying after a failed tick.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_s)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use rov_odometer::config::Config;
    ///
    /// let config = Config::load("config/odometer.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.telemetry.endpoints.is_empty() {
            return Err(invalid("telemetry endpoints cannot be empty"));
        }

        if self.telemetry.forward_enabled && self.telemetry.post_endpoints.is_empty() {
            return Err(invalid("telemetry post_endpoints cannot be empty when forwarding is enabled"));
        }

        if self.telemetry.request_timeout_ms == 0 || self.telemetry.request_timeout_ms > 30000 {
            return Err(invalid("request_timeout_ms must be between 1 and 30000"));
        }

        if self.engine.tick_interval_s == 0 || self.engine.tick_interval_s > 3600 {
            return Err(invalid("tick_interval_s must be between 1 and 3600"));
        }

        if self.engine.retry_delay_s == 0 || self.engine.retry_delay_s > self.engine.tick_interval_s {
            return Err(invalid("retry_delay_s must be between 1 and tick_interval_s"));
        }

        if self.engine.time_jump_tolerance_s == 0 {
            return Err(invalid("time_jump_tolerance_s must be greater than 0"));
        }

        for (name, value) in [
            ("dive_depth_m", self.engine.dive_depth_m),
            ("swap_voltage_v", self.engine.swap_voltage_v),
            ("hard_use_voltage_drop_v", self.engine.hard_use_voltage_drop_v),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{} must be a positive number", name)));
            }
        }

        if let Some(count) = self.engine.thruster_count {
            if count == 0 || count > 16 {
                return Err(invalid("thruster_count must be between 1 and 16"));
            }
        }

        if self.sampler.interval_s == 0 || self.sampler.interval_s > self.engine.tick_interval_s {
            return Err(invalid("sampler interval_s must be between 1 and tick_interval_s"));
        }

        if !(1000..=2000).contains(&self.sampler.neutral_pwm) {
            return Err(invalid("neutral_pwm must be between 1000 and 2000"));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(invalid("storage data_dir cannot be empty"));
        }

        if self.storage.startup_marker.as_os_str().is_empty() {
            return Err(invalid("storage startup_marker cannot be empty"));
        }

        if self.logging.log_dir.as_os_str().is_empty() {
            return Err(invalid("logging log_dir cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> OdometerError {
    OdometerError::Config(toml::de::Error::custom(msg))
}
