//! # Telemetry Module
//!
//! Best-effort access to the vehicle's telemetry bus.
//!
//! This module handles:
//! - Fetching battery, arm-state, depth and vehicle-type snapshots
//! - Fetching raw actuator (servo) outputs for duty sampling
//! - Pushing small named scalars back onto the bus
//! - Trying an ordered list of candidate endpoints and taking the first answer
//!
//! Failures never surface as errors to the engine. Every fetch returns a
//! sentinel ([`VehicleSnapshot::unavailable`], `false`, all-zero outputs) which
//! callers must read as "telemetry unavailable this tick".

pub mod forwarder;
pub mod mavlink;
pub mod vehicle;

use async_trait::async_trait;
use chrono::NaiveDateTime;

/// Number of servo output channels reported by the autopilot.
pub const ACTUATOR_CHANNELS: usize = 16;

/// Raw PWM values (microseconds) for servo channels 1-16. Zero means "not driven".
pub type ActuatorOutputs = [u16; ACTUATOR_CHANNELS];

/// One best-effort reading of the vehicle's state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleSnapshot {
    /// Whether any candidate endpoint answered.
    pub available: bool,
    /// Battery voltage in volts. 0.0 when unknown.
    pub voltage: f64,
    pub armed: bool,
    /// Cumulative charge drawn from the battery in mAh, as reported.
    pub consumed_mah: f64,
    /// Depth below the surface in metres, never negative.
    pub depth: f64,
    /// MAV_TYPE code of the vehicle, when reported.
    pub vehicle_type: Option<u8>,
}

impl VehicleSnapshot {
    /// Sentinel returned when no endpoint could be reached.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// True when the voltage is a real reading rather than a sentinel.
    pub fn has_voltage(&self) -> bool {
        self.voltage > 0.0
    }
}

/// Capability to read from and write to the vehicle's telemetry bus.
///
/// Implementations try their candidate targets sequentially with short
/// timeouts; they never race endpoints concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Battery, arm-state, depth and vehicle type in one snapshot.
    async fn fetch_status(&self) -> VehicleSnapshot;

    /// Arm state only. `false` when unavailable.
    async fn fetch_armed(&self) -> bool;

    /// Current servo outputs. All zeros when unavailable.
    async fn fetch_actuator_outputs(&self) -> ActuatorOutputs;

    /// Push a named scalar onto the bus. Returns whether any target accepted it.
    async fn push_named_value(&self, name: &str, value: f64) -> bool;

    /// "True" local time as reported by the host, if such a source is configured.
    async fn fetch_local_time(&self) -> Option<NaiveDateTime> {
        None
    }
}
