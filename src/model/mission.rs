//! # Missions
//!
//! A mission is one continuous usage session: one power cycle, or one
//! battery's worth of operation. At most one mission is active at a time;
//! closed missions are immutable history.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Thresholds for flagging a mission as hard use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardUseLimits {
    /// Start-to-end voltage drop (V) above which a mission counts as hard use.
    pub voltage_drop: f64,
    /// Peak PWM deviation from neutral above which a mission counts as hard use.
    pub pwm_deviation: u16,
}

impl Default for HardUseLimits {
    fn default() -> Self {
        Self {
            voltage_drop: 2.0,
            pwm_deviation: 300,
        }
    }
}

/// One usage session.
///
/// Voltages and temperatures use 0.0 for "never observed"; a mission run on
/// the bench without a vehicle attached keeps its voltage fields at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: u64,
    pub start_time: NaiveDateTime,
    /// `None` while the mission is active.
    #[serde(default)]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub start_voltage: f64,
    #[serde(default)]
    pub end_voltage: f64,
    #[serde(default)]
    pub start_cpu_temp: f64,
    #[serde(default)]
    pub end_cpu_temp: f64,
    /// Charge drawn during the mission (Ah).
    #[serde(default)]
    pub total_ah: f64,
    /// Odometer total minutes when the mission opened.
    #[serde(default)]
    pub start_uptime: u64,
    #[serde(default)]
    pub end_uptime: u64,
    #[serde(default)]
    pub voltage_min: f64,
    #[serde(default)]
    pub max_pwm_deviation: u16,
    #[serde(default)]
    pub hard_use: bool,
}

impl Mission {
    /// Open a mission seeded with the current readings.
    ///
    /// `voltage` of 0.0 means no telemetry; `cpu_temp` of `None` means no
    /// valid temperature reading.
    pub fn open(id: u64, now: NaiveDateTime, voltage: f64, cpu_temp: Option<f64>, uptime: u64) -> Self {
        let temp = cpu_temp.unwrap_or(0.0);
        Self {
            id,
            start_time: now,
            end_time: None,
            start_voltage: voltage.max(0.0),
            end_voltage: voltage.max(0.0),
            start_cpu_temp: temp,
            end_cpu_temp: temp,
            total_ah: 0.0,
            start_uptime: uptime,
            end_uptime: uptime,
            voltage_min: voltage.max(0.0),
            max_pwm_deviation: 0,
            hard_use: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Record a valid voltage reading.
    ///
    /// A mission opened without telemetry adopts its first valid voltage as
    /// its start voltage.
    pub fn observe_voltage(&mut self, voltage: f64) {
        if voltage <= 0.0 {
            return;
        }
        if self.start_voltage <= 0.0 {
            self.start_voltage = voltage;
        }
        self.end_voltage = voltage;
        if self.voltage_min <= 0.0 || voltage < self.voltage_min {
            self.voltage_min = voltage;
        }
    }

    /// Record a temperature reading; invalid readings leave the end temperature alone.
    pub fn observe_cpu_temp(&mut self, cpu_temp: Option<f64>) {
        if let Some(temp) = cpu_temp {
            if self.start_cpu_temp <= 0.0 {
                self.start_cpu_temp = temp;
            }
            self.end_cpu_temp = temp;
        }
    }

    /// Fold a duty-sample deviation into the running maximum.
    pub fn observe_pwm_deviation(&mut self, deviation: u16) {
        self.max_pwm_deviation = self.max_pwm_deviation.max(deviation);
    }

    pub fn close(&mut self, at: NaiveDateTime, limits: &HardUseLimits) {
        self.end_time = Some(at);
        self.refresh_hard_use(limits);
    }

    /// Minutes the odometer advanced while this mission was open.
    pub fn duration_minutes(&self) -> u64 {
        self.end_uptime.saturating_sub(self.start_uptime)
    }

    /// Hard use: a steep voltage drop (only when both voltages are known) or
    /// a large PWM excursion from neutral.
    pub fn is_hard_use(&self, limits: &HardUseLimits) -> bool {
        let voltages_known = self.start_voltage > 0.0 && self.end_voltage > 0.0;
        let steep_drop = voltages_known && self.start_voltage - self.end_voltage > limits.voltage_drop;
        steep_drop || self.max_pwm_deviation > limits.pwm_deviation
    }

    pub fn refresh_hard_use(&mut self, limits: &HardUseLimits) {
        self.hard_use = self.is_hard_use(limits);
    }
}
