//! # Equipment
//!
//! Per-thruster and per-accessory run accumulators, plus the vehicle's
//! identity record.
//!
//! Thrusters and accessories are both addressed by 1-based numbers in the
//! public API: thruster 1 is servo output 1, and an accessory's `channel` is
//! the servo output it is wired to.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{OdometerError, Result};
use crate::telemetry::{ActuatorOutputs, ACTUATOR_CHANNELS};

/// Current on-disk versions of the JSON side tables.
pub const THRUSTER_TABLE_VERSION: u32 = 2;
pub const ACCESSORY_TABLE_VERSION: u32 = 2;
pub const VEHICLE_TABLE_VERSION: u32 = 2;

/// Run time and PWM accumulator shared by thrusters and accessories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DutyCounter {
    #[serde(default)]
    pub run_minutes: u64,
    #[serde(default)]
    pub pwm_sum: u64,
    #[serde(default)]
    pub pwm_samples: u64,
}

impl DutyCounter {
    /// Accumulate a PWM sample. Zero means "not driven" and is ignored.
    pub fn record_pwm(&mut self, pwm: u16) -> bool {
        if pwm == 0 {
            return false;
        }
        self.pwm_sum += u64::from(pwm);
        self.pwm_samples += 1;
        true
    }

    pub fn average_pwm(&self) -> Option<f64> {
        if self.pwm_samples == 0 {
            None
        } else {
            Some(self.pwm_sum as f64 / self.pwm_samples as f64)
        }
    }

    pub fn run_hours(&self) -> f64 {
        self.run_minutes as f64 / 60.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-side view of one thruster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrusterSummary {
    pub number: usize,
    pub run_minutes: u64,
    pub run_hours: f64,
    pub average_pwm: Option<f64>,
}

/// Per-thruster accumulators, sized from the detected vehicle type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrusterStats {
    pub schema_version: u32,
    #[serde(default)]
    pub vehicle_type: Option<u8>,
    #[serde(default)]
    pub thrusters: Vec<DutyCounter>,
}

impl Default for ThrusterStats {
    fn default() -> Self {
        Self {
            schema_version: THRUSTER_TABLE_VERSION,
            vehicle_type: None,
            thrusters: Vec::new(),
        }
    }
}

impl ThrusterStats {
    pub fn count(&self) -> usize {
        self.thrusters.len()
    }

    /// Resize to `count` thrusters, keeping the counters at overlapping indices.
    ///
    /// Returns whether the count changed.
    pub fn resize(&mut self, count: usize) -> bool {
        let count = count.min(ACTUATOR_CHANNELS);
        if count == self.thrusters.len() {
            return false;
        }
        self.thrusters.resize(count, DutyCounter::default());
        true
    }

    /// Credit one run minute to every thruster.
    pub fn add_run_minute(&mut self) {
        for thruster in &mut self.thrusters {
            thruster.run_minutes += 1;
        }
    }

    /// Accumulate one duty sample. Thruster `n` reads servo output `n`.
    pub fn record_outputs(&mut self, outputs: &ActuatorOutputs) {
        for (thruster, &pwm) in self.thrusters.iter_mut().zip(outputs.iter()) {
            thruster.record_pwm(pwm);
        }
    }

    /// Reset one thruster's accumulators.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no thruster has that number.
    pub fn reset(&mut self, number: usize) -> Result<()> {
        let index = number
            .checked_sub(1)
            .filter(|&index| index < self.thrusters.len())
            .ok_or_else(|| OdometerError::NotFound(format!("thruster {}", number)))?;
        self.thrusters[index].reset();
        Ok(())
    }

    pub fn summaries(&self) -> Vec<ThrusterSummary> {
        self.thrusters
            .iter()
            .enumerate()
            .map(|(index, thruster)| ThrusterSummary {
                number: index + 1,
                run_minutes: thruster.run_minutes,
                run_hours: thruster.run_hours(),
                average_pwm: thruster.average_pwm(),
            })
            .collect()
    }
}

/// User-declared auxiliary equipment driven from one servo output
/// (lights, gripper, tether spool, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessory {
    pub id: u64,
    pub name: String,
    /// 1-based servo output.
    pub channel: u8,
    #[serde(flatten)]
    pub duty: DutyCounter,
}

impl Accessory {
    /// PWM on this accessory's channel; 0 when the channel is out of range.
    pub fn output_pwm(&self, outputs: &ActuatorOutputs) -> u16 {
        usize::from(self.channel)
            .checked_sub(1)
            .and_then(|index| outputs.get(index))
            .copied()
            .unwrap_or(0)
    }

    pub fn has_valid_channel(&self) -> bool {
        validate_channel(self.channel).is_ok()
    }
}

/// All declared accessories plus the id allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessoryTable {
    pub schema_version: u32,
    /// Next id to hand out; ids are never reused.
    pub next_id: u64,
    #[serde(default)]
    pub accessories: Vec<Accessory>,
}

impl Default for AccessoryTable {
    fn default() -> Self {
        Self {
            schema_version: ACCESSORY_TABLE_VERSION,
            next_id: 1,
            accessories: Vec::new(),
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(OdometerError::InvalidInput("accessory name is required".into()));
    }
    Ok(name.to_string())
}

fn validate_channel(channel: u8) -> Result<u8> {
    if channel == 0 || usize::from(channel) > ACTUATOR_CHANNELS {
        return Err(OdometerError::InvalidInput(format!(
            "channel {} is out of range (1-{})",
            channel, ACTUATOR_CHANNELS
        )));
    }
    Ok(channel)
}

impl AccessoryTable {
    /// Declare a new accessory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty name or a channel outside 1-16.
    pub fn add(&mut self, name: &str, channel: u8) -> Result<Accessory> {
        let accessory = Accessory {
            id: self.next_id,
            name: validate_name(name)?,
            channel: validate_channel(channel)?,
            duty: DutyCounter::default(),
        };
        self.next_id += 1;
        self.accessories.push(accessory.clone());
        Ok(accessory)
    }

    pub fn get(&self, id: u64) -> Option<&Accessory> {
        self.accessories.iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, id: u64) -> Result<&mut Accessory> {
        self.accessories
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| OdometerError::NotFound(format!("accessory {}", id)))
    }

    pub fn rename(&mut self, id: u64, name: &str) -> Result<Accessory> {
        let name = validate_name(name)?;
        let accessory = self.get_mut(id)?;
        accessory.name = name;
        Ok(accessory.clone())
    }

    pub fn remove(&mut self, id: u64) -> Result<Accessory> {
        let position = self
            .accessories
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| OdometerError::NotFound(format!("accessory {}", id)))?;
        Ok(self.accessories.remove(position))
    }

    pub fn reset(&mut self, id: u64) -> Result<()> {
        self.get_mut(id)?.duty.reset();
        Ok(())
    }

    /// Coarse per-minute credit: every accessory runs while the vehicle is armed.
    pub fn add_run_minute(&mut self) {
        for accessory in &mut self.accessories {
            accessory.duty.run_minutes += 1;
        }
    }

    pub fn record_outputs(&mut self, outputs: &ActuatorOutputs) {
        for accessory in &mut self.accessories {
            let pwm = accessory.output_pwm(outputs);
            accessory.duty.record_pwm(pwm);
        }
    }

    /// Smallest id the allocator may hand out given the stored accessories.
    pub fn min_next_id(&self) -> u64 {
        self.accessories.iter().map(|a| a.id + 1).max().unwrap_or(1)
    }
}

/// Vehicle identity shown on reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub schema_version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub commissioned: Option<NaiveDate>,
}

impl Default for VehicleInfo {
    fn default() -> Self {
        Self {
            schema_version: VEHICLE_TABLE_VERSION,
            name: String::new(),
            model: String::new(),
            serial_number: String::new(),
            commissioned: None,
        }
    }
}
