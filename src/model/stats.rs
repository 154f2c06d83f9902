//! # Odometer Statistics
//!
//! The process-wide usage counters the engine maintains.
//!
//! ## Invariants
//!
//! - `total_minutes == armed_minutes + disarmed_minutes`
//! - `total_wh_consumed == previous_batteries_wh + current_battery_wh`, which is
//!   why the energy fields are private and only change through methods that
//!   recompute the total.

use serde::Serialize;

/// Accumulated usage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct OdometerStats {
    pub total_minutes: u64,
    pub armed_minutes: u64,
    pub disarmed_minutes: u64,
    pub dive_minutes: u64,
    pub battery_swaps: u64,
    pub startups: u64,

    /// Last valid battery voltage (V); 0.0 until one has been seen.
    pub last_voltage: f64,
    pub last_depth: f64,
    /// Last valid CPU temperature (°C); 0.0 until one has been seen.
    pub cpu_temp: f64,

    previous_batteries_wh: f64,
    current_battery_wh: f64,
    total_wh_consumed: f64,

    /// Running voltage accumulator for the battery in use.
    pub voltage_sum: f64,
    pub voltage_count: u64,

    /// |consumed charge| (mAh) seen on the previous tick.
    pub last_current_consumed: f64,

    /// Set by startup reconciliation: check the next valid voltage for a swap.
    pub pending_swap_check: bool,
}

impl OdometerStats {
    /// Energy drawn from batteries that have since been swapped out (Wh).
    pub fn previous_batteries_wh(&self) -> f64 {
        self.previous_batteries_wh
    }

    /// Energy drawn from the battery currently installed (Wh).
    pub fn current_battery_wh(&self) -> f64 {
        self.current_battery_wh
    }

    /// Lifetime energy consumption (Wh).
    pub fn total_wh_consumed(&self) -> f64 {
        self.total_wh_consumed
    }

    /// Restore both energy components, e.g. from the last ledger row.
    pub fn restore_energy(&mut self, previous_batteries_wh: f64, current_battery_wh: f64) {
        self.previous_batteries_wh = previous_batteries_wh;
        self.current_battery_wh = current_battery_wh;
        self.recompute_total();
    }

    pub fn set_current_battery_wh(&mut self, wh: f64) {
        self.current_battery_wh = wh;
        self.recompute_total();
    }

    /// Move the outgoing battery's energy into the swapped-out total.
    pub fn fold_current_battery(&mut self) {
        self.previous_batteries_wh += self.current_battery_wh;
        self.current_battery_wh = 0.0;
        self.recompute_total();
    }

    fn recompute_total(&mut self) {
        self.total_wh_consumed = self.previous_batteries_wh + self.current_battery_wh;
    }

    /// Add a voltage sample and return the new running average.
    pub fn accumulate_voltage(&mut self, voltage: f64) -> f64 {
        self.voltage_sum += voltage;
        self.voltage_count += 1;
        self.average_voltage()
    }

    /// Running average voltage, 0.0 when no samples have been taken.
    pub fn average_voltage(&self) -> f64 {
        if self.voltage_count == 0 {
            0.0
        } else {
            self.voltage_sum / self.voltage_count as f64
        }
    }

    /// Restart the accumulator, optionally seeded with one sample.
    pub fn reset_voltage_average(&mut self, seed: Option<f64>) {
        match seed {
            Some(voltage) => {
                self.voltage_sum = voltage;
                self.voltage_count = 1;
            }
            None => {
                self.voltage_sum = 0.0;
                self.voltage_count = 0;
            }
        }
    }
}

/// Energy estimate for one battery: `|consumed mAh| / 1000 * average V`.
pub fn battery_wh(consumed_mah: f64, average_voltage: f64) -> f64 {
    consumed_mah.abs() / 1000.0 * average_voltage
}
