//! # Engine Tick
//!
//! One pass of the accounting state machine, nominally once a minute.
//!
//! Every completed tick advances `total_minutes` (and exactly one of
//! `armed_minutes` / `disarmed_minutes`) by one, however much wall-clock time
//! actually passed. A tick whose elapsed time strays from the nominal interval
//! by more than the tolerance is recorded as `corrected` for audit.

use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, error, info, warn};

use super::{local_now, Engine, OdometerState};
use crate::model::stats::battery_wh;
use crate::model::{Mission, OdometerStats};
use crate::store::{CheckpointState, LedgerRow, TimeStatus};
use crate::telemetry::forwarder::ForwardedMetrics;
use crate::telemetry::{vehicle, TelemetrySource, VehicleSnapshot};

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub timestamp: NaiveDateTime,
    pub time_status: TimeStatus,
    /// Wall-clock time since the previous tick; `None` on the first tick.
    pub elapsed: Option<chrono::Duration>,
    pub telemetry_available: bool,
    pub swap_detected: bool,
    /// False if any file write failed this tick.
    pub persisted: bool,
    pub metrics: ForwardedMetrics,
}

/// Classify a tick by how far its elapsed time strays from `nominal`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rov_odometer::engine::tick::classify;
/// use rov_odometer::store::TimeStatus;
///
/// let nominal = Duration::from_secs(60);
/// let tolerance = Duration::from_secs(300);
/// assert_eq!(classify(Some(chrono::Duration::seconds(61)), nominal, tolerance), TimeStatus::Normal);
/// assert_eq!(classify(Some(chrono::Duration::seconds(400)), nominal, tolerance), TimeStatus::Corrected);
/// ```
pub fn classify(elapsed: Option<chrono::Duration>, nominal: Duration, tolerance: Duration) -> TimeStatus {
    let Some(elapsed) = elapsed else {
        return TimeStatus::Normal;
    };
    let deviation_ms = (elapsed.num_milliseconds() - nominal.as_millis() as i64).unsigned_abs();
    if u128::from(deviation_ms) > tolerance.as_millis() {
        TimeStatus::Corrected
    } else {
        TimeStatus::Normal
    }
}

/// Ledger row for the current counters.
pub(crate) fn ledger_row(stats: &OdometerStats, timestamp: NaiveDateTime, time_status: TimeStatus) -> LedgerRow {
    LedgerRow {
        timestamp,
        total_minutes: stats.total_minutes,
        armed_minutes: stats.armed_minutes,
        disarmed_minutes: stats.disarmed_minutes,
        dive_minutes: stats.dive_minutes,
        battery_swaps: stats.battery_swaps,
        startups: stats.startups,
        voltage: stats.last_voltage,
        cpu_temp: stats.cpu_temp,
        depth: stats.last_depth,
        current_battery_wh: stats.current_battery_wh(),
        previous_batteries_wh: stats.previous_batteries_wh(),
        total_wh_consumed: stats.total_wh_consumed(),
        time_status,
    }
}

pub(crate) fn forwarded_metrics(stats: &OdometerStats) -> ForwardedMetrics {
    ForwardedMetrics {
        total_minutes: stats.total_minutes,
        armed_minutes: stats.armed_minutes,
        disarmed_minutes: stats.disarmed_minutes,
        dive_minutes: stats.dive_minutes,
        battery_swaps: stats.battery_swaps,
        startups: stats.startups,
        total_wh_consumed: stats.total_wh_consumed(),
    }
}

impl Engine {
    /// Fetch telemetry, local time and CPU temperature, then apply one tick.
    ///
    /// No lock is held while waiting on the network.
    pub async fn tick(&self, source: &dyn TelemetrySource) -> TickReport {
        let now = match source.fetch_local_time().await {
            Some(now) => now,
            None => local_now(),
        };
        let snapshot = source.fetch_status().await;
        if !snapshot.available {
            warn!("Telemetry unavailable; counting time only this tick");
        }
        let cpu_temp = self.health.read();

        self.apply_tick(now, &snapshot, cpu_temp)
    }

    /// Apply one tick for readings taken at `now`.
    ///
    /// Persistence failures are logged and reported in
    /// [`TickReport::persisted`]; the in-memory state still advances.
    pub fn apply_tick(&self, now: NaiveDateTime, snapshot: &VehicleSnapshot, cpu_temp: Option<f64>) -> TickReport {
        let mut persisted = self.tick_equipment(snapshot);

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let elapsed = state.last_tick.map(|last| now - last);
        let time_status = classify(elapsed, self.config.tick_interval(), Duration::from_secs(self.config.time_jump_tolerance_s));
        if time_status == TimeStatus::Corrected {
            warn!(
                "Clock jump: {}s since previous tick (nominal {}s); counting one minute",
                elapsed.map_or(0, |e| e.num_seconds()),
                self.config.tick_interval_s
            );
        }

        let stats = &mut state.stats;
        stats.total_minutes += 1;
        if snapshot.armed {
            stats.armed_minutes += 1;
        } else {
            stats.disarmed_minutes += 1;
        }
        if snapshot.depth >= self.config.dive_depth_m {
            stats.dive_minutes += 1;
        }
        if snapshot.available {
            stats.last_depth = snapshot.depth;
        }

        let swap_detected = if snapshot.has_voltage() {
            self.account_voltage(state, now, snapshot, cpu_temp, &mut persisted)
        } else {
            self.account_bench(state, now, cpu_temp);
            false
        };

        if let Some(temp) = cpu_temp {
            state.stats.cpu_temp = temp;
        }

        if let Some(mission) = &state.current {
            let checkpoint = CheckpointState {
                mission: mission.clone(),
                voltage_sum: state.stats.voltage_sum,
                voltage_count: state.stats.voltage_count,
            };
            if let Err(e) = state.checkpoint.save(&checkpoint) {
                error!("Failed to write mission checkpoint: {}", e);
                persisted = false;
            }
        }

        let row = ledger_row(&state.stats, now, time_status);
        if let Err(e) = state.ledger.append(&row) {
            error!("Failed to append ledger row: {}", e);
            persisted = false;
        }

        state.last_tick = Some(now);
        debug!(
            "Tick {}: {} min armed, {:.2} V, {:.3} Wh, {}",
            state.stats.total_minutes,
            state.stats.armed_minutes,
            state.stats.last_voltage,
            state.stats.total_wh_consumed(),
            time_status
        );

        TickReport {
            timestamp: now,
            time_status,
            elapsed,
            telemetry_available: snapshot.available,
            swap_detected,
            persisted,
            metrics: forwarded_metrics(&state.stats),
        }
    }

    /// Thruster and accessory run minutes. Returns whether both tables saved.
    fn tick_equipment(&self, snapshot: &VehicleSnapshot) -> bool {
        let mut saved = true;

        {
            let mut thrusters = self.thrusters.lock();
            if let Some(code) = snapshot.vehicle_type {
                thrusters.value.vehicle_type = Some(code);
            }
            let count = self
                .config
                .thruster_count
                .or_else(|| snapshot.vehicle_type.and_then(vehicle::thruster_count));
            if let Some(count) = count {
                if thrusters.value.resize(count) {
                    info!("Thruster count is now {}", count);
                }
            }
            if snapshot.armed {
                thrusters.value.add_run_minute();
            }
            if let Err(e) = thrusters.save() {
                error!("Failed to save thruster table: {}", e);
                saved = false;
            }
        }

        {
            let mut accessories = self.accessories.lock();
            if snapshot.armed {
                accessories.value.add_run_minute();
            }
            if let Err(e) = accessories.save() {
                error!("Failed to save accessory table: {}", e);
                saved = false;
            }
        }

        saved
    }

    /// Energy, swap detection and mission bookkeeping for a valid voltage.
    /// Returns whether a battery swap was counted.
    fn account_voltage(
        &self,
        state: &mut OdometerState,
        now: NaiveDateTime,
        snapshot: &VehicleSnapshot,
        cpu_temp: Option<f64>,
        persisted: &mut bool,
    ) -> bool {
        let voltage = snapshot.voltage;
        let consumed = snapshot.consumed_mah.abs();
        let swap_threshold = self.config.swap_voltage_v;
        let uptime = state.stats.total_minutes;
        let mut swap_detected = false;

        // Deferred check armed by startup reconciliation.
        if state.stats.pending_swap_check {
            state.stats.pending_swap_check = false;
            let previous = state.stats.last_voltage;
            if previous > 0.0 && voltage - previous > swap_threshold {
                info!("Battery swap while offline: {:.2} V -> {:.2} V", previous, voltage);
                state.stats.battery_swaps += 1;
                state.stats.fold_current_battery();
                state.stats.reset_voltage_average(None);
                swap_detected = true;
            } else {
                debug!("No battery swap while offline ({:.2} V -> {:.2} V)", previous, voltage);
            }
        }

        let stats = &mut state.stats;
        let average = stats.accumulate_voltage(voltage);
        let mut wh = battery_wh(consumed, average);

        let swapped_live = !swap_detected
            && stats.last_voltage > 0.0
            && consumed < stats.last_current_consumed
            && voltage - stats.last_voltage > swap_threshold;

        if swapped_live {
            info!(
                "Battery swap detected: {:.2} V -> {:.2} V, consumed {:.0} -> {:.0} mAh",
                stats.last_voltage, voltage, stats.last_current_consumed, consumed
            );
            stats.fold_current_battery();
            stats.battery_swaps += 1;
            stats.reset_voltage_average(Some(voltage));
            wh = battery_wh(consumed, voltage);

            if let Some(mut outgoing) = state.current.take() {
                outgoing.observe_voltage(voltage);
                outgoing.observe_cpu_temp(cpu_temp);
                outgoing.total_ah = consumed / 1000.0;
                outgoing.end_uptime = uptime;
                outgoing.close(now, &self.limits);
                info!("Mission {} closed after {} minutes", outgoing.id, outgoing.duration_minutes());
                if let Err(e) = state.history.append(outgoing) {
                    error!("Failed to persist closed mission: {}", e);
                    *persisted = false;
                }
            }
            swap_detected = true;
        }

        let stats = &mut state.stats;
        stats.set_current_battery_wh(wh);
        stats.last_voltage = voltage;
        stats.last_current_consumed = consumed;

        match state.current.as_mut() {
            Some(mission) => {
                mission.observe_voltage(voltage);
                mission.observe_cpu_temp(cpu_temp);
                mission.total_ah = consumed / 1000.0;
                mission.end_uptime = uptime;
                mission.refresh_hard_use(&self.limits);
            }
            None => {
                let id = state.allocate_mission_id();
                info!("Mission {} opened at {:.2} V", id, voltage);
                state.current = Some(Mission::open(id, now, voltage, cpu_temp, uptime));
            }
        }

        swap_detected
    }

    /// No valid voltage: keep a mission going on uptime and temperature alone.
    fn account_bench(&self, state: &mut OdometerState, now: NaiveDateTime, cpu_temp: Option<f64>) {
        let uptime = state.stats.total_minutes;
        match state.current.as_mut() {
            Some(mission) => {
                mission.observe_cpu_temp(cpu_temp);
                mission.end_uptime = uptime;
            }
            None => {
                let id = state.allocate_mission_id();
                info!("Mission {} opened without battery telemetry", id);
                state.current = Some(Mission::open(id, now, 0.0, cpu_temp, uptime));
            }
        }
    }
}
