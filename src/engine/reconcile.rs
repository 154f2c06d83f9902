//! # Startup Reconciliation
//!
//! Runs once before the loops start.
//!
//! A checkpoint left on disk means the previous run stopped with a mission
//! open. That mission is closed using the last ledger row as its end state.
//! If the battery was lower at the end than at the start, the next valid
//! voltage is checked for a swap that happened while the daemon was down.
//!
//! Separately, a marker on volatile storage tells a power cycle (marker gone)
//! from a process restart (marker present).

use std::fs;

use chrono::NaiveDateTime;
use tracing::{debug, error, info};

use super::tick::ledger_row;
use super::Engine;
use crate::model::Mission;
use crate::store::ledger::TIMESTAMP_FORMAT;
use crate::store::TimeStatus;

/// Result of closing out an abandoned mission.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub closed: Mission,
    /// Whether the next valid voltage will be checked for an offline swap.
    pub pending_swap_check: bool,
}

impl Engine {
    /// Close a mission left open by an unclean shutdown.
    ///
    /// Returns `None` when there is no (readable) checkpoint. The checkpoint
    /// is removed afterwards so it is processed once.
    pub fn reconcile(&self, now: NaiveDateTime) -> Option<Reconciliation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let saved = state.checkpoint.load()?;
        let mut mission = saved.mission;

        let end_at = match state.ledger.last_row() {
            Some(row) => {
                mission.observe_voltage(row.voltage);
                if row.cpu_temp > 0.0 {
                    mission.observe_cpu_temp(Some(row.cpu_temp));
                }
                mission.end_uptime = row.total_minutes.max(mission.start_uptime);
                row.timestamp.max(mission.start_time)
            }
            None => now,
        };
        mission.close(end_at, &self.limits);

        let stats = &mut state.stats;
        stats.voltage_sum = saved.voltage_sum;
        stats.voltage_count = saved.voltage_count;

        let pending_swap_check = mission.end_voltage > 0.0 && mission.end_voltage < mission.start_voltage;
        if pending_swap_check {
            stats.pending_swap_check = true;
            stats.last_voltage = mission.end_voltage;
        }

        info!(
            "Reconciled mission {} left open at shutdown: {:.2} V -> {:.2} V, {} minutes{}",
            mission.id,
            mission.start_voltage,
            mission.end_voltage,
            mission.duration_minutes(),
            if pending_swap_check { "; checking next voltage for a swap" } else { "" }
        );

        state.next_mission_id = state.next_mission_id.max(mission.id + 1);
        if let Err(e) = state.history.append(mission.clone()) {
            error!("Failed to persist reconciled mission: {}", e);
        }
        if let Err(e) = state.checkpoint.clear() {
            error!("Failed to remove checkpoint: {}", e);
        }

        Some(Reconciliation {
            closed: mission,
            pending_swap_check,
        })
    }

    /// Count a cold start if the startup marker is missing.
    ///
    /// A cold start increments `startups`, restarts the voltage accumulator
    /// and writes a ledger row straight away. Returns whether it was a cold start.
    pub fn detect_startup(&self, now: NaiveDateTime) -> bool {
        if self.startup_marker.exists() {
            debug!("Startup marker {} present; warm restart", self.startup_marker.display());
            return false;
        }

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.stats.startups += 1;
            state.stats.reset_voltage_average(None);
            state.last_tick = Some(now);

            let row = ledger_row(&state.stats, now, TimeStatus::Startup);
            if let Err(e) = state.ledger.append(&row) {
                error!("Failed to append startup ledger row: {}", e);
            }
            info!("Cold start #{} recorded", state.stats.startups);
        }

        if let Err(e) = fs::write(&self.startup_marker, now.format(TIMESTAMP_FORMAT).to_string()) {
            error!("Failed to write startup marker {}: {}", self.startup_marker.display(), e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::store::{CheckpointState, LedgerRow};
    use tempfile::TempDir;

    fn write_checkpoint(engine: &Engine, start_voltage: f64, id: u64) {
        let state = CheckpointState {
            mission: Mission::open(id, minute(0), start_voltage, Some(40.0), 10),
            voltage_sum: 31.0,
            voltage_count: 2,
        };
        engine.state.lock().checkpoint.save(&state).unwrap();
    }

    fn write_last_row(engine: &Engine, voltage: f64, total_minutes: u64) {
        let row = LedgerRow {
            timestamp: minute(45),
            total_minutes,
            armed_minutes: total_minutes,
            disarmed_minutes: 0,
            dive_minutes: 0,
            battery_swaps: 0,
            startups: 1,
            voltage,
            cpu_temp: 52.0,
            depth: 0.0,
            current_battery_wh: 0.0,
            previous_batteries_wh: 0.0,
            total_wh_consumed: 0.0,
            time_status: TimeStatus::Normal,
        };
        let mut guard = engine.state.lock();
        guard.ledger.append(&row).unwrap();
        guard.stats.total_minutes = total_minutes;
        guard.stats.armed_minutes = total_minutes;
        guard.stats.last_voltage = voltage;
    }

    #[test]
    fn test_no_checkpoint_nothing_to_do() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        assert!(engine.reconcile(minute(60)).is_none());
        assert!(engine.missions().is_empty());
    }

    #[test]
    fn test_reconcile_then_offline_swap() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        write_checkpoint(&engine, 16.0, 1);
        write_last_row(&engine, 14.0, 55);

        let result = engine.reconcile(minute(60)).unwrap();
        assert!(result.pending_swap_check);
        assert_eq!(result.closed.start_voltage, 16.0);
        assert_eq!(result.closed.end_voltage, 14.0);
        assert_eq!(result.closed.end_time, Some(minute(45)));
        assert_eq!(result.closed.end_uptime, 55);
        assert_eq!(result.closed.end_cpu_temp, 52.0);

        assert_eq!(engine.missions(), vec![result.closed.clone()]);
        let stats = engine.stats();
        assert!(stats.pending_swap_check);
        assert_eq!(stats.last_voltage, 14.0);
        assert!(engine.state.lock().checkpoint.load().is_none());

        let report = engine.apply_tick(minute(61), &reading(16.2, 5.0, false), None);
        assert!(report.swap_detected);
        let stats = engine.stats();
        assert_eq!(stats.battery_swaps, 1);
        assert!(!stats.pending_swap_check);

        let current = engine.current_mission().unwrap();
        assert_eq!(current.id, 2);
        assert_eq!(current.start_voltage, 16.2);
    }

    #[test]
    fn test_pending_check_without_swap() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        write_checkpoint(&engine, 16.0, 1);
        write_last_row(&engine, 14.0, 55);
        engine.reconcile(minute(60));

        engine.apply_tick(minute(61), &reading(14.3, 2500.0, true), None);
        let stats = engine.stats();
        assert_eq!(stats.battery_swaps, 0);
        assert!(!stats.pending_swap_check, "flag clears regardless of outcome");
    }

    #[test]
    fn test_pending_check_waits_for_valid_voltage() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        write_checkpoint(&engine, 16.0, 1);
        write_last_row(&engine, 14.0, 55);
        engine.reconcile(minute(60));

        engine.apply_tick(minute(61), &crate::telemetry::VehicleSnapshot::unavailable(), None);
        assert!(engine.stats().pending_swap_check);

        engine.apply_tick(minute(62), &reading(16.3, 0.0, false), None);
        assert_eq!(engine.stats().battery_swaps, 1);
    }

    #[test]
    fn test_rising_voltage_does_not_arm_check() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        write_checkpoint(&engine, 15.0, 3);
        write_last_row(&engine, 15.2, 20);

        let result = engine.reconcile(minute(60)).unwrap();
        assert!(!result.pending_swap_check);
        assert!(!engine.stats().pending_swap_check);
    }

    #[test]
    fn test_reconcile_restores_accumulator() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        write_checkpoint(&engine, 15.5, 1);

        let result = engine.reconcile(minute(30)).unwrap();
        assert_eq!(result.closed.end_time, Some(minute(30)), "no ledger row: closed at now");

        let stats = engine.stats();
        assert_eq!(stats.voltage_sum, 31.0);
        assert_eq!(stats.voltage_count, 2);
    }

    #[test]
    fn test_reconcile_runs_once() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        write_checkpoint(&engine, 16.0, 1);
        assert!(engine.reconcile(minute(60)).is_some());
        assert!(engine.reconcile(minute(61)).is_none());
        assert_eq!(engine.missions().len(), 1);
    }

    #[test]
    fn test_cold_start_then_warm_restart() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.state.lock().stats.accumulate_voltage(16.0);

        assert!(engine.detect_startup(minute(0)));
        let stats = engine.stats();
        assert_eq!(stats.startups, 1);
        assert_eq!(stats.voltage_count, 0);

        let last = engine.state.lock().ledger.last_row().cloned().unwrap();
        assert_eq!(last.time_status, TimeStatus::Startup);
        assert_eq!(last.startups, 1);

        assert!(!engine.detect_startup(minute(1)));
        assert_eq!(engine.stats().startups, 1);
    }

    #[test]
    fn test_first_tick_after_cold_start_is_normal() {
        let dir = TempDir::new().unwrap();
        engine_in(&dir).apply_tick(minute(0), &reading(16.0, 0.0, false), None);

        let engine = engine_in(&dir);
        assert!(engine.detect_startup(minute(600)));
        let report = engine.apply_tick(minute(601), &reading(16.0, 0.0, false), None);
        assert_eq!(report.time_status, TimeStatus::Normal, "measured from the startup row");
    }
}
