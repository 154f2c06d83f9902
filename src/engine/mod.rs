//! # Accounting Engine
//!
//! The single owner of all odometer state.
//!
//! State is split into independently locked groups so the once-a-minute tick
//! and the few-seconds duty sampler never serialize on unrelated data:
//!
//! - counters, mission history, ledger and checkpoint
//! - thruster accumulators
//! - accessory accumulators
//! - vehicle identity
//! - maintenance log
//!
//! No lock is ever held across an `.await`, and no method takes two of these
//! locks at the same time.

pub mod reconcile;
pub mod sampler;
pub mod tick;

use std::path::PathBuf;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::{Config, EngineConfig};
use crate::error::{OdometerError, Result};
use crate::health::CpuTemperature;
use crate::model::{
    Accessory, AccessoryTable, HardUseLimits, MaintenanceRecord, MaintenanceUpdate, Mission,
    NewMaintenanceRecord, OdometerStats, ThrusterStats, ThrusterSummary, VehicleInfo,
};
use crate::store::tables::VersionedTable;
use crate::store::{Checkpoint, JsonTable, Ledger, MaintenanceLog, MissionLog, StoreLayout};

pub use reconcile::Reconciliation;
pub use tick::TickReport;

/// Current local wall-clock time.
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Counters, missions and the files that record them.
#[derive(Debug)]
pub(crate) struct OdometerState {
    pub stats: OdometerStats,
    pub current: Option<Mission>,
    pub history: MissionLog,
    pub ledger: Ledger,
    pub checkpoint: Checkpoint,
    pub last_tick: Option<NaiveDateTime>,
    pub next_mission_id: u64,
}

impl OdometerState {
    pub fn allocate_mission_id(&mut self) -> u64 {
        let id = self.next_mission_id;
        self.next_mission_id += 1;
        id
    }
}

/// An in-memory table paired with the file it is saved to.
#[derive(Debug)]
pub(crate) struct Persisted<T> {
    pub value: T,
    table: JsonTable<T>,
}

impl<T: VersionedTable + Clone> Persisted<T> {
    fn load(table: JsonTable<T>) -> Self {
        Self {
            value: table.load(),
            table,
        }
    }

    pub fn save(&self) -> Result<()> {
        self.table.save(&self.value)
    }

    /// Apply `change` to a copy, save it, then commit. On any error the
    /// in-memory table is left as it was.
    fn update<R>(&mut self, change: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut next = self.value.clone();
        let result = change(&mut next)?;
        self.table.save(&next)?;
        self.value = next;
        Ok(result)
    }
}

/// The accounting engine. Shared between the background loops and any
/// presentation layer behind an `Arc`.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    limits: HardUseLimits,
    neutral_pwm: u16,
    health: CpuTemperature,
    startup_marker: PathBuf,
    state: Mutex<OdometerState>,
    thrusters: Mutex<Persisted<ThrusterStats>>,
    accessories: Mutex<Persisted<AccessoryTable>>,
    vehicle: Mutex<Persisted<VehicleInfo>>,
    maintenance: Mutex<MaintenanceLog>,
}

impl Engine {
    /// Open every store under the configured data directory, migrating old
    /// files, and restore the counters from the last valid ledger row.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created, or the
    /// ledger, maintenance log or mission history exists but cannot be read.
    pub fn open(config: &Config) -> Result<Self> {
        let layout = StoreLayout::new(&config.storage.data_dir);
        layout.ensure()?;
        info!("Opening odometer data in {}", layout.data_dir().display());

        let ledger = Ledger::open(layout.ledger())?;
        let history = MissionLog::open(layout.missions())?;

        let mut stats = OdometerStats::default();
        let last_tick = ledger.last_row().map(|row| row.timestamp);
        if let Some(row) = ledger.last_row() {
            stats.total_minutes = row.total_minutes;
            stats.armed_minutes = row.armed_minutes;
            stats.disarmed_minutes = row.disarmed_minutes;
            stats.dive_minutes = row.dive_minutes;
            stats.battery_swaps = row.battery_swaps;
            stats.startups = row.startups;
            stats.last_voltage = row.voltage;
            stats.cpu_temp = row.cpu_temp;
            stats.last_depth = row.depth;
            stats.restore_energy(row.previous_batteries_wh, row.current_battery_wh);

            if stats.total_minutes != stats.armed_minutes + stats.disarmed_minutes {
                warn!(
                    "Ledger counters disagree ({} total, {} armed, {} disarmed); keeping armed/disarmed split",
                    stats.total_minutes, stats.armed_minutes, stats.disarmed_minutes
                );
                stats.total_minutes = stats.armed_minutes + stats.disarmed_minutes;
            }
        }

        let mut thrusters: Persisted<ThrusterStats> = Persisted::load(JsonTable::new(layout.thrusters()));
        if let Some(count) = config.engine.thruster_count {
            thrusters.value.resize(count);
        }

        let state = OdometerState {
            stats,
            current: None,
            next_mission_id: history.next_id(),
            history,
            ledger,
            checkpoint: Checkpoint::new(layout.checkpoint()),
            last_tick,
        };

        Ok(Self {
            config: config.engine.clone(),
            limits: HardUseLimits {
                voltage_drop: config.engine.hard_use_voltage_drop_v,
                pwm_deviation: config.engine.hard_use_pwm_deviation,
            },
            neutral_pwm: config.sampler.neutral_pwm,
            health: CpuTemperature::new(&config.health.cpu_temp_path),
            startup_marker: config.storage.startup_marker.clone(),
            state: Mutex::new(state),
            thrusters: Mutex::new(thrusters),
            accessories: Mutex::new(Persisted::load(JsonTable::new(layout.accessories()))),
            vehicle: Mutex::new(Persisted::load(JsonTable::new(layout.vehicle()))),
            maintenance: Mutex::new(MaintenanceLog::open(layout.maintenance())?),
        })
    }

    pub fn limits(&self) -> HardUseLimits {
        self.limits
    }

    pub fn stats(&self) -> OdometerStats {
        self.state.lock().stats.clone()
    }

    pub fn current_mission(&self) -> Option<Mission> {
        self.state.lock().current.clone()
    }

    /// Closed missions, oldest first.
    pub fn missions(&self) -> Vec<Mission> {
        self.state.lock().history.all().to_vec()
    }

    pub fn thrusters(&self) -> Vec<ThrusterSummary> {
        self.thrusters.lock().value.summaries()
    }

    pub fn thruster_stats(&self) -> ThrusterStats {
        self.thrusters.lock().value.clone()
    }

    pub fn reset_thruster(&self, number: usize) -> Result<()> {
        self.thrusters.lock().update(|t| t.reset(number))?;
        info!("Thruster {} run accumulators reset", number);
        Ok(())
    }

    pub fn accessories(&self) -> Vec<Accessory> {
        self.accessories.lock().value.accessories.clone()
    }

    pub fn add_accessory(&self, name: &str, channel: u8) -> Result<Accessory> {
        let accessory = self.accessories.lock().update(|t| t.add(name, channel))?;
        info!("Accessory {} '{}' added on channel {}", accessory.id, accessory.name, accessory.channel);
        Ok(accessory)
    }

    pub fn rename_accessory(&self, id: u64, name: &str) -> Result<Accessory> {
        self.accessories.lock().update(|t| t.rename(id, name))
    }

    pub fn remove_accessory(&self, id: u64) -> Result<Accessory> {
        let removed = self.accessories.lock().update(|t| t.remove(id))?;
        info!("Accessory {} '{}' removed", removed.id, removed.name);
        Ok(removed)
    }

    pub fn reset_accessory(&self, id: u64) -> Result<()> {
        self.accessories.lock().update(|t| t.reset(id))?;
        info!("Accessory {} run accumulators reset", id);
        Ok(())
    }

    pub fn vehicle(&self) -> VehicleInfo {
        self.vehicle.lock().value.clone()
    }

    pub fn set_vehicle(&self, info: VehicleInfo) -> Result<VehicleInfo> {
        self.vehicle.lock().update(|current| {
            *current = VehicleInfo {
                schema_version: VehicleInfo::CURRENT_VERSION,
                ..info
            };
            Ok(current.clone())
        })
    }

    pub fn maintenance(&self) -> Vec<MaintenanceRecord> {
        self.maintenance.lock().list().to_vec()
    }

    /// Log a maintenance event, then apply any run-accumulator resets it
    /// carries. References are checked before anything is written.
    pub fn add_maintenance(&self, new: NewMaintenanceRecord) -> Result<MaintenanceRecord> {
        new.validate()?;

        if new.reset_thrusters {
            let count = self.thrusters.lock().value.count();
            if let Some(bad) = new.thruster_ids.iter().find(|&&n| n > count) {
                return Err(OdometerError::InvalidInput(format!(
                    "thruster {} does not exist ({} configured)",
                    bad, count
                )));
            }
        }
        if let Some(id) = new.accessory_id {
            if self.accessories.lock().value.get(id).is_none() {
                return Err(OdometerError::NotFound(format!("accessory {}", id)));
            }
        }

        let record = self.maintenance.lock().add(new, local_now())?;
        info!("Maintenance record {} added: {}", record.id, record.event_type);

        if record.reset_thrusters {
            for &number in &record.thruster_ids {
                if let Err(e) = self.reset_thruster(number) {
                    error!("Failed to reset thruster {} for record {}: {}", number, record.id, e);
                }
            }
        }
        if let (true, Some(id)) = (record.reset_accessory, record.accessory_id) {
            if let Err(e) = self.reset_accessory(id) {
                error!("Failed to reset accessory {} for record {}: {}", id, record.id, e);
            }
        }

        Ok(record)
    }

    pub fn update_maintenance(&self, id: u64, update: &MaintenanceUpdate) -> Result<MaintenanceRecord> {
        self.maintenance.lock().update(id, update)
    }

    pub fn delete_maintenance(&self, id: u64) -> Result<MaintenanceRecord> {
        self.maintenance.lock().delete(id)
    }

    /// Zero the sensor-derived ledger history (voltage, CPU temperature,
    /// depth) while keeping every time counter. Returns the rows rewritten.
    pub fn clear_history(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let rows = state.ledger.clear_sensor_history()?;

        let stats = &mut state.stats;
        stats.last_voltage = 0.0;
        stats.last_depth = 0.0;
        stats.cpu_temp = 0.0;
        stats.last_current_consumed = 0.0;
        stats.reset_voltage_average(None);

        info!("Cleared sensor history from {} ledger rows", rows);
        Ok(rows)
    }

    pub fn export_ledger_csv(&self) -> Result<String> {
        self.state.lock().ledger.export_csv()
    }

    pub fn export_maintenance_csv(&self) -> Result<String> {
        self.maintenance.lock().export_csv()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_fresh_directory() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        assert_eq!(engine.stats(), OdometerStats::default());
        assert!(engine.current_mission().is_none());
        assert!(engine.missions().is_empty());
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn test_open_restores_counters_from_ledger() {
        let dir = TempDir::new().unwrap();
        {
            let engine = engine_in(&dir);
            engine.apply_tick(minute(1), &reading(16.0, 500.0, true), Some(45.0));
            engine.apply_tick(minute(2), &reading(15.9, 1000.0, false), Some(46.0));
        }

        let engine = engine_in(&dir);
        let stats = engine.stats();
        assert_eq!(stats.total_minutes, 2);
        assert_eq!(stats.armed_minutes, 1);
        assert_eq!(stats.disarmed_minutes, 1);
        assert_eq!(stats.last_voltage, 15.9);
        assert_eq!(stats.cpu_temp, 46.0);
        assert!(stats.total_wh_consumed() > 0.0);
        assert_eq!(stats.voltage_count, 0, "accumulator comes from the checkpoint, not the ledger");
    }

    #[test]
    fn test_restart_gap_is_classified() {
        let dir = TempDir::new().unwrap();
        engine_in(&dir).apply_tick(minute(1), &reading(16.0, 0.0, true), None);

        let engine = engine_in(&dir);
        let report = engine.apply_tick(minute(45), &reading(16.0, 0.0, true), None);
        assert_eq!(report.elapsed, Some(chrono::Duration::minutes(44)));
        assert_eq!(report.time_status, crate::store::TimeStatus::Corrected);
        assert_eq!(engine.stats().total_minutes, 2);

        let engine = engine_in(&dir);
        let report = engine.apply_tick(minute(46), &reading(16.0, 0.0, true), None);
        assert_eq!(report.time_status, crate::store::TimeStatus::Normal);
    }

    #[test]
    fn test_thruster_count_override() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.engine.thruster_count = Some(8);
        let engine = Engine::open(&config).unwrap();
        assert_eq!(engine.thrusters().len(), 8);

        engine.apply_tick(minute(1), &reading(16.0, 0.0, true), None);
        assert_eq!(engine.thrusters().len(), 8, "override wins over detected vehicle type");
    }

    #[test]
    fn test_accessory_operations_persist() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);

        let lights = engine.add_accessory("Lights", 9).unwrap();
        engine.rename_accessory(lights.id, "Lumens").unwrap();
        assert!(matches!(engine.add_accessory("", 3), Err(OdometerError::InvalidInput(_))));
        assert!(matches!(engine.add_accessory("Gripper", 17), Err(OdometerError::InvalidInput(_))));

        let reopened = engine_in(&dir);
        let accessories = reopened.accessories();
        assert_eq!(accessories.len(), 1);
        assert_eq!(accessories[0].name, "Lumens");

        reopened.remove_accessory(lights.id).unwrap();
        assert!(reopened.accessories().is_empty());
        assert!(matches!(reopened.remove_accessory(lights.id), Err(OdometerError::NotFound(_))));
    }

    #[test]
    fn test_vehicle_identity_round_trip() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);

        let info = VehicleInfo {
            schema_version: 0,
            name: "Nautilus".into(),
            model: "BlueROV2 Heavy".into(),
            serial_number: "BR-0042".into(),
            commissioned: None,
        };
        let saved = engine.set_vehicle(info).unwrap();
        assert_eq!(saved.schema_version, VehicleInfo::CURRENT_VERSION);
        assert_eq!(engine_in(&dir).vehicle().model, "BlueROV2 Heavy");
    }

    #[test]
    fn test_maintenance_reset_applies_to_equipment() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        let lights = engine.add_accessory("Lights", 9).unwrap();
        engine.apply_tick(minute(1), &reading(16.0, 0.0, true), None);
        engine.apply_tick(minute(2), &reading(16.0, 0.0, true), None);

        let record = engine
            .add_maintenance(NewMaintenanceRecord {
                event_type: "Thruster service".into(),
                details: "Bearings on 2 and 3, lamp housing".into(),
                thruster_ids: vec![2, 3],
                reset_thrusters: true,
                accessory_id: Some(lights.id),
                reset_accessory: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.id, 1);

        let thrusters = engine.thrusters();
        assert_eq!(thrusters[0].run_minutes, 2);
        assert_eq!(thrusters[1].run_minutes, 0);
        assert_eq!(thrusters[2].run_minutes, 0);
        assert_eq!(engine.accessories()[0].duty.run_minutes, 0);
    }

    #[test]
    fn test_maintenance_rejects_unknown_references() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);

        let result = engine.add_maintenance(NewMaintenanceRecord {
            event_type: "Service".into(),
            details: "x".into(),
            thruster_ids: vec![7],
            reset_thrusters: true,
            ..Default::default()
        });
        assert!(matches!(result, Err(OdometerError::InvalidInput(_))));

        let result = engine.add_maintenance(NewMaintenanceRecord {
            event_type: "Service".into(),
            details: "x".into(),
            accessory_id: Some(4),
            ..Default::default()
        });
        assert!(matches!(result, Err(OdometerError::NotFound(_))));
        assert!(engine.maintenance().is_empty());
    }

    #[test]
    fn test_maintenance_update_delete_export() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        let record = engine
            .add_maintenance(NewMaintenanceRecord {
                event_type: "Inspection".into(),
                details: "Pre-dive".into(),
                ..Default::default()
            })
            .unwrap();

        let update = MaintenanceUpdate {
            event_type: Some("Pre-dive inspection".into()),
            ..Default::default()
        };
        engine.update_maintenance(record.id, &update).unwrap();
        assert!(engine.export_maintenance_csv().unwrap().contains("Pre-dive inspection"));

        engine.delete_maintenance(record.id).unwrap();
        assert!(engine.maintenance().is_empty());
        assert!(matches!(
            engine.delete_maintenance(record.id),
            Err(OdometerError::NotFound(_))
        ));
    }

    #[test]
    fn test_clear_history_keeps_time_counters() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.apply_tick(minute(1), &reading(16.0, 100.0, true), Some(50.0));
        engine.apply_tick(minute(2), &reading(15.8, 200.0, true), Some(51.0));

        assert_eq!(engine.clear_history().unwrap(), 2);

        let stats = engine.stats();
        assert_eq!(stats.total_minutes, 2);
        assert_eq!(stats.armed_minutes, 2);
        assert_eq!(stats.last_voltage, 0.0);
        assert_eq!(stats.voltage_count, 0);

        let export = engine.export_ledger_csv().unwrap();
        let last = export.lines().last().unwrap();
        assert!(!last.contains(",15.80,"));
        assert!(last.contains(",0.00,0.0,0.00,"));
    }
}
