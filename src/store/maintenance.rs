//! # Maintenance Log Store
//!
//! CSV-backed list of [`MaintenanceRecord`]s. Records are addressed by a
//! surrogate id; older files (keyed by timestamp only) get ids assigned in
//! file order when migrated.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::warn;

use super::ledger::TIMESTAMP_FORMAT;
use super::schema::{load_current, named, CsvSchema};
use super::{append_record, export_csv, write_records};
use crate::error::{OdometerError, Result};
use crate::model::{MaintenanceRecord, MaintenanceUpdate, NewMaintenanceRecord};

/// Maintenance log layouts, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceSchema {
    V1,
    V2,
    V3,
}

const MAINTENANCE_V1: &[&str] = &["timestamp", "event_type", "details"];

const MAINTENANCE_V2: &[&str] = &[
    "timestamp",
    "event_type",
    "details",
    "thruster_ids",
    "reset_thrusters",
    "accessory_id",
    "reset_accessory",
];

const MAINTENANCE_V3: &[&str] = &[
    "id",
    "timestamp",
    "event_type",
    "details",
    "thruster_ids",
    "reset_thrusters",
    "accessory_id",
    "reset_accessory",
];

impl CsvSchema for MaintenanceSchema {
    const ALL: &'static [Self] = &[Self::V1, Self::V2, Self::V3];
    const CURRENT: Self = Self::V3;

    fn columns(self) -> &'static [&'static str] {
        match self {
            Self::V1 => MAINTENANCE_V1,
            Self::V2 => MAINTENANCE_V2,
            Self::V3 => MAINTENANCE_V3,
        }
    }

    fn upgrade_row(self, row: &[String], index: usize) -> Vec<String> {
        match self {
            Self::V1 => {
                let mut next = row.to_vec();
                next.extend(["", "false", "", "false"].map(String::from));
                next
            }
            Self::V2 => {
                let mut next = vec![(index + 1).to_string()];
                next.extend_from_slice(row);
                next
            }
            Self::V3 => row.to_vec(),
        }
    }
}

fn parse_flag(text: &str) -> bool {
    matches!(text.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Thruster numbers are stored as `1;3;4`.
fn parse_thruster_ids(text: &str) -> Option<Vec<usize>> {
    text.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

fn format_thruster_ids(ids: &[usize]) -> String {
    ids.iter().map(usize::to_string).collect::<Vec<_>>().join(";")
}

fn record_from_row(row: &[String]) -> Option<MaintenanceRecord> {
    let schema = MaintenanceSchema::CURRENT;
    let get = |name: &str| named(schema, row, name);

    let accessory_id = match get("accessory_id") {
        "" => None,
        text => Some(text.parse().ok()?),
    };
    let record = MaintenanceRecord {
        id: get("id").parse().ok()?,
        timestamp: get("timestamp").to_string(),
        event_type: get("event_type").to_string(),
        details: get("details").to_string(),
        thruster_ids: parse_thruster_ids(get("thruster_ids"))?,
        reset_thrusters: parse_flag(get("reset_thrusters")),
        accessory_id,
        reset_accessory: parse_flag(get("reset_accessory")),
    };

    (!record.timestamp.is_empty() && !record.event_type.is_empty()).then_some(record)
}

fn record_to_row(record: &MaintenanceRecord) -> Vec<String> {
    vec![
        record.id.to_string(),
        record.timestamp.clone(),
        record.event_type.clone(),
        record.details.clone(),
        format_thruster_ids(&record.thruster_ids),
        record.reset_thrusters.to_string(),
        record.accessory_id.map(|id| id.to_string()).unwrap_or_default(),
        record.reset_accessory.to_string(),
    ]
}

/// In-memory copy of the maintenance log, kept in sync with its file.
#[derive(Debug)]
pub struct MaintenanceLog {
    path: PathBuf,
    records: Vec<MaintenanceRecord>,
    next_id: u64,
}

impl MaintenanceLog {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let rows = load_current::<MaintenanceSchema>(&path, "maintenance log")?;
        let records: Vec<MaintenanceRecord> = rows.iter().filter_map(|r| record_from_row(r)).collect();

        let log = Self {
            next_id: records.iter().map(|r| r.id + 1).max().unwrap_or(1),
            path,
            records,
        };

        if log.records.len() != rows.len() {
            warn!("Discarding {} malformed maintenance rows", rows.len() - log.records.len());
            log.rewrite(&log.records)?;
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[MaintenanceRecord] {
        &self.records
    }

    pub fn get(&self, id: u64) -> Option<&MaintenanceRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Validate and append a record. `now` fills a missing timestamp.
    pub fn add(&mut self, new: NewMaintenanceRecord, now: NaiveDateTime) -> Result<MaintenanceRecord> {
        new.validate()?;

        let record = MaintenanceRecord {
            id: self.next_id,
            timestamp: new
                .timestamp
                .map(|t| t.trim().to_string())
                .unwrap_or_else(|| now.format(TIMESTAMP_FORMAT).to_string()),
            event_type: new.event_type.trim().to_string(),
            details: new.details.trim().to_string(),
            thruster_ids: new.thruster_ids,
            reset_thrusters: new.reset_thrusters,
            accessory_id: new.accessory_id,
            reset_accessory: new.reset_accessory,
        };

        append_record(&self.path, MaintenanceSchema::CURRENT.columns(), &record_to_row(&record))?;
        self.next_id += 1;
        self.records.push(record.clone());
        Ok(record)
    }

    /// Edit a record in place and rewrite the file.
    pub fn update(&mut self, id: u64, update: &MaintenanceUpdate) -> Result<MaintenanceRecord> {
        update.validate()?;
        let position = self.position(id)?;

        let mut records = self.records.clone();
        update.apply(&mut records[position]);
        self.rewrite(&records)?;
        self.records = records;
        Ok(self.records[position].clone())
    }

    pub fn delete(&mut self, id: u64) -> Result<MaintenanceRecord> {
        let position = self.position(id)?;

        let mut records = self.records.clone();
        let removed = records.remove(position);
        self.rewrite(&records)?;
        self.records = records;
        Ok(removed)
    }

    pub fn export_csv(&self) -> Result<String> {
        export_csv(&self.path, MaintenanceSchema::CURRENT.columns())
    }

    fn position(&self, id: u64) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| OdometerError::NotFound(format!("maintenance record {}", id)))
    }

    fn rewrite(&self, records: &[MaintenanceRecord]) -> Result<()> {
        let rows: Vec<Vec<String>> = records.iter().map(record_to_row).collect();
        write_records(&self.path, MaintenanceSchema::CURRENT.columns(), &rows)
    }
}
