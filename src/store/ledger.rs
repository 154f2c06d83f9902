//! # Tick Ledger
//!
//! Append-only CSV time series, one row per engine tick (plus one forced row
//! per cold start). The last valid row is the resume point for the in-memory
//! counters after a restart.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{info, warn};

use super::schema::{cell, load_current, CsvSchema, LedgerSchema};
use super::{append_record, export_csv, write_records};
use crate::error::Result;
use crate::telemetry::mavlink::parse_timestamp;

/// Timestamp format written to the ledger (naive local time, microseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// How a row's tick relates to the nominal interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeStatus {
    /// Elapsed time was within tolerance of the nominal interval.
    #[default]
    Normal,
    /// The wall clock jumped; the minute was still counted once.
    Corrected,
    /// Forced row written on a cold start.
    Startup,
}

impl TimeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Corrected => "corrected",
            Self::Startup => "startup",
        }
    }

    /// Unknown labels read back as `Normal`. A ` (startup)` suffix, as in
    /// `normal (startup)`, marks a startup row.
    pub fn parse(text: &str) -> Self {
        let label = text.trim().to_ascii_lowercase();
        if label.ends_with("(startup)") {
            return Self::Startup;
        }
        match label.as_str() {
            "corrected" => Self::Corrected,
            "startup" => Self::Startup,
            _ => Self::Normal,
        }
    }
}

impl fmt::Display for TimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row in the current layout.
///
/// `voltage` and `cpu_temp` use 0.0 for "no reading".
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub timestamp: NaiveDateTime,
    pub total_minutes: u64,
    pub armed_minutes: u64,
    pub disarmed_minutes: u64,
    pub dive_minutes: u64,
    pub battery_swaps: u64,
    pub startups: u64,
    pub voltage: f64,
    pub cpu_temp: f64,
    pub depth: f64,
    pub current_battery_wh: f64,
    pub previous_batteries_wh: f64,
    pub total_wh_consumed: f64,
    pub time_status: TimeStatus,
}

fn parse_count(text: &str) -> Option<u64> {
    text.parse::<u64>().ok().or_else(|| {
        let value = text.parse::<f64>().ok()?;
        (value.is_finite() && value >= 0.0 && value.fract() == 0.0).then_some(value as u64)
    })
}

fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Empty cells are "no reading"; anything else must be numeric.
fn parse_optional_float(text: &str) -> Option<f64> {
    if text.is_empty() {
        Some(0.0)
    } else {
        parse_float(text)
    }
}

impl LedgerRow {
    /// Parse a row in the current layout. `None` for malformed rows.
    pub fn from_record(record: &[String]) -> Option<Self> {
        let schema = LedgerSchema::CURRENT;
        let get = |name: &str| cell(record, schema.column(name).unwrap_or(usize::MAX));

        if record.iter().all(|c| c.trim().is_empty()) {
            return None;
        }

        Some(Self {
            timestamp: parse_timestamp(get("timestamp"))?,
            total_minutes: parse_count(get("total_minutes"))?,
            armed_minutes: parse_count(get("armed_minutes"))?,
            disarmed_minutes: parse_count(get("disarmed_minutes"))?,
            dive_minutes: parse_count(get("dive_minutes"))?,
            battery_swaps: parse_count(get("battery_swaps"))?,
            startups: parse_count(get("startups"))?,
            voltage: parse_float(get("voltage"))?,
            cpu_temp: parse_optional_float(get("cpu_temp"))?,
            depth: parse_optional_float(get("depth"))?,
            current_battery_wh: parse_float(get("current_battery_wh"))?,
            previous_batteries_wh: parse_float(get("previous_batteries_wh"))?,
            total_wh_consumed: parse_float(get("total_wh_consumed"))?,
            time_status: TimeStatus::parse(get("time_status")),
        })
    }

    pub fn to_record(&self) -> Vec<String> {
        vec![
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.total_minutes.to_string(),
            self.armed_minutes.to_string(),
            self.disarmed_minutes.to_string(),
            self.dive_minutes.to_string(),
            self.battery_swaps.to_string(),
            self.startups.to_string(),
            format!("{:.2}", self.voltage),
            format!("{:.1}", self.cpu_temp),
            format!("{:.2}", self.depth),
            format!("{:.3}", self.current_battery_wh),
            format!("{:.3}", self.previous_batteries_wh),
            format!("{:.3}", self.total_wh_consumed),
            self.time_status.to_string(),
        ]
    }
}

/// Parse every row, splitting valid rows from the number discarded.
fn parse_rows(records: &[Vec<String>]) -> (Vec<LedgerRow>, usize) {
    let rows: Vec<LedgerRow> = records.iter().filter_map(|r| LedgerRow::from_record(r)).collect();
    let discarded = records.len() - rows.len();
    (rows, discarded)
}

/// Handle on the ledger file.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    last_row: Option<LedgerRow>,
}

impl Ledger {
    /// Open (migrating and cleaning if needed) the ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be read or rewritten.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let records = load_current::<LedgerSchema>(&path, "ledger")?;
        let (rows, discarded) = parse_rows(&records);

        if discarded > 0 {
            warn!("Discarding {} malformed ledger rows", discarded);
            // Surviving rows are written back exactly as read.
            let kept: Vec<Vec<String>> = records
                .into_iter()
                .filter(|r| LedgerRow::from_record(r).is_some())
                .collect();
            write_records(&path, LedgerSchema::CURRENT.columns(), &kept)?;
        }

        let last_row = rows.last().cloned();
        if let Some(row) = &last_row {
            info!(
                "Ledger resumes at {} ({} total minutes, {} rows)",
                row.timestamp,
                row.total_minutes,
                rows.len()
            );
        }

        Ok(Self { path, last_row })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last valid row, the resume point for in-memory counters.
    pub fn last_row(&self) -> Option<&LedgerRow> {
        self.last_row.as_ref()
    }

    pub fn append(&mut self, row: &LedgerRow) -> Result<()> {
        append_record(&self.path, LedgerSchema::CURRENT.columns(), &row.to_record())?;
        self.last_row = Some(row.clone());
        Ok(())
    }

    /// All valid rows currently on disk.
    pub fn rows(&self) -> Result<Vec<LedgerRow>> {
        let records = load_current::<LedgerSchema>(&self.path, "ledger")?;
        Ok(parse_rows(&records).0)
    }

    /// Zero the sensor-derived columns (voltage, CPU temperature, depth) of
    /// every row, keeping the time counters. Returns the number of rows.
    pub fn clear_sensor_history(&mut self) -> Result<usize> {
        let mut rows = self.rows()?;
        for row in &mut rows {
            row.voltage = 0.0;
            row.cpu_temp = 0.0;
            row.depth = 0.0;
        }

        let records: Vec<Vec<String>> = rows.iter().map(LedgerRow::to_record).collect();
        write_records(&self.path, LedgerSchema::CURRENT.columns(), &records)?;
        self.last_row = rows.last().cloned();
        Ok(rows.len())
    }

    pub fn export_csv(&self) -> Result<String> {
        export_csv(&self.path, LedgerSchema::CURRENT.columns())
    }
}
