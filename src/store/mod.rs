//! # Persistent Store
//!
//! File-backed persistence for the odometer.
//!
//! This module handles:
//! - The append-only tick ledger (CSV) and its schema migration chain
//! - The maintenance log (CSV)
//! - Versioned JSON side tables (thrusters, accessories, vehicle identity)
//! - Closed mission history (JSON lines) and the in-flight mission checkpoint
//!
//! Whole-file rewrites go through [`write_atomic`] (temp file + rename), so a
//! power cut leaves either the old or the new contents.

pub mod checkpoint;
pub mod ledger;
pub mod maintenance;
pub mod missions;
pub mod schema;
pub mod tables;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use checkpoint::{Checkpoint, CheckpointState};
pub use ledger::{Ledger, LedgerRow, TimeStatus};
pub use maintenance::MaintenanceLog;
pub use missions::MissionLog;
pub use tables::JsonTable;

pub const LEDGER_FILE: &str = "odometer.csv";
pub const MAINTENANCE_FILE: &str = "maintenance.csv";
pub const THRUSTERS_FILE: &str = "thrusters.json";
pub const ACCESSORIES_FILE: &str = "accessories.json";
pub const VEHICLE_FILE: &str = "vehicle.json";
pub const MISSIONS_FILE: &str = "missions.jsonl";
pub const CHECKPOINT_FILE: &str = "current_mission.json";

/// File locations inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    data_dir: PathBuf,
}

impl StoreLayout {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// Create the data directory if needed.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ledger(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE)
    }

    pub fn maintenance(&self) -> PathBuf {
        self.data_dir.join(MAINTENANCE_FILE)
    }

    pub fn thrusters(&self) -> PathBuf {
        self.data_dir.join(THRUSTERS_FILE)
    }

    pub fn accessories(&self) -> PathBuf {
        self.data_dir.join(ACCESSORIES_FILE)
    }

    pub fn vehicle(&self) -> PathBuf {
        self.data_dir.join(VEHICLE_FILE)
    }

    pub fn missions(&self) -> PathBuf {
        self.data_dir.join(MISSIONS_FILE)
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.data_dir.join(CHECKPOINT_FILE)
    }
}

/// `<path>.<suffix>`, keeping the original extension.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Replace `path` with `contents` via a temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = sibling(path, "tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Header and data rows of a CSV file, or `None` if it is missing or empty.
///
/// Rows are returned as raw strings; blank lines are skipped and rows of
/// any length are accepted so that validation can happen per schema.
pub fn read_records(path: &Path) -> Result<Option<(Vec<String>, Vec<Vec<String>>)>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record?
            .iter()
            .map(|cell| cell.trim_start_matches('\u{feff}').trim().to_string())
            .collect::<Vec<_>>(),
        None => return Ok(None),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Some((header, rows)))
}

/// Encode a header and rows as CSV text.
pub fn encode_records(header: &[&str], rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| crate::error::OdometerError::Io(e.into_error()))
}

/// Rewrite a whole CSV file atomically.
pub fn write_records(path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
    let contents = encode_records(header, rows)?;
    write_atomic(path, &contents)
}

/// Append one row, writing the header first if the file is new or empty.
pub fn append_record(path: &Path, header: &[&str], row: &[String]) -> Result<()> {
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if needs_header {
        writer.write_record(header)?;
    }
    writer.write_record(row)?;
    writer.flush()?;
    Ok(())
}

/// Contents of a CSV file for export, or just the header if it does not exist yet.
pub fn export_csv(path: &Path, header: &[&str]) -> Result<String> {
    if path.exists() {
        return Ok(fs::read_to_string(path)?);
    }
    let contents = encode_records(header, &[])?;
    Ok(String::from_utf8_lossy(&contents).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = StoreLayout::new("/app/data");
        assert_eq!(layout.ledger(), PathBuf::from("/app/data/odometer.csv"));
        assert_eq!(layout.checkpoint(), PathBuf::from("/app/data/current_mission.json"));
        assert_eq!(layout.missions(), PathBuf::from("/app/data/missions.jsonl"));
    }

    #[test]
    fn test_sibling_keeps_extension() {
        let path = Path::new("/data/odometer.csv");
        assert_eq!(sibling(path, "tmp"), PathBuf::from("/data/odometer.csv.tmp"));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!sibling(&path, "tmp").exists());
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.csv");
        let header = ["a", "b"];

        append_record(&path, &header, &["1".to_string(), "x".to_string()]).unwrap();
        append_record(&path, &header, &["2".to_string(), "y, z".to_string()]).unwrap();

        let (read_header, rows) = read_records(&path).unwrap().unwrap();
        assert_eq!(read_header, vec!["a", "b"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], "y, z");
    }

    #[test]
    fn test_read_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(read_records(&path).unwrap().is_none());

        fs::write(&path, "").unwrap();
        assert!(read_records(&path).unwrap().is_none());
    }

    #[test]
    fn test_read_skips_blank_lines_and_accepts_ragged_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "a,b,c\n1,2,3\n\n4,5\n").unwrap();

        let (_, rows) = read_records(&path).unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["4", "5"]);
    }

    #[test]
    fn test_export_missing_file_is_header_only() {
        let dir = TempDir::new().unwrap();
        let text = export_csv(&dir.path().join("none.csv"), &["a", "b"]).unwrap();
        assert_eq!(text, "a,b\n");
    }
}
