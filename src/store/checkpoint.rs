//! # Mission Checkpoint
//!
//! The active mission and the battery voltage accumulator, rewritten
//! atomically every tick. Its presence at startup means the previous run
//! ended with a mission still open.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::write_atomic;
use crate::error::Result;
use crate::model::Mission;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub mission: Mission,
    #[serde(default)]
    pub voltage_sum: f64,
    #[serde(default)]
    pub voltage_count: u64,
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved state, or `None` if there is none or it cannot be parsed.
    pub fn load(&self) -> Option<CheckpointState> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&text) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring corrupt checkpoint {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, state: &CheckpointState) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec(state)?)
    }

    /// Remove the checkpoint; a missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn state() -> CheckpointState {
        let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        CheckpointState {
            mission: Mission::open(3, start, 16.0, Some(40.0), 100),
            voltage_sum: 47.4,
            voltage_count: 3,
        }
    }

    #[test]
    fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("current_mission.json"));
        assert!(checkpoint.load().is_none());

        checkpoint.save(&state()).unwrap();
        assert_eq!(checkpoint.load(), Some(state()));

        checkpoint.clear().unwrap();
        assert!(checkpoint.load().is_none());
        checkpoint.clear().unwrap();
    }

    #[test]
    fn test_corrupt_checkpoint_ignored() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("current_mission.json"));
        fs::write(checkpoint.path(), "{\"mission\": 12").unwrap();
        assert!(checkpoint.load().is_none());
    }

    #[test]
    fn test_accumulator_defaults_when_absent() {
        let dir = TempDir::new().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("current_mission.json"));
        let mission = serde_json::to_value(&state().mission).unwrap();
        fs::write(checkpoint.path(), serde_json::json!({ "mission": mission }).to_string()).unwrap();

        let loaded = checkpoint.load().unwrap();
        assert_eq!(loaded.voltage_count, 0);
        assert_eq!(loaded.voltage_sum, 0.0);
    }
}
