//! Closed mission history, one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::model::Mission;

#[derive(Debug)]
pub struct MissionLog {
    path: PathBuf,
    missions: Vec<Mission>,
}

impl MissionLog {
    /// Load history from `path`, skipping lines that do not parse.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut missions = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Mission>(line) {
                Ok(mission) => missions.push(mission),
                Err(e) => warn!("Skipping malformed mission on line {}: {}", number + 1, e),
            }
        }

        Ok(Self { path, missions })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn all(&self) -> &[Mission] {
        &self.missions
    }

    /// Smallest id not used by any stored mission.
    pub fn next_id(&self) -> u64 {
        self.missions.iter().map(|m| m.id + 1).max().unwrap_or(1)
    }

    /// Record a closed mission.
    ///
    /// The mission joins the in-memory history even if the file write fails.
    pub fn append(&mut self, mission: Mission) -> Result<()> {
        let line = serde_json::to_string(&mission)?;
        self.missions.push(mission);

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
