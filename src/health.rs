//! # Health Reader
//!
//! Reads the companion computer's CPU temperature from the thermal zone file
//! (millidegrees Celsius, as exposed by Linux under `/sys/class/thermal`).

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Readings above this are treated as sensor faults.
const MAX_PLAUSIBLE_TEMP_C: f64 = 125.0;

/// CPU temperature sensor backed by a sysfs-style file.
#[derive(Debug, Clone)]
pub struct CpuTemperature {
    path: PathBuf,
}

impl CpuTemperature {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Current temperature in °C, rounded to 0.1.
    ///
    /// Returns `None` when the file is missing or unreadable, or when the
    /// value is zero, negative or implausibly high.
    pub fn read(&self) -> Option<f64> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read CPU temperature from {}: {}", self.path.display(), e);
                return None;
            }
        };

        parse_millidegrees(&raw)
    }
}

/// Convert a thermal zone reading into degrees, rejecting implausible values.
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    let millidegrees: f64 = match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!("Unparsable CPU temperature reading: {:?}", raw.trim());
            return None;
        }
    };

    let celsius = millidegrees / 1000.0;
    if celsius <= 0.0 || celsius > MAX_PLAUSIBLE_TEMP_C || !celsius.is_finite() {
        warn!("Invalid CPU temperature reading: {}°C", celsius);
        return None;
    }

    Some((celsius * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_valid_reading() {
        assert_eq!(parse_millidegrees("48312\n"), Some(48.3));
        assert_eq!(parse_millidegrees("125000"), Some(125.0));
    }

    #[test]
    fn test_parse_rejects_implausible() {
        assert_eq!(parse_millidegrees("0"), None);
        assert_eq!(parse_millidegrees("-5000"), None);
        assert_eq!(parse_millidegrees("130000"), None);
        assert_eq!(parse_millidegrees("warm"), None);
        assert_eq!(parse_millidegrees(""), None);
    }

    #[test]
    fn test_read_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "51234").unwrap();

        let sensor = CpuTemperature::new(file.path());
        assert_eq!(sensor.read(), Some(51.2));
    }

    #[test]
    fn test_missing_file() {
        let sensor = CpuTemperature::new("/nonexistent/thermal_zone0/temp");
        assert_eq!(sensor.read(), None);
    }
}
