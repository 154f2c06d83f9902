//! # Maintenance Records
//!
//! Operator-entered log of service events. A record may name thrusters or an
//! accessory whose run accumulators were reset as part of the service.

use serde::{Deserialize, Serialize};

use crate::error::{OdometerError, Result};
use crate::telemetry::mavlink::parse_timestamp;

/// One maintenance log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    /// Surrogate key for edits and deletes; timestamps are not unique.
    pub id: u64,
    pub timestamp: String,
    pub event_type: String,
    pub details: String,
    /// 1-based thruster numbers this record concerns.
    #[serde(default)]
    pub thruster_ids: Vec<usize>,
    #[serde(default)]
    pub reset_thrusters: bool,
    #[serde(default)]
    pub accessory_id: Option<u64>,
    #[serde(default)]
    pub reset_accessory: bool,
}

/// Fields supplied by the operator when adding a record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewMaintenanceRecord {
    /// Defaults to "now" when absent.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub thruster_ids: Vec<usize>,
    #[serde(default)]
    pub reset_thrusters: bool,
    #[serde(default)]
    pub accessory_id: Option<u64>,
    #[serde(default)]
    pub reset_accessory: bool,
}

impl NewMaintenanceRecord {
    /// # Errors
    ///
    /// Returns `InvalidInput` when the event type or details are blank, or
    /// the timestamp does not parse.
    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(OdometerError::InvalidInput("event_type is required".into()));
        }
        if self.details.trim().is_empty() {
            return Err(OdometerError::InvalidInput("details are required".into()));
        }
        if let Some(timestamp) = &self.timestamp {
            validate_timestamp(timestamp)?;
        }
        if self.thruster_ids.contains(&0) {
            return Err(OdometerError::InvalidInput("thruster numbers start at 1".into()));
        }
        if self.reset_accessory && self.accessory_id.is_none() {
            return Err(OdometerError::InvalidInput(
                "reset_accessory requires accessory_id".into(),
            ));
        }
        Ok(())
    }
}

/// Partial update of an existing record.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MaintenanceUpdate {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl MaintenanceUpdate {
    pub fn validate(&self) -> Result<()> {
        if self.timestamp.is_none() && self.event_type.is_none() && self.details.is_none() {
            return Err(OdometerError::InvalidInput("nothing to update".into()));
        }
        if let Some(timestamp) = &self.timestamp {
            validate_timestamp(timestamp)?;
        }
        for (field, value) in [("event_type", &self.event_type), ("details", &self.details)] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(OdometerError::InvalidInput(format!("{} cannot be blank", field)));
            }
        }
        Ok(())
    }

    pub fn apply(&self, record: &mut MaintenanceRecord) {
        if let Some(timestamp) = &self.timestamp {
            record.timestamp = timestamp.trim().to_string();
        }
        if let Some(event_type) = &self.event_type {
            record.event_type = event_type.trim().to_string();
        }
        if let Some(details) = &self.details {
            record.details = details.trim().to_string();
        }
    }
}

fn validate_timestamp(timestamp: &str) -> Result<()> {
    parse_timestamp(timestamp)
        .map(|_| ())
        .ok_or_else(|| OdometerError::InvalidInput(format!("unparsable timestamp {:?}", timestamp)))
}
