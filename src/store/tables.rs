//! # JSON Side Tables
//!
//! Small keyed tables stored as pretty JSON with a `schema_version` field
//! (absent means version 1). Each table type knows how to lift a raw document
//! one version at a time; the file is rewritten once after an upgrade.

use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use super::write_atomic;
use crate::error::{OdometerError, Result};
use crate::model::equipment::{
    ACCESSORY_TABLE_VERSION, THRUSTER_TABLE_VERSION, VEHICLE_TABLE_VERSION,
};
use crate::model::{AccessoryTable, ThrusterStats, VehicleInfo};

/// A side table with a versioned JSON representation.
pub trait VersionedTable: Serialize + DeserializeOwned + Default {
    /// Label used in log messages.
    const LABEL: &'static str;
    const CURRENT_VERSION: u32;

    /// Lift a document from `version` to `version + 1`.
    fn upgrade(version: u32, document: Value) -> Result<Value>;

    /// Fix-ups applied after every load.
    fn normalize(&mut self) {}
}

/// `schema_version` of a raw document; 1 when absent.
pub fn document_version(document: &Value) -> u32 {
    document
        .get("schema_version")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
}

fn schema(message: impl Into<String>) -> OdometerError {
    OdometerError::Schema(message.into())
}

fn object(document: Value, label: &str) -> Result<Map<String, Value>> {
    match document {
        Value::Object(map) => Ok(map),
        other => Err(schema(format!("{} is not an object: {}", label, other))),
    }
}

impl VersionedTable for ThrusterStats {
    const LABEL: &'static str = "thruster table";
    const CURRENT_VERSION: u32 = THRUSTER_TABLE_VERSION;

    fn upgrade(version: u32, document: Value) -> Result<Value> {
        match version {
            // {count, run_minutes: [..]}
            1 => {
                let map = object(document, Self::LABEL)?;
                let mut thrusters: Vec<Value> = map
                    .get("run_minutes")
                    .and_then(Value::as_array)
                    .map(|minutes| {
                        minutes
                            .iter()
                            .map(|m| json!({ "run_minutes": m.as_u64().unwrap_or(0) }))
                            .collect()
                    })
                    .unwrap_or_default();

                let count = map.get("count").and_then(Value::as_u64).unwrap_or(0) as usize;
                if count > thrusters.len() {
                    thrusters.resize(count, json!({ "run_minutes": 0 }));
                }

                Ok(json!({
                    "schema_version": 2,
                    "vehicle_type": null,
                    "thrusters": thrusters,
                }))
            }
            other => Err(schema(format!("no upgrade from {} v{}", Self::LABEL, other))),
        }
    }
}

impl VersionedTable for AccessoryTable {
    const LABEL: &'static str = "accessory table";
    const CURRENT_VERSION: u32 = ACCESSORY_TABLE_VERSION;

    fn upgrade(version: u32, document: Value) -> Result<Value> {
        match version {
            // bare array of {id, name, channel, run_minutes}
            1 => {
                let accessories = match document {
                    Value::Array(items) => items,
                    other => return Err(schema(format!("{} v1 is not an array: {}", Self::LABEL, other))),
                };
                let next_id = accessories
                    .iter()
                    .filter_map(|a| a.get("id").and_then(Value::as_u64))
                    .max()
                    .map_or(1, |id| id + 1);

                Ok(json!({
                    "schema_version": 2,
                    "next_id": next_id,
                    "accessories": accessories,
                }))
            }
            other => Err(schema(format!("no upgrade from {} v{}", Self::LABEL, other))),
        }
    }

    fn normalize(&mut self) {
        self.next_id = self.next_id.max(self.min_next_id());
        self.accessories.retain(|accessory| {
            let valid = accessory.has_valid_channel();
            if !valid {
                warn!(
                    "Dropping accessory {} '{}': channel {} is out of range",
                    accessory.id, accessory.name, accessory.channel
                );
            }
            valid
        });
    }
}

impl VersionedTable for VehicleInfo {
    const LABEL: &'static str = "vehicle identity";
    const CURRENT_VERSION: u32 = VEHICLE_TABLE_VERSION;

    fn upgrade(version: u32, document: Value) -> Result<Value> {
        match version {
            // {name}
            1 => {
                let map = object(document, Self::LABEL)?;
                let name = map.get("name").and_then(Value::as_str).unwrap_or_default();
                Ok(json!({
                    "schema_version": 2,
                    "name": name,
                    "model": "",
                    "serial_number": "",
                    "commissioned": null,
                }))
            }
            other => Err(schema(format!("no upgrade from {} v{}", Self::LABEL, other))),
        }
    }
}

/// File handle for one side table.
#[derive(Debug, Clone)]
pub struct JsonTable<T> {
    path: PathBuf,
    _table: PhantomData<T>,
}

impl<T: VersionedTable> JsonTable<T> {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            _table: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table, upgrading old versions.
    ///
    /// Never fails: a missing file yields defaults; an unreadable or
    /// unparseable one is logged and also yields defaults, leaving the file
    /// untouched until the next [`save`](Self::save).
    pub fn load(&self) -> T {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!("Cannot read {} {}: {}; using defaults", T::LABEL, self.path.display(), e);
                return T::default();
            }
        };

        match self.decode(&text) {
            Ok((mut table, upgraded)) => {
                table.normalize();
                if upgraded {
                    if let Err(e) = self.save(&table) {
                        error!("Failed to rewrite upgraded {}: {}", T::LABEL, e);
                    }
                }
                table
            }
            Err(e) => {
                warn!("Cannot parse {} {}: {}; using defaults", T::LABEL, self.path.display(), e);
                T::default()
            }
        }
    }

    fn decode(&self, text: &str) -> Result<(T, bool)> {
        let mut document: Value = serde_json::from_str(text)?;
        let mut version = document_version(&document);
        let original = version;

        if version > T::CURRENT_VERSION {
            return Err(schema(format!(
                "{} v{} is newer than supported v{}",
                T::LABEL,
                version,
                T::CURRENT_VERSION
            )));
        }

        while version < T::CURRENT_VERSION {
            document = T::upgrade(version, document)?;
            version += 1;
        }

        if original != version {
            info!("Migrated {} from v{} to v{}", T::LABEL, original, version);
        }

        Ok((serde_json::from_value(document)?, original != version))
    }

    pub fn save(&self, table: &T) -> Result<()> {
        let contents = serde_json::to_vec_pretty(table)?;
        write_atomic(&self.path, &contents)
    }
}
