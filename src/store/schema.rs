//! # Schema Versions
//!
//! CSV files carry their schema implicitly in the header row. Each file type
//! enumerates its known versions; the version is detected once from the exact
//! header, then rows are walked up a table of single-step upgrades
//! (v1 → v2 → ... → current) and the file is rewritten once.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{read_records, sibling, write_records};
use crate::error::Result;

/// A family of CSV layouts with a linear upgrade chain.
pub trait CsvSchema: Copy + Eq + Debug + 'static {
    /// Every known version, oldest first.
    const ALL: &'static [Self];

    /// The version new files are written in.
    const CURRENT: Self;

    /// Column names, in file order.
    fn columns(self) -> &'static [&'static str];

    /// Convert one row of this version into the next version's layout.
    ///
    /// `index` is the row's position in the file. Rows have already been
    /// padded to `columns().len()`.
    fn upgrade_row(self, row: &[String], index: usize) -> Vec<String>;

    fn version(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).map_or(0, |p| p + 1)
    }

    fn next(self) -> Option<Self> {
        Self::ALL.get(self.version()).copied()
    }

    /// Match a header row exactly against the known layouts.
    fn detect(header: &[String]) -> Option<Self> {
        Self::ALL.iter().copied().find(|schema| {
            let columns = schema.columns();
            columns.len() == header.len() && columns.iter().zip(header).all(|(c, h)| c == h)
        })
    }

    /// Position of a named column.
    fn column(self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| *c == name)
    }
}

/// Cell `index` of a row, or `""` when the row is short.
pub fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map_or("", |c| c.trim())
}

/// Cell looked up by column name.
pub fn named<'a, S: CsvSchema>(schema: S, row: &'a [String], name: &str) -> &'a str {
    schema.column(name).map_or("", |index| cell(row, index))
}

fn fit(row: &[String], len: usize) -> Vec<String> {
    let mut row = row.to_vec();
    row.resize(len, String::new());
    row
}

/// Upgrade rows from `from` to the current layout.
///
/// Migrating rows already in the current layout returns them unchanged.
pub fn migrate<S: CsvSchema>(from: S, rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut schema = from;
    let mut rows = rows;
    while let Some(next) = schema.next() {
        let width = schema.columns().len();
        rows = rows
            .iter()
            .enumerate()
            .map(|(index, row)| schema.upgrade_row(&fit(row, width), index))
            .collect();
        schema = next;
    }
    rows
}

/// Where an unrecognised file is moved before starting fresh.
pub fn unrecognized_path(path: &Path) -> PathBuf {
    sibling(path, "unrecognized")
}

/// Load a CSV file's data rows in the current layout.
///
/// Old versions are migrated and the file is rewritten once. A file whose
/// header matches no known version is moved aside and treated as empty.
pub fn load_current<S: CsvSchema>(path: &Path, label: &str) -> Result<Vec<Vec<String>>> {
    let Some((header, rows)) = read_records(path)? else {
        return Ok(Vec::new());
    };

    match S::detect(&header) {
        Some(schema) if schema == S::CURRENT => Ok(rows),
        Some(schema) => {
            info!(
                "Migrating {} from schema v{} to v{} ({} rows)",
                label,
                schema.version(),
                S::CURRENT.version(),
                rows.len()
            );
            let rows = migrate(schema, rows);
            write_records(path, S::CURRENT.columns(), &rows)?;
            Ok(rows)
        }
        None => {
            let aside = unrecognized_path(path);
            warn!(
                "Unrecognized {} header {:?}; moving file to {} and starting fresh",
                label,
                header,
                aside.display()
            );
            fs::rename(path, &aside)?;
            Ok(Vec::new())
        }
    }
}

/// Ledger layouts, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSchema {
    V1,
    V2,
    V3,
    V4,
}

const LEDGER_V1: &[&str] = &[
    "timestamp",
    "total_minutes",
    "armed_minutes",
    "disarmed_minutes",
    "battery_swaps",
    "voltage",
];

const LEDGER_V2: &[&str] = &[
    "timestamp",
    "total_minutes",
    "armed_minutes",
    "disarmed_minutes",
    "battery_swaps",
    "startups",
    "voltage",
    "cpu_temp",
];

const LEDGER_V3: &[&str] = &[
    "timestamp",
    "total_minutes",
    "armed_minutes",
    "disarmed_minutes",
    "battery_swaps",
    "startups",
    "voltage",
    "cpu_temp",
    "mah_consumed",
    "time_status",
];

const LEDGER_V4: &[&str] = &[
    "timestamp",
    "total_minutes",
    "armed_minutes",
    "disarmed_minutes",
    "dive_minutes",
    "battery_swaps",
    "startups",
    "voltage",
    "cpu_temp",
    "depth",
    "current_battery_wh",
    "previous_batteries_wh",
    "total_wh_consumed",
    "time_status",
];

impl CsvSchema for LedgerSchema {
    const ALL: &'static [Self] = &[Self::V1, Self::V2, Self::V3, Self::V4];
    const CURRENT: Self = Self::V4;

    fn columns(self) -> &'static [&'static str] {
        match self {
            Self::V1 => LEDGER_V1,
            Self::V2 => LEDGER_V2,
            Self::V3 => LEDGER_V3,
            Self::V4 => LEDGER_V4,
        }
    }

    fn upgrade_row(self, row: &[String], _index: usize) -> Vec<String> {
        let get = |name: &str| named(self, row, name).to_string();
        match self {
            Self::V1 => vec![
                get("timestamp"),
                get("total_minutes"),
                get("armed_minutes"),
                get("disarmed_minutes"),
                get("battery_swaps"),
                "0".to_string(),
                get("voltage"),
                String::new(),
            ],
            Self::V2 => {
                let mut next = row.to_vec();
                next.push("0.0".to_string());
                next.push("normal".to_string());
                next
            }
            Self::V3 => {
                let voltage: f64 = get("voltage").parse().unwrap_or(0.0);
                let mah: f64 = get("mah_consumed").parse().unwrap_or(0.0);
                let wh = format!("{:.3}", mah.abs() / 1000.0 * voltage.max(0.0));
                vec![
                    get("timestamp"),
                    get("total_minutes"),
                    get("armed_minutes"),
                    get("disarmed_minutes"),
                    "0".to_string(),
                    get("battery_swaps"),
                    get("startups"),
                    get("voltage"),
                    get("cpu_temp"),
                    "0.0".to_string(),
                    wh.clone(),
                    "0.0".to_string(),
                    wh,
                    get("time_status"),
                ]
            }
            Self::V4 => row.to_vec(),
        }
    }
}
