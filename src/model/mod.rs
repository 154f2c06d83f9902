//! # Data Model
//!
//! Entities owned by the accounting engine: usage counters, missions,
//! thruster and accessory accumulators, vehicle identity and maintenance
//! records.

pub mod equipment;
pub mod maintenance;
pub mod mission;
pub mod stats;

pub use equipment::{Accessory, AccessoryTable, DutyCounter, ThrusterStats, ThrusterSummary, VehicleInfo};
pub use maintenance::{MaintenanceRecord, MaintenanceUpdate, NewMaintenanceRecord};
pub use mission::{HardUseLimits, Mission};
pub use stats::OdometerStats;
