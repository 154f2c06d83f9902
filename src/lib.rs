//! # ROV Odometer Library
//!
//! Usage accounting for remotely operated vehicles.
//!
//! This library polls the vehicle's telemetry bus, turns best-effort
//! readings into odometer-style counters (armed, disarmed and dive time,
//! energy consumed, battery swaps) and keeps a crash-resilient mission
//! history alongside a maintenance log.

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod model;
pub mod service;
pub mod store;
pub mod telemetry;
