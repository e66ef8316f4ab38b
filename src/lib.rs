//! Parking availability monitoring service.
//!
//! Polls a commercial parking operator's mobile API for bay availability,
//! normalizes the operator's capped readings, appends timestamped snapshots
//! to Postgres, and derives hourly utilization aggregates. Scheduling is
//! external (cron); each invocation runs exactly one cycle.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod mapper;
pub mod model;
pub mod normalize;
pub mod poll;
