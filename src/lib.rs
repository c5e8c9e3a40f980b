//! # telemetry-registry
//!
//! In-process telemetry registry: named metric series with threshold alerting,
//! periodic collectors, point-in-time snapshots and JSON export.
//!
//! The registry is an ordinary value shared through `Arc`; there is no global
//! instance. [`hub::TelemetryHub`] wires a registry, the export loop and the
//! built-in monitors together from a [`config::TelemetryConfig`].

pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod monitors;
pub mod telemetry;

pub use config::TelemetryConfig;
pub use error::{Result, TelemetryError};
pub use hub::TelemetryHub;
pub use telemetry::{
    AlertEvent, AlertHandler, AlertMode, DuplicatePolicy, MetricDefinition, MetricKind,
    MetricRegistry, PeriodicCollector, RegistryConfig, Snapshot, StartPolicy,
};
