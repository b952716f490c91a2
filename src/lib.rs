//! Storage Telemetry - Storage load and disk health aggregation
//!
//! Reconciles a static storage layout against live block-device and
//! filesystem-usage snapshots, attaches per-disk health and temperature from
//! `smartctl`, and serves the result in two shapes: a legacy array of load
//! numbers and an extended array of objects carrying health telemetry.
//!
//! # Architecture
//!
//! ```text
//! Collector (lsblk/df) ─┐
//!                       ├─▶ Mapper ─▶ Poller ─▶ Server ─▶ LoadClient
//! Prober ─▶ HealthCache ┘
//! ```
//!
//! # Modules
//!
//! - [`collector`] - Live block-device and filesystem-size snapshots
//! - [`config`] - Service configuration
//! - [`error`] - Error types
//! - [`mapper`] - Layout to load/health reconciliation
//! - [`model`] - Data model and layout loading
//! - [`poller`] - Periodic collection and publication
//! - [`protocol`] - Legacy/extended HTTP server and negotiating client
//! - [`smart`] - Disk health probing and caching
//! - [`telemetry`] - Prometheus counters

pub mod collector;
pub mod config;
pub mod error;
pub mod mapper;
pub mod model;
pub mod poller;
pub mod protocol;
pub mod smart;
pub mod telemetry;

// Re-export commonly used types
pub use config::TelemetryConfig;
pub use error::{Error, Result};
pub use mapper::{MapperConfig, StorageLoadMapper};
pub use model::{SmartRecord, StorageLayoutEntry, StorageLoadExtendedEntry};
pub use poller::{LoadSnapshot, Poller, PollerConfig};
pub use protocol::client::LoadClient;
pub use smart::{HealthCache, SmartctlProber};
