//! Legacy / Extended Protocol Adapter
//!
//! Two views of the same mapper output:
//!
//! - **legacy**: `number[]` of load values
//! - **extended**: objects carrying `load` plus health telemetry
//!
//! Both keep the layout's index order and the `-1` sentinel. The server
//! exposes both; the client prefers extended and falls back to legacy.

pub mod client;
pub mod server;

use crate::model::StorageLoadExtendedEntry;

/// Legacy endpoint path
pub const LEGACY_PATH: &str = "/load/storage";

/// Extended endpoint path
pub const EXTENDED_PATH: &str = "/load/storage-extended";

/// Server-sent events endpoint path
pub const STREAM_PATH: &str = "/load/stream";

/// Push-channel event carrying the legacy array
pub const LEGACY_EVENT: &str = "storage-load";

/// Push-channel event carrying the extended array
pub const EXTENDED_EVENT: &str = "storage-load-extended";

/// Collapse extended entries to their load values.
pub fn project_legacy(entries: &[StorageLoadExtendedEntry]) -> Vec<i64> {
    entries.iter().map(|e| e.load).collect()
}

/// Lift legacy load values into extended entries with no health fields.
pub fn wrap_legacy(loads: &[i64]) -> Vec<StorageLoadExtendedEntry> {
    loads.iter().copied().map(StorageLoadExtendedEntry::from_load).collect()
}
