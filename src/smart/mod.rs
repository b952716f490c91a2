//! SMART telemetry
//!
//! Reads disk temperature and health self-assessment through `smartctl`,
//! with a TTL cache that absorbs tool failures.
//!
//! ```text
//! HealthCache::get(path) ──miss──▶ DeviceProber::probe(path)
//!        │                           ├─ smartctl -A path ─┐
//!        │                           └─ smartctl -H path ─┴─▶ parse
//!        └──hit──▶ cached SmartRecord
//! ```

mod cache;
mod parse;
mod prober;

pub use cache::{CacheStats, HealthCache, SMART_CACHE_TTL};
pub use parse::{parse_health, parse_record, parse_temperature};
pub use prober::{DeviceProber, ProbeError, SmartctlProber};

/// Whether `path` follows the SATA/SCSI naming convention (`/dev/sd<letters>`).
///
/// Only these paths are polled for health; NVMe and others are skipped.
pub fn is_sata_path(path: &str) -> bool {
    path.strip_prefix("/dev/sd")
        .map(|letters| !letters.is_empty() && letters.bytes().all(|b| b.is_ascii_lowercase()))
        .unwrap_or(false)
}

/// Turn a layout device identifier into an absolute device path.
pub fn normalize_device_path(device: &str) -> String {
    if device.starts_with('/') {
        device.to_string()
    } else {
        format!("/dev/{}", device)
    }
}
