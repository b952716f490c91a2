//! Health Cache
//!
//! Time-bounded cache in front of a [`DeviceProber`], keyed by device path.
//! Probe failures are cached as unknown records, so an unreadable disk is
//! retried at most once per TTL.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::prober::DeviceProber;
use crate::model::SmartRecord;
use crate::telemetry;

/// How long a probed record stays fresh
pub const SMART_CACHE_TTL: Duration = Duration::from_secs(60);

// =============================================================================
// Cache Entry
// =============================================================================

/// Record and the moment it was probed, stored and replaced as one value.
#[derive(Debug, Clone)]
struct CacheEntry {
    record: SmartRecord,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Cache occupancy
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Total cached device paths
    pub total_entries: usize,
    /// Entries still within the TTL
    pub fresh_entries: usize,
}

// =============================================================================
// Health Cache
// =============================================================================

/// Sole owner of cached [`SmartRecord`]s.
///
/// Concurrent misses for the same path may each run the prober; the last
/// writer wins and both callers see a complete record.
pub struct HealthCache {
    prober: Arc<dyn DeviceProber>,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl HealthCache {
    /// Create a cache using [`SMART_CACHE_TTL`]
    pub fn new(prober: Arc<dyn DeviceProber>) -> Self {
        Self::with_ttl(prober, SMART_CACHE_TTL)
    }

    /// Create a cache with a custom TTL
    pub fn with_ttl(prober: Arc<dyn DeviceProber>, ttl: Duration) -> Self {
        Self {
            prober,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Health record for `device_path`, probing only on a miss or stale entry.
    ///
    /// Never fails: a probe error yields (and caches) an unknown record.
    #[instrument(skip(self))]
    pub async fn get(&self, device_path: &str) -> SmartRecord {
        if let Some(entry) = self.entries.get(device_path) {
            if !entry.is_expired(self.ttl) {
                telemetry::metrics().cache_hits.inc();
                return entry.record.clone();
            }
        }

        telemetry::metrics().probe_invocations.inc();
        let record = match self.prober.probe(device_path).await {
            Ok(record) => record,
            Err(e) => {
                debug!("Probe failed for {}, caching unknown record: {}", device_path, e);
                telemetry::metrics().probe_failures.inc();
                SmartRecord::unknown()
            }
        };

        self.entries.insert(
            device_path.to_string(),
            CacheEntry {
                record: record.clone(),
                fetched_at: Instant::now(),
            },
        );
        record
    }

    pub fn stats(&self) -> CacheStats {
        let fresh_entries = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(self.ttl))
            .count();

        CacheStats {
            total_entries: self.entries.len(),
            fresh_entries,
        }
    }
}

impl std::fmt::Debug for HealthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}
