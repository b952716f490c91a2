//! Storage Load Mapper
//!
//! Reconciles the static storage layout against live block-device and
//! filesystem-size snapshots. Produces one [`StorageLoadExtendedEntry`] per
//! layout entry, in layout order, with health telemetry attached when
//! enabled.
//!
//! The mapper keeps no state between calls; the [`HealthCache`] it holds is
//! the only thing that survives a poll tick.

mod health;
mod matching;
mod proptest;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, instrument};

use crate::model::{
    BlockDevice, FilesystemSize, SmartRecord, StorageLayoutEntry, StorageLoadExtendedEntry,
    LOAD_UNDETECTED,
};
use crate::smart::HealthCache;

pub use health::{aggregate, candidate_paths};
pub use matching::{backing_devices, HostPaths};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the storage load mapper
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    /// Poll disk health and attach it to each entry
    pub enable_smart_temps: bool,

    /// Filesystem types excluded from size matching
    pub fs_type_filter: HashSet<String>,

    /// Host root / container mount translation
    pub host: HostPaths,
}

// =============================================================================
// Mapper
// =============================================================================

pub struct StorageLoadMapper {
    config: MapperConfig,
    cache: Arc<HealthCache>,
}

impl StorageLoadMapper {
    pub fn new(config: MapperConfig, cache: Arc<HealthCache>) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Map every layout entry to its load and health.
    ///
    /// All probes for the call are issued together, so the cost is one probe
    /// round-trip regardless of how many entries or disks there are.
    #[instrument(skip_all, fields(entries = layout.len()))]
    pub async fn map(
        &self,
        layout: &[StorageLayoutEntry],
        blocks: &[BlockDevice],
        sizes: &[FilesystemSize],
    ) -> Vec<StorageLoadExtendedEntry> {
        let health = if self.config.enable_smart_temps {
            self.probe_all(layout).await
        } else {
            HashMap::new()
        };

        let matchable: Vec<&FilesystemSize> = sizes
            .iter()
            .filter(|s| !self.config.fs_type_filter.contains(&s.fs_type))
            .collect();

        layout
            .iter()
            .map(|entry| {
                let load = self.compute_load(entry, blocks, sizes, &matchable);
                let out = StorageLoadExtendedEntry::from_load(load);

                if self.config.enable_smart_temps && !entry.disks.is_empty() {
                    let paths = candidate_paths(entry);
                    out.with_health(aggregate(paths.iter().filter_map(|p| health.get(p))))
                } else {
                    out
                }
            })
            .collect()
    }

    /// Fetch health for every distinct candidate path across the layout.
    async fn probe_all(&self, layout: &[StorageLayoutEntry]) -> HashMap<String, SmartRecord> {
        let mut paths: Vec<String> = layout.iter().flat_map(candidate_paths).collect();
        paths.sort();
        paths.dedup();

        debug!("Probing {} device(s) for health", paths.len());
        let records = join_all(paths.iter().map(|p| self.cache.get(p))).await;
        paths.into_iter().zip(records).collect()
    }

    fn compute_load(
        &self,
        entry: &StorageLayoutEntry,
        blocks: &[BlockDevice],
        all_sizes: &[FilesystemSize],
        matchable: &[&FilesystemSize],
    ) -> i64 {
        if entry.is_virtual {
            let fs_id = entry.disks.first().map(|d| d.device.as_str());
            return all_sizes
                .iter()
                .find(|s| Some(s.fs.as_str()) == fs_id)
                .map(|s| to_load(s.used))
                .unwrap_or(0);
        }

        let backing = backing_devices(entry, blocks);
        if backing.is_empty() {
            return LOAD_UNDETECTED;
        }

        let host = &self.config.host;
        let is_root = host.is_host_root(&backing);
        let matched: Vec<&FilesystemSize> = matchable
            .iter()
            .copied()
            .filter(|s| {
                backing.iter().any(|b| host.size_matches(s, b)) || (is_root && host.is_root_mount(&s.mount))
            })
            .collect();

        if matched.is_empty() {
            return LOAD_UNDETECTED;
        }

        let used: u64 = matched.iter().map(|s| s.used).sum();
        if backing.iter().any(|b| b.is_lvm_member()) {
            return to_load(used);
        }

        let visible: u64 = matched.iter().map(|s| s.size).sum();
        to_load(used.saturating_add(entry.size.saturating_sub(visible)))
    }
}

impl std::fmt::Debug for StorageLoadMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLoadMapper")
            .field("config", &self.config)
            .finish()
    }
}

fn to_load(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayoutDisk;
    use crate::smart::{DeviceProber, ProbeError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a fixed path → record table; unknown paths fail.
    struct TableProber {
        table: HashMap<String, SmartRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceProber for TableProber {
        async fn probe(&self, device_path: &str) -> Result<SmartRecord, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table.get(device_path).cloned().ok_or(ProbeError::ExitStatus {
                binary: "smartctl".to_string(),
                code: 2,
            })
        }
    }

    fn mapper_with(table: &[(&str, SmartRecord)], enable_smart_temps: bool) -> (StorageLoadMapper, Arc<TableProber>) {
        let prober = Arc::new(TableProber {
            table: table.iter().map(|(p, r)| (p.to_string(), r.clone())).collect(),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(HealthCache::new(prober.clone()));
        let config = MapperConfig {
            enable_smart_temps,
            ..Default::default()
        };
        (StorageLoadMapper::new(config, cache), prober)
    }

    fn entry(size: u64, disks: &[&str]) -> StorageLayoutEntry {
        StorageLayoutEntry {
            size,
            disks: disks.iter().map(|d| LayoutDisk { device: d.to_string() }).collect(),
            is_virtual: false,
            raid_label: None,
            raid_name: None,
        }
    }

    fn block(name: &str, fs_type: &str, mount: &str) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            device_type: "part".to_string(),
            fs_type: fs_type.to_string(),
            mount: mount.to_string(),
            ..Default::default()
        }
    }

    fn size(fs: &str, mount: &str, used: u64, total: u64) -> FilesystemSize {
        FilesystemSize {
            mount: mount.to_string(),
            fs: fs.to_string(),
            fs_type: "ext4".to_string(),
            used,
            size: total,
        }
    }

    fn temp(t: i32, status: &str) -> SmartRecord {
        SmartRecord {
            temperature: Some(t),
            ..SmartRecord::unknown()
        }
        .with_status(status)
    }

    #[tokio::test]
    async fn test_preallocated_space_counts_as_load() {
        let (mapper, _) = mapper_with(&[], false);
        let blocks = vec![block("sda", "", ""), block("sda1", "ext4", "/data")];
        let sizes = vec![size("/dev/sda1", "/data", 300, 400)];

        let out = mapper.map(&[entry(1000, &["sda"])], &blocks, &sizes).await;
        assert_eq!(out[0].load, 900);
    }

    #[tokio::test]
    async fn test_lvm_reports_used_only() {
        let (mapper, _) = mapper_with(&[], false);
        let blocks = vec![
            block("sda", "", ""),
            block("sda1", "LVM2_member", ""),
            block("vg0-data", "ext4", "/data"),
        ];
        let sizes = vec![size("/dev/mapper/vg0-data", "/data", 300, 400)];

        let mut lvm_entry = entry(1000, &["sda"]);
        lvm_entry.raid_name = Some("vg0-".to_string());
        let out = mapper.map(&[lvm_entry], &blocks, &sizes).await;
        assert_eq!(out[0].load, 300);
    }

    #[tokio::test]
    async fn test_unmatched_entry_is_undetected() {
        let (mapper, _) = mapper_with(&[], false);
        let blocks = vec![block("sdb1", "ext4", "/b")];
        let sizes = vec![size("/dev/sdb1", "/b", 1, 2)];

        let out = mapper.map(&[entry(10, &["sdz"])], &blocks, &sizes).await;
        assert_eq!(out[0].load, LOAD_UNDETECTED);
    }

    #[tokio::test]
    async fn test_backing_device_without_filesystem_is_undetected() {
        let (mapper, _) = mapper_with(&[], false);
        let blocks = vec![block("sdc", "", "")];

        let out = mapper.map(&[entry(10, &["sdc"])], &blocks, &[]).await;
        assert_eq!(out[0].load, LOAD_UNDETECTED);
    }

    #[tokio::test]
    async fn test_virtual_entry_uses_matching_filesystem() {
        let (mapper, _) = mapper_with(&[], false);
        let mut share = entry(0, &["//nas/media"]);
        share.is_virtual = true;
        let mut missing = entry(0, &["//nas/gone"]);
        missing.is_virtual = true;

        let mut sizes = vec![size("//nas/media", "/mnt/media", 4242, 9000)];
        sizes[0].fs_type = "cifs".to_string();

        let out = mapper.map(&[share, missing], &[], &sizes).await;
        assert_eq!(out[0].load, 4242);
        assert_eq!(out[1].load, 0);
    }

    #[tokio::test]
    async fn test_fs_type_filter_excludes_sizes() {
        let prober = Arc::new(TableProber {
            table: HashMap::new(),
            calls: AtomicUsize::new(0),
        });
        let config = MapperConfig {
            fs_type_filter: ["squashfs".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let mapper = StorageLoadMapper::new(config, Arc::new(HealthCache::new(prober)));

        let blocks = vec![block("sda1", "squashfs", "/snap")];
        let mut sizes = vec![size("/dev/sda1", "/snap", 5, 5)];
        sizes[0].fs_type = "squashfs".to_string();

        let out = mapper.map(&[entry(5, &["sda"])], &blocks, &sizes).await;
        assert_eq!(out[0].load, LOAD_UNDETECTED);
    }

    #[tokio::test]
    async fn test_root_entry_matches_host_root_mount() {
        let prober = Arc::new(TableProber {
            table: HashMap::new(),
            calls: AtomicUsize::new(0),
        });
        let config = MapperConfig {
            host: HostPaths {
                host_prefix: Some("/mnt/host".to_string()),
                windows: false,
            },
            ..Default::default()
        };
        let mapper = StorageLoadMapper::new(config, Arc::new(HealthCache::new(prober)));

        // Inside a container the root filesystem shows up under the host prefix
        let blocks = vec![block("sda1", "ext4", "/")];
        let sizes = vec![size("overlay", "/mnt/host", 100, 200)];

        let out = mapper.map(&[entry(200, &["sda"])], &blocks, &sizes).await;
        assert_eq!(out[0].load, 100);
    }

    #[tokio::test]
    async fn test_health_aggregated_per_entry() {
        let (mapper, prober) = mapper_with(
            &[
                ("/dev/sda", temp(40, "PASSED")),
                ("/dev/sdb", temp(55, "FAILED")),
                ("/dev/sdc", temp(33, "PASSED")),
            ],
            true,
        );
        let layout = vec![
            entry(0, &["sda", "sdb", "nvme0n1"]),
            entry(0, &["/dev/sdc"]),
            entry(0, &["sda"]),
            entry(0, &[]),
        ];

        let out = mapper.map(&layout, &[], &[]).await;

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].temperature, Some(55));
        assert_eq!(out[0].overall_status.as_deref(), Some("FAILED"));
        assert_eq!(out[0].healthy, Some(false));
        assert_eq!(out[1].temperature, Some(33));
        assert_eq!(out[1].healthy, Some(true));
        assert_eq!(out[2].temperature, Some(40));
        assert_eq!(out[3].temperature, None);
        assert_eq!(out[3].overall_status, None);

        // sda is shared by two entries but probed once
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_probe_failure_leaves_fields_unknown() {
        let (mapper, _) = mapper_with(&[], true);
        let blocks = vec![block("sda1", "ext4", "/data")];
        let sizes = vec![size("/dev/sda1", "/data", 10, 10)];

        let out = mapper.map(&[entry(10, &["sda"])], &blocks, &sizes).await;
        assert_eq!(out[0], StorageLoadExtendedEntry::from_load(10));
    }

    /// Takes one second per probe and counts calls.
    struct SlowProber {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceProber for SlowProber {
        async fn probe(&self, _device_path: &str) -> Result<SmartRecord, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            Ok(temp(35, "PASSED"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_across_entries_run_concurrently() {
        let prober = Arc::new(SlowProber {
            calls: AtomicUsize::new(0),
        });
        let config = MapperConfig {
            enable_smart_temps: true,
            ..Default::default()
        };
        let mapper = StorageLoadMapper::new(config, Arc::new(HealthCache::new(prober.clone())));
        let layout = vec![entry(0, &["sda"]), entry(0, &["sdb", "sdc"]), entry(0, &["sdc"])];

        let started = tokio::time::Instant::now();
        let out = mapper.map(&layout, &[], &[]).await;
        let elapsed = started.elapsed();

        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
        assert!(out.iter().all(|e| e.healthy == Some(true)));
        assert!(elapsed >= std::time::Duration::from_secs(1));
        assert!(elapsed < std::time::Duration::from_secs(2), "probes were serialized: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_disabled_health_skips_probes() {
        let (mapper, prober) = mapper_with(&[("/dev/sda", temp(40, "PASSED"))], false);

        let out = mapper.map(&[entry(0, &["sda"])], &[], &[]).await;
        assert_eq!(out[0].temperature, None);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }
}
