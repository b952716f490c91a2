//! Property-Based Tests for the Storage Load Mapper
//!
//! # Test Properties
//!
//! 1. **Index Alignment**: output length and order follow the layout
//! 2. **Sentinel Preservation**: entries without any filesystem report -1
//! 3. **Lower Bound**: a matched non-LVM entry never reports less than its used bytes

#![cfg(test)]

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use super::{MapperConfig, StorageLoadMapper};
use crate::model::{BlockDevice, FilesystemSize, LayoutDisk, SmartRecord, StorageLayoutEntry, LOAD_UNDETECTED};
use crate::smart::{DeviceProber, HealthCache, ProbeError};

struct UnreadableProber;

#[async_trait]
impl DeviceProber for UnreadableProber {
    async fn probe(&self, _device_path: &str) -> Result<SmartRecord, ProbeError> {
        Err(ProbeError::Terminated {
            binary: "smartctl".to_string(),
        })
    }
}

fn mapper(enable_smart_temps: bool) -> StorageLoadMapper {
    let config = MapperConfig {
        enable_smart_temps,
        ..Default::default()
    };
    StorageLoadMapper::new(config, Arc::new(HealthCache::new(Arc::new(UnreadableProber))))
}

fn run<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(fut)
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Disk letters a..f, so layouts and snapshots overlap often.
fn disk_name_strategy() -> impl Strategy<Value = String> {
    (0u8..6).prop_map(|i| format!("sd{}", (b'a' + i) as char))
}

fn layout_entry_strategy() -> impl Strategy<Value = StorageLayoutEntry> {
    (0u64..1_000_000, prop::collection::vec(disk_name_strategy(), 0..3), any::<bool>()).prop_map(
        |(size, disks, is_virtual)| StorageLayoutEntry {
            size,
            disks: disks.into_iter().map(|device| LayoutDisk { device }).collect(),
            is_virtual,
            raid_label: None,
            raid_name: None,
        },
    )
}

/// One partition per disk with a matching filesystem-size record.
fn snapshot_strategy() -> impl Strategy<Value = (Vec<BlockDevice>, Vec<FilesystemSize>)> {
    prop::collection::vec((disk_name_strategy(), 0u64..500_000, 0u64..500_000), 0..6).prop_map(|parts| {
        let mut blocks = Vec::new();
        let mut sizes = Vec::new();
        for (disk, a, b) in parts {
            let name = format!("{}1", disk);
            let mount = format!("/mnt/{}", name);
            blocks.push(BlockDevice {
                name: name.clone(),
                device_type: "part".to_string(),
                fs_type: "ext4".to_string(),
                mount: mount.clone(),
                ..Default::default()
            });
            sizes.push(FilesystemSize {
                mount,
                fs: format!("/dev/{}", name),
                fs_type: "ext4".to_string(),
                used: a.min(b),
                size: a.max(b),
            });
        }
        (blocks, sizes)
    })
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_output_aligned_with_layout(
        layout in prop::collection::vec(layout_entry_strategy(), 0..12),
        (blocks, sizes) in snapshot_strategy(),
        enable_smart_temps in any::<bool>(),
    ) {
        let out = run(mapper(enable_smart_temps).map(&layout, &blocks, &sizes));
        prop_assert_eq!(out.len(), layout.len());

        // Mapping a single entry in isolation gives the same result at that index
        let isolated = mapper(enable_smart_temps);
        for (i, entry) in layout.iter().enumerate() {
            let single = run(isolated.map(std::slice::from_ref(entry), &blocks, &sizes));
            prop_assert_eq!(&single[0], &out[i]);
        }
    }

    #[test]
    fn prop_no_snapshot_means_sentinel(
        layout in prop::collection::vec(layout_entry_strategy(), 0..12),
    ) {
        let out = run(mapper(false).map(&layout, &[], &[]));
        for (entry, mapped) in layout.iter().zip(&out) {
            let expected = if entry.is_virtual { 0 } else { LOAD_UNDETECTED };
            prop_assert_eq!(mapped.load, expected);
        }
    }

    #[test]
    fn prop_matched_load_at_least_used(
        layout in prop::collection::vec(layout_entry_strategy(), 1..8),
        (blocks, sizes) in snapshot_strategy(),
    ) {
        let out = run(mapper(false).map(&layout, &blocks, &sizes));
        for (entry, mapped) in layout.iter().zip(&out) {
            if entry.is_virtual || mapped.load == LOAD_UNDETECTED {
                continue;
            }
            let used: u64 = sizes
                .iter()
                .filter(|s| entry.disk_names().any(|d| s.fs.starts_with(&format!("/dev/{}", d))))
                .map(|s| s.used)
                .sum();
            prop_assert!(mapped.load >= used as i64);
        }
    }
}
