//! Matching layout entries to block devices and filesystem-size records

use std::collections::{BTreeSet, HashSet};

use crate::model::{BlockDevice, FilesystemSize, StorageLayoutEntry};

/// Block device type reported for software RAID arrays
const MD_DEVICE_TYPE: &str = "md";

/// Filesystem type whose UUID is shared with its RAID members
const XFS_FS_TYPE: &str = "xfs";

/// Block devices backing `entry`, in snapshot order.
///
/// Union of three rules:
/// - name prefixed by one of the entry's disk identifiers
/// - label prefixed by the RAID label, or name prefixed by the RAID name
/// - `md` devices formatted `xfs` whose UUID appears among the first rule's matches
pub fn backing_devices<'a>(entry: &StorageLayoutEntry, blocks: &'a [BlockDevice]) -> Vec<&'a BlockDevice> {
    let disk_names: Vec<&str> = entry.disk_names().collect();
    let mut matched = BTreeSet::new();

    for (i, block) in blocks.iter().enumerate() {
        if !block.name.is_empty() && disk_names.iter().any(|id| block.name.starts_with(id)) {
            matched.insert(i);
        }
    }

    let member_uuids: HashSet<&str> = matched
        .iter()
        .map(|&i| blocks[i].uuid.as_str())
        .filter(|uuid| !uuid.is_empty())
        .collect();

    let raid_label = non_empty(entry.raid_label.as_deref());
    let raid_name = non_empty(entry.raid_name.as_deref());

    for (i, block) in blocks.iter().enumerate() {
        let by_label = raid_label.is_some_and(|label| block.label.starts_with(label));
        let by_name = raid_name.is_some_and(|name| block.name.starts_with(name));
        let xfs_over_md = block.device_type == MD_DEVICE_TYPE
            && block.fs_type == XFS_FS_TYPE
            && member_uuids.contains(block.uuid.as_str());

        if by_label || by_name || xfs_over_md {
            matched.insert(i);
        }
    }

    matched.into_iter().map(|i| &blocks[i]).collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Resolves mount points between this process and the host it reports on.
#[derive(Debug, Clone, Default)]
pub struct HostPaths {
    /// Where the host root is mounted inside this process's namespace
    pub host_prefix: Option<String>,
    /// Disables root-mount identification
    pub windows: bool,
}

impl HostPaths {
    /// Map a host path to where it is visible locally.
    pub fn host_path(&self, path: &str) -> String {
        match self.host_prefix.as_deref() {
            None => path.to_string(),
            Some(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                if path == "/" {
                    prefix.to_string()
                } else {
                    format!("{}{}", prefix, path)
                }
            }
        }
    }

    /// Whether the backing devices hold the host's root or boot filesystems.
    pub fn is_host_root(&self, backing: &[&BlockDevice]) -> bool {
        !self.windows
            && backing
                .iter()
                .any(|b| b.mount == "/" || b.mount.starts_with("/boot"))
    }

    /// Whether a filesystem-size mount point is the host root.
    pub fn is_root_mount(&self, mount: &str) -> bool {
        !self.windows && mount == self.host_path("/")
    }

    /// Whether `size` describes a filesystem living on `block`.
    pub fn size_matches(&self, size: &FilesystemSize, block: &BlockDevice) -> bool {
        let by_mount = !block.mount.is_empty()
            && (size.mount == block.mount || size.mount == self.host_path(&block.mount));

        let by_uuid = !block.uuid.is_empty() && size.fs == format!("/dev/disk/by-uuid/{}", block.uuid);

        let by_name = !block.name.is_empty()
            && (size.fs.starts_with(&format!("/dev/{}", block.name))
                || size.fs.starts_with(&format!("/dev/mapper/{}", block.name)));

        by_mount || by_uuid || by_name
    }
}
