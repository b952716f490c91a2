//! Storage Data Model
//!
//! Input snapshots (layout, block devices, filesystem sizes) and the two
//! output shapes served to consumers. Field names follow the camelCase
//! wire format consumers already depend on.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Load value reported when no filesystem backs a layout entry.
///
/// Consumers filter on this exact value, so it is never replaced by 0.
pub const LOAD_UNDETECTED: i64 = -1;

/// `overallStatus` token for a passing self-assessment
pub const STATUS_PASSED: &str = "PASSED";

/// `overallStatus` token for a failing self-assessment
pub const STATUS_FAILED: &str = "FAILED";

// =============================================================================
// Inputs
// =============================================================================

/// One disk backing a layout entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDisk {
    /// Kernel name (`sda`) or path (`/dev/sda`); for virtual entries, the
    /// filesystem identifier (`//nas/share`, `overlay`, ...)
    pub device: String,
}

/// A logical storage unit, produced once at startup by the static collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageLayoutEntry {
    /// Declared size in bytes
    pub size: u64,

    /// Backing disks
    #[serde(default)]
    pub disks: Vec<LayoutDisk>,

    /// Whether this entry is a virtual mount (network share, overlay, ...)
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,

    /// RAID label, when the entry is a RAID set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid_label: Option<String>,

    /// RAID array name, when the entry is a RAID set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raid_name: Option<String>,
}

impl StorageLayoutEntry {
    /// Device identifiers of all backing disks, without a `/dev/` prefix.
    pub fn disk_names(&self) -> impl Iterator<Item = &str> {
        self.disks
            .iter()
            .map(|d| d.device.trim_start_matches("/dev/"))
            .filter(|d| !d.is_empty())
    }
}

/// Snapshot of one kernel block device (disk, partition, md array, LV, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDevice {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub uuid: String,
    /// `disk`, `part`, `md`, `lvm`, `raid1`, ...
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub fs_type: String,
    #[serde(default)]
    pub mount: String,
}

impl BlockDevice {
    /// Whether this device is a physical volume of an LVM volume group.
    pub fn is_lvm_member(&self) -> bool {
        self.fs_type.eq_ignore_ascii_case("LVM2_member")
    }
}

/// Snapshot of one mounted filesystem's usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemSize {
    pub mount: String,
    /// Filesystem source identifier (`/dev/sda1`, `/dev/mapper/vg-root`, ...)
    pub fs: String,
    #[serde(default, rename = "type")]
    pub fs_type: String,
    pub used: u64,
    pub size: u64,
}

// =============================================================================
// SMART
// =============================================================================

/// Disk health telemetry for one physical device path.
///
/// Every field is optional: `None` means the tool could not tell, and no
/// default is ever substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
}

impl SmartRecord {
    /// A record with every field unknown.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Build the health fields from a self-assessment status token.
    ///
    /// Anything other than `PASSED` counts as unhealthy.
    pub fn with_status(mut self, token: &str) -> Self {
        self.healthy = Some(token == STATUS_PASSED);
        self.overall_status = Some(token.to_string());
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.temperature.is_none() && self.overall_status.is_none() && self.healthy.is_none()
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Extended payload element: load plus aggregated health telemetry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageLoadExtendedEntry {
    /// Used bytes, or [`LOAD_UNDETECTED`]
    pub load: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthy: Option<bool>,
}

impl StorageLoadExtendedEntry {
    /// An entry carrying only a load value.
    pub fn from_load(load: i64) -> Self {
        Self {
            load,
            ..Default::default()
        }
    }

    /// Attach aggregated health fields.
    pub fn with_health(mut self, health: SmartRecord) -> Self {
        self.temperature = health.temperature;
        self.overall_status = health.overall_status;
        self.healthy = health.healthy;
        self
    }
}

// =============================================================================
// Layout loading
// =============================================================================

/// Load the static layout from a JSON file, or YAML when the extension says so.
pub fn load_layout(path: &Path) -> Result<Vec<StorageLayoutEntry>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Layout {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let layout = if is_yaml {
        serde_yaml::from_str(&text)?
    } else {
        serde_json::from_str(&text)?
    };
    Ok(layout)
}
