//! Health aggregation across the disks of one layout entry

use crate::model::{SmartRecord, StorageLayoutEntry, STATUS_FAILED, STATUS_PASSED};
use crate::smart::{is_sata_path, normalize_device_path};

/// Absolute, de-duplicated SATA device paths backing `entry`, in layout order.
pub fn candidate_paths(entry: &StorageLayoutEntry) -> Vec<String> {
    let mut paths: Vec<String> = Vec::with_capacity(entry.disks.len());
    for disk in &entry.disks {
        let path = normalize_device_path(&disk.device);
        if is_sata_path(&path) && !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Combine per-disk records into one.
///
/// The hottest disk sets the temperature. Any `FAILED` disk fails the
/// whole entry; otherwise any `PASSED` disk passes it. Other tokens do not
/// count either way, and with no recognised status both fields stay unknown.
pub fn aggregate<'a>(records: impl IntoIterator<Item = &'a SmartRecord>) -> SmartRecord {
    let mut temperature: Option<i32> = None;
    let mut failed = false;
    let mut passed = false;

    for record in records {
        if let Some(t) = record.temperature {
            temperature = Some(temperature.map_or(t, |max| max.max(t)));
        }
        match record.overall_status.as_deref() {
            Some(STATUS_FAILED) => failed = true,
            Some(STATUS_PASSED) => passed = true,
            _ => {}
        }
    }

    let aggregated = SmartRecord {
        temperature,
        ..SmartRecord::unknown()
    };

    if failed {
        aggregated.with_status(STATUS_FAILED)
    } else if passed {
        aggregated.with_status(STATUS_PASSED)
    } else {
        aggregated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayoutDisk;

    fn record(temperature: Option<i32>, status: Option<&str>) -> SmartRecord {
        let base = SmartRecord {
            temperature,
            ..SmartRecord::unknown()
        };
        match status {
            Some(s) => base.with_status(s),
            None => base,
        }
    }

    #[test]
    fn test_hottest_disk_wins() {
        let records = [record(Some(40), None), record(Some(55), None), record(None, None)];
        assert_eq!(aggregate(&records).temperature, Some(55));
    }

    #[test]
    fn test_failure_dominates() {
        let records = [record(None, Some("PASSED")), record(None, Some("FAILED"))];
        let agg = aggregate(&records);
        assert_eq!(agg.overall_status.as_deref(), Some("FAILED"));
        assert_eq!(agg.healthy, Some(false));
    }

    #[test]
    fn test_all_passed() {
        let records = [record(None, Some("PASSED")), record(None, Some("PASSED"))];
        let agg = aggregate(&records);
        assert_eq!(agg.overall_status.as_deref(), Some("PASSED"));
        assert_eq!(agg.healthy, Some(true));
    }

    #[test]
    fn test_all_unknown_omits_fields() {
        let records = [record(None, None), record(None, None)];
        assert!(aggregate(&records).is_unknown());
        assert!(aggregate(&[]).is_unknown());
    }

    #[test]
    fn test_unrecognised_status_does_not_override_passed() {
        let records = [record(None, Some("PASSED")), record(None, Some("IN_PROGRESS"))];
        let agg = aggregate(&records);
        assert_eq!(agg.overall_status.as_deref(), Some("PASSED"));
        assert_eq!(agg.healthy, Some(true));
    }

    #[test]
    fn test_unrecognised_status_alone_is_unknown() {
        let records = [record(Some(47), Some("IN_PROGRESS"))];
        let agg = aggregate(&records);
        assert_eq!(agg.temperature, Some(47));
        assert_eq!(agg.overall_status, None);
        assert_eq!(agg.healthy, None);
    }

    #[test]
    fn test_failed_outranks_unrecognised() {
        let records = [record(None, Some("IN_PROGRESS")), record(None, Some("FAILED"))];
        assert_eq!(aggregate(&records).overall_status.as_deref(), Some("FAILED"));
    }

    #[test]
    fn test_candidate_paths_filter_and_dedupe() {
        let entry = StorageLayoutEntry {
            size: 0,
            disks: ["sda", "/dev/sda", "nvme0n1", "sdb"]
                .iter()
                .map(|d| LayoutDisk { device: d.to_string() })
                .collect(),
            is_virtual: false,
            raid_label: None,
            raid_name: None,
        };
        assert_eq!(candidate_paths(&entry), vec!["/dev/sda", "/dev/sdb"]);
    }
}
