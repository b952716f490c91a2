//! Live snapshot collection
//!
//! Block devices from `lsblk`, filesystem usage from `df`. Both are re-read
//! on every poll tick.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::model::{BlockDevice, FilesystemSize};

/// Source of per-tick block-device and filesystem-size snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn block_devices(&self) -> Result<Vec<BlockDevice>>;
    async fn filesystem_sizes(&self) -> Result<Vec<FilesystemSize>>;
}

// =============================================================================
// System Source
// =============================================================================

/// Reads snapshots from the local host's `lsblk` and `df`.
#[derive(Debug, Clone)]
pub struct SystemSnapshotSource {
    timeout: Duration,
}

impl SystemSnapshotSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let collector_error = |reason: String| Error::Collector {
            command: program.to_string(),
            reason,
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| collector_error(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| collector_error(e.to_string()))?;

        // df exits 1 when a single mount is unreadable but still prints the rest
        if output.stdout.is_empty() && !output.status.success() {
            return Err(collector_error(format!("exited with {}", output.status)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SnapshotSource for SystemSnapshotSource {
    #[instrument(skip(self))]
    async fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        let out = self
            .run(
                "lsblk",
                &["--json", "--bytes", "-o", "NAME,PATH,LABEL,UUID,TYPE,FSTYPE,MOUNTPOINT"],
            )
            .await?;
        parse_lsblk(&out)
    }

    #[instrument(skip(self))]
    async fn filesystem_sizes(&self) -> Result<Vec<FilesystemSize>> {
        let out = self
            .run("df", &["-B1", "--output=source,fstype,size,used,target"])
            .await?;
        Ok(parse_df(&out))
    }
}

// =============================================================================
// Static Source
// =============================================================================

/// Fixed snapshots, for replaying captured data and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshotSource {
    pub blocks: Vec<BlockDevice>,
    pub sizes: Vec<FilesystemSize>,
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        Ok(self.blocks.clone())
    }

    async fn filesystem_sizes(&self) -> Result<Vec<FilesystemSize>> {
        Ok(self.sizes.clone())
    }
}

// =============================================================================
// Parsers
// =============================================================================

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    name: String,
    path: Option<String>,
    label: Option<String>,
    uuid: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    fstype: Option<String>,
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

/// Flatten `lsblk --json` output into one [`BlockDevice`] per node.
///
/// Nodes shared by several parents (RAID arrays, LVs) appear once.
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    let mut devices = Vec::new();
    let mut stack: Vec<LsblkNode> = output.blockdevices.into_iter().rev().collect();

    while let Some(node) = stack.pop() {
        stack.extend(node.children.into_iter().rev());

        if devices.iter().any(|d: &BlockDevice| d.name == node.name) {
            continue;
        }

        let mut device_type = node.kind.unwrap_or_default();
        // lsblk reports md arrays by RAID level
        if device_type.starts_with("raid") && node.name.starts_with("md") {
            device_type = "md".to_string();
        }

        devices.push(BlockDevice {
            device: node.path.unwrap_or_else(|| format!("/dev/{}", node.name)),
            name: node.name,
            label: node.label.unwrap_or_default(),
            uuid: node.uuid.unwrap_or_default(),
            device_type,
            fs_type: node.fstype.unwrap_or_default(),
            mount: node.mountpoint.unwrap_or_default(),
        });
    }
    Ok(devices)
}

/// Parse `df -B1 --output=source,fstype,size,used,target`.
///
/// Mount points may contain spaces; they take the remainder of the row.
pub fn parse_df(text: &str) -> Vec<FilesystemSize> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let fs = fields.next()?.to_string();
            let fs_type = fields.next()?.to_string();
            let size = fields.next()?.parse().ok()?;
            let used = fields.next()?.parse().ok()?;
            let mount = fields.collect::<Vec<_>>().join(" ");
            if mount.is_empty() {
                return None;
            }
            Some(FilesystemSize {
                mount,
                fs,
                fs_type,
                used,
                size,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSBLK: &str = r#"{
   "blockdevices": [
      {"name":"sda", "path":"/dev/sda", "label":null, "uuid":null, "type":"disk", "fstype":null, "mountpoint":null,
         "children": [
            {"name":"sda1", "path":"/dev/sda1", "label":null, "uuid":"1111", "type":"part", "fstype":"linux_raid_member", "mountpoint":null,
               "children": [
                  {"name":"md0", "path":"/dev/md0", "label":"nas:0", "uuid":"abcd", "type":"raid1", "fstype":"xfs", "mountpoint":"/srv"}
               ]
            }
         ]
      },
      {"name":"sdb", "path":"/dev/sdb", "label":null, "uuid":null, "type":"disk", "fstype":null, "mountpoint":null,
         "children": [
            {"name":"sdb1", "path":"/dev/sdb1", "label":null, "uuid":"2222", "type":"part", "fstype":"linux_raid_member", "mountpoint":null,
               "children": [
                  {"name":"md0", "path":"/dev/md0", "label":"nas:0", "uuid":"abcd", "type":"raid1", "fstype":"xfs", "mountpoint":"/srv"}
               ]
            }
         ]
      },
      {"name":"nvme0n1", "type":"disk"}
   ]
}"#;

    #[test]
    fn test_parse_lsblk_flattens_tree() {
        let devices = parse_lsblk(LSBLK).unwrap();
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["sda", "sda1", "md0", "sdb", "sdb1", "nvme0n1"]);
    }

    #[test]
    fn test_parse_lsblk_fields() {
        let devices = parse_lsblk(LSBLK).unwrap();
        let md0 = devices.iter().find(|d| d.name == "md0").unwrap();
        assert_eq!(md0.device_type, "md");
        assert_eq!(md0.fs_type, "xfs");
        assert_eq!(md0.mount, "/srv");
        assert_eq!(md0.label, "nas:0");

        let nvme = devices.iter().find(|d| d.name == "nvme0n1").unwrap();
        assert_eq!(nvme.device, "/dev/nvme0n1");
        assert_eq!(nvme.uuid, "");
    }

    #[test]
    fn test_parse_lsblk_rejects_garbage() {
        assert!(parse_lsblk("not json").is_err());
    }

    #[test]
    fn test_parse_df() {
        let text = "\
Filesystem     Type     1B-blocks         Used Mounted on
/dev/sda2      ext4  250000000000  90000000000 /
/dev/sdb1      xfs  4000000000000 100000000000 /mnt/My Media
tmpfs          tmpfs   8000000000            0 /run
bogus line
";
        let sizes = parse_df(text);
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0].mount, "/");
        assert_eq!(sizes[0].used, 90_000_000_000);
        assert_eq!(sizes[1].mount, "/mnt/My Media");
        assert_eq!(sizes[1].fs_type, "xfs");
        assert_eq!(sizes[2].size, 8_000_000_000);
    }

    #[tokio::test]
    async fn test_static_source_returns_snapshots() {
        let source = StaticSnapshotSource {
            blocks: vec![BlockDevice {
                name: "sda".to_string(),
                ..Default::default()
            }],
            sizes: vec![],
        };
        assert_eq!(source.block_devices().await.unwrap().len(), 1);
        assert!(source.filesystem_sizes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_collector_error() {
        let source = SystemSnapshotSource::new(Duration::from_secs(1));
        let err = source.run("/nonexistent/lsblk", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Collector { .. }));
    }
}
