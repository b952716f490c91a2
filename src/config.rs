//! Service configuration
//!
//! [`TelemetryConfig`] is assembled by the binary from CLI flags and
//! environment variables, then split into the per-component configs.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mapper::{HostPaths, MapperConfig};
use crate::poller::PollerConfig;

/// Filesystem types never matched against layout entries
pub const DEFAULT_FS_TYPE_FILTER: &[&str] = &[
    "cifs",
    "9p",
    "fuse.rclone",
    "fuse.mergerfs",
    "nfs4",
    "iso9660",
    "fuse.shfs",
    "autofs",
];

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Static storage layout file
    pub layout_path: PathBuf,
    pub bind_addr: String,
    pub enable_smart_temps: bool,
    pub fs_type_filter: HashSet<String>,
    /// Serve empty bodies instead of load data
    pub disable_storage: bool,
    pub poll_interval: Duration,
    /// Bound on a poll tick and on a request waiting for the first snapshot
    pub max_wait: Duration,
    /// Bound on each smartctl, lsblk or df invocation
    pub probe_timeout: Duration,
    pub smartctl_path: String,
    /// Passed to smartctl ahead of the mode flag (`-n standby`, `-d sat`, ...)
    pub smartctl_args: Vec<String>,
    pub host_prefix: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            layout_path: PathBuf::from("storage-layout.json"),
            bind_addr: "0.0.0.0:3001".to_string(),
            enable_smart_temps: false,
            fs_type_filter: DEFAULT_FS_TYPE_FILTER.iter().map(|s| s.to_string()).collect(),
            disable_storage: false,
            poll_interval: poller.interval,
            max_wait: poller.max_wait,
            probe_timeout: Duration::from_secs(3),
            smartctl_path: "smartctl".to_string(),
            smartctl_args: Vec::new(),
            host_prefix: None,
        }
    }
}

impl TelemetryConfig {
    /// Reject settings the poll loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".to_string()));
        }
        if self.max_wait.is_zero() {
            return Err(Error::Config("max wait must be greater than zero".to_string()));
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::Config("probe timeout must be greater than zero".to_string()));
        }
        // A tick runs the collectors, then the probes, each bounded by the
        // probe timeout. Both must fit inside max wait or a hung smartctl is
        // dropped before its failure reaches the health cache.
        if self.probe_timeout.saturating_mul(2) >= self.max_wait {
            return Err(Error::Config(format!(
                "max wait ({:?}) must exceed twice the probe timeout ({:?})",
                self.max_wait, self.probe_timeout
            )));
        }
        if let Some(prefix) = &self.host_prefix {
            if !prefix.starts_with('/') {
                return Err(Error::Config(format!(
                    "host prefix '{}' must be an absolute path",
                    prefix
                )));
            }
        }
        Ok(())
    }

    pub fn mapper_config(&self) -> MapperConfig {
        MapperConfig {
            enable_smart_temps: self.enable_smart_temps,
            fs_type_filter: self.fs_type_filter.clone(),
            host: HostPaths {
                host_prefix: self.host_prefix.clone(),
                windows: cfg!(windows),
            },
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            max_wait: self.max_wait,
        }
    }
}

/// Normalize a filesystem type list: trimmed, lowercased, blanks dropped.
pub fn parse_fs_type_filter<I, S>(types: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    types
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
