//! Device Health Prober
//!
//! Runs the disk-diagnostic utility against one device path and turns its
//! output into a [`SmartRecord`].

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};

use super::parse::parse_record;
use crate::model::SmartRecord;

/// smartctl exit bits 0 and 1: command line did not parse, device open failed.
/// Higher bits report disk conditions and still come with usable output.
const FATAL_EXIT_MASK: i32 = 0b11;

// =============================================================================
// Probe Errors
// =============================================================================

/// Reasons a probe produced no usable output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The tool could not be started
    #[error("failed to run {binary}: {reason}")]
    Spawn { binary: String, reason: String },

    /// The tool reported a fatal exit status
    #[error("{binary} exited with status {code}")]
    ExitStatus { binary: String, code: i32 },

    /// The tool was killed by a signal
    #[error("{binary} was terminated by a signal")]
    Terminated { binary: String },

    /// The tool did not finish in time
    #[error("{binary} timed out after {timeout:?}")]
    Timeout { binary: String, timeout: Duration },
}

// =============================================================================
// Prober Port
// =============================================================================

/// Capability to read health telemetry for one device path.
#[async_trait]
pub trait DeviceProber: Send + Sync {
    /// Probe an absolute device path such as `/dev/sda`.
    async fn probe(&self, device_path: &str) -> Result<SmartRecord, ProbeError>;
}

// =============================================================================
// smartctl Prober
// =============================================================================

/// Invocation modes of the diagnostic tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeMode {
    /// Attribute table dump
    Attributes,
    /// Overall health self-assessment
    Health,
}

impl ProbeMode {
    fn flag(self) -> &'static str {
        match self {
            ProbeMode::Attributes => "-A",
            ProbeMode::Health => "-H",
        }
    }
}

/// [`DeviceProber`] backed by `smartctl`.
#[derive(Debug, Clone)]
pub struct SmartctlProber {
    binary: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SmartctlProber {
    /// Create a prober for the given binary, bounding each invocation by `timeout`.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            timeout,
        }
    }

    /// Arguments placed before the mode flag on every invocation.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    async fn run(&self, mode: ProbeMode, device_path: &str) -> Result<String, ProbeError> {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .arg(mode.flag())
            .arg(device_path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| ProbeError::Timeout {
                binary: self.binary.clone(),
                timeout: self.timeout,
            })?
            .map_err(|e| ProbeError::Spawn {
                binary: self.binary.clone(),
                reason: e.to_string(),
            })?;

        self.check_status(output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn check_status(&self, status: ExitStatus) -> Result<(), ProbeError> {
        match status.code() {
            None => Err(ProbeError::Terminated {
                binary: self.binary.clone(),
            }),
            Some(code) if code & FATAL_EXIT_MASK != 0 => Err(ProbeError::ExitStatus {
                binary: self.binary.clone(),
                code,
            }),
            Some(_) => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceProber for SmartctlProber {
    #[instrument(skip(self))]
    async fn probe(&self, device_path: &str) -> Result<SmartRecord, ProbeError> {
        let (attributes, health) = tokio::join!(
            self.run(ProbeMode::Attributes, device_path),
            self.run(ProbeMode::Health, device_path),
        );

        match (attributes, health) {
            (Err(e), Err(_)) => Err(e),
            (attributes, health) => {
                if let Err(e) = &attributes {
                    debug!("Attribute dump failed for {}: {}", device_path, e);
                }
                if let Err(e) = &health {
                    debug!("Health assessment failed for {}: {}", device_path, e);
                }
                Ok(parse_record(attributes.ok().as_deref(), health.ok().as_deref()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_mode_flags() {
        assert_eq!(ProbeMode::Attributes.flag(), "-A");
        assert_eq!(ProbeMode::Health.flag(), "-H");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let prober = SmartctlProber::new("/nonexistent/smartctl", Duration::from_secs(1));
        let err = prober.probe("/dev/sda").await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fatal_exit_status_is_error() {
        // `false` ignores its arguments and exits with 1
        let prober = SmartctlProber::new("false", Duration::from_secs(5));
        let err = prober.probe("/dev/sda").await.unwrap_err();
        assert_eq!(
            err,
            ProbeError::ExitStatus {
                binary: "false".to_string(),
                code: 1
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_with_unparseable_output_is_unknown() {
        // `echo` prints its arguments and exits 0
        let prober = SmartctlProber::new("echo", Duration::from_secs(5));
        let record = prober.probe("/dev/sda").await.unwrap();
        assert!(record.is_unknown());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_attribute_and_health_runs_overlap() {
        // Each run sleeps 1s and ignores the mode flag and device path
        let prober = SmartctlProber::new("sh", Duration::from_secs(5))
            .with_args(vec!["-c".to_string(), "sleep 1".to_string(), "sh".to_string()]);

        let started = std::time::Instant::now();
        let record = prober.probe("/dev/sda").await.unwrap();
        let elapsed = started.elapsed();

        assert!(record.is_unknown());
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1800), "runs were serialized: {:?}", elapsed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_tool_times_out() {
        let prober = SmartctlProber::new("sh", Duration::from_millis(200))
            .with_args(vec!["-c".to_string(), "sleep 5".to_string(), "sh".to_string()]);

        let err = prober.probe("/dev/sda").await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
    }

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::Timeout {
            binary: "smartctl".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "smartctl timed out after 10s");
    }
}
