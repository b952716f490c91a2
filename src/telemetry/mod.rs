//! Service metrics
//!
//! Prometheus counters for probe activity and poll ticks, exposed on
//! `/metrics` by the HTTP server.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Process-wide metrics handle
pub fn metrics() -> &'static Metrics {
    &METRICS
}

/// Poll tick outcomes used as the `outcome` label
pub mod outcome {
    pub const PUBLISHED: &str = "published";
    pub const COLLECTOR_FAILED: &str = "collector_failed";
    pub const TIMED_OUT: &str = "timed_out";
}

pub struct Metrics {
    registry: Registry,
    /// smartctl probes actually run (cache misses)
    pub probe_invocations: IntCounter,
    /// Probes that ended in a [`crate::smart::ProbeError`]
    pub probe_failures: IntCounter,
    /// Lookups answered from the health cache
    pub cache_hits: IntCounter,
    /// Poll ticks by outcome
    pub poll_ticks: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let probe_invocations = IntCounter::new(
            "storage_telemetry_probe_invocations_total",
            "Total number of disk health probes run",
        )
        .expect("valid metric definition");
        let probe_failures = IntCounter::new(
            "storage_telemetry_probe_failures_total",
            "Total number of disk health probes that failed",
        )
        .expect("valid metric definition");
        let cache_hits = IntCounter::new(
            "storage_telemetry_cache_hits_total",
            "Total number of health lookups served from cache",
        )
        .expect("valid metric definition");
        let poll_ticks = IntCounterVec::new(
            Opts::new("storage_telemetry_poll_ticks_total", "Total number of poll ticks"),
            &["outcome"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(probe_invocations.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(probe_failures.clone()),
            Box::new(cache_hits.clone()),
            Box::new(poll_ticks.clone()),
        ] {
            registry.register(collector).expect("unique metric name");
        }

        Self {
            registry,
            probe_invocations,
            probe_failures,
            cache_hits,
            poll_ticks,
        }
    }

    /// Render all metrics in the Prometheus text format.
    ///
    /// Returns the body and its content type.
    pub fn encode(&self) -> Result<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}
