//! Poll loop
//!
//! Each tick re-reads both live snapshots, maps the full layout, and
//! publishes the result. Nothing carries over between ticks except what the
//! health cache holds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::collector::SnapshotSource;
use crate::error::Error;
use crate::mapper::StorageLoadMapper;
use crate::model::{StorageLayoutEntry, StorageLoadExtendedEntry};
use crate::telemetry::{self, outcome};

/// Latest published snapshot; `None` until the first successful tick.
pub type SnapshotReceiver = watch::Receiver<Option<Arc<LoadSnapshot>>>;

/// One tick's mapper output
#[derive(Debug, Clone, Serialize)]
pub struct LoadSnapshot {
    pub entries: Vec<StorageLoadExtendedEntry>,
    pub computed_at: DateTime<Utc>,
}

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between ticks
    pub interval: Duration,
    /// A tick still running after this long is abandoned
    pub max_wait: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(8),
        }
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    CollectorFailed,
    TimedOut,
}

impl TickOutcome {
    fn label(self) -> &'static str {
        match self {
            TickOutcome::Published => outcome::PUBLISHED,
            TickOutcome::CollectorFailed => outcome::COLLECTOR_FAILED,
            TickOutcome::TimedOut => outcome::TIMED_OUT,
        }
    }
}

pub struct Poller {
    config: PollerConfig,
    layout: Arc<Vec<StorageLayoutEntry>>,
    source: Arc<dyn SnapshotSource>,
    mapper: Arc<StorageLoadMapper>,
    tx: watch::Sender<Option<Arc<LoadSnapshot>>>,
}

impl Poller {
    /// Create a poller and the receiver its snapshots are published on.
    pub fn new(
        config: PollerConfig,
        layout: Arc<Vec<StorageLayoutEntry>>,
        source: Arc<dyn SnapshotSource>,
        mapper: Arc<StorageLoadMapper>,
    ) -> (Self, SnapshotReceiver) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                config,
                layout,
                source,
                mapper,
                tx,
            },
            rx,
        )
    }

    /// Run one full collection and mapping pass.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        let work = async {
            let (blocks, sizes) =
                tokio::try_join!(self.source.block_devices(), self.source.filesystem_sizes())?;
            Ok::<_, Error>(self.mapper.map(&self.layout, &blocks, &sizes).await)
        };

        let outcome = match timeout(self.config.max_wait, work).await {
            Err(_) => {
                warn!("Poll tick exceeded {:?}, discarding", self.config.max_wait);
                TickOutcome::TimedOut
            }
            Ok(Err(e)) => {
                warn!("Snapshot collection failed: {}", e);
                TickOutcome::CollectorFailed
            }
            Ok(Ok(entries)) => {
                debug!("Publishing {} storage entries", entries.len());
                self.tx.send_replace(Some(Arc::new(LoadSnapshot {
                    entries,
                    computed_at: Utc::now(),
                })));
                TickOutcome::Published
            }
        };

        telemetry::metrics()
            .poll_ticks
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    /// Tick until `shutdown` fires. A tick in flight at shutdown is dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Poller started (interval {:?}, max wait {:?}, {} layout entries)",
            self.config.interval,
            self.config.max_wait,
            self.layout.len()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }
        }

        info!("Poller stopped");
    }
}
