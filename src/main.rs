//! Storage Telemetry Service
//!
//! Polls the host's block devices and filesystem usage, maps them onto the
//! configured storage layout, and serves load and disk health over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Storage Telemetry Service                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌────────────┐    ┌────────────┐          │
//! │  │ Collector  │───▶│   Mapper   │───▶│   Poller   │───▶ HTTP │
//! │  │ lsblk / df │    │            │    │  (watch)   │          │
//! │  └────────────┘    └─────▲──────┘    └────────────┘          │
//! │                          │                                    │
//! │                    ┌─────┴──────┐                             │
//! │                    │HealthCache │◀── smartctl                 │
//! │                    └────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_telemetry::collector::SystemSnapshotSource;
use storage_telemetry::config::{parse_fs_type_filter, TelemetryConfig};
use storage_telemetry::error::{Error, Result};
use storage_telemetry::model::load_layout;
use storage_telemetry::protocol::server::{run_server, ServerState};
use storage_telemetry::{HealthCache, LoadClient, Poller, SmartctlProber, StorageLoadMapper};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Telemetry - storage load and disk health for a static layout
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Static storage layout file (JSON, or YAML by extension)
    #[arg(long, env = "STORAGE_LAYOUT")]
    layout: Option<PathBuf>,

    /// HTTP server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3001")]
    bind_addr: String,

    /// Poll disk temperature and health via smartctl
    #[arg(long, env = "ENABLE_SMART_TEMPS")]
    enable_smart_temps: bool,

    /// Filesystem types excluded from size matching
    #[arg(
        long,
        env = "FS_TYPE_FILTER",
        value_delimiter = ',',
        default_value = "cifs,9p,fuse.rclone,fuse.mergerfs,nfs4,iso9660,fuse.shfs,autofs"
    )]
    fs_type_filter: Vec<String>,

    /// Serve empty bodies instead of storage load
    #[arg(long, env = "DISABLE_STORAGE")]
    disable_storage: bool,

    /// Poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value = "10")]
    poll_interval_seconds: u64,

    /// Maximum wait for a poll tick or the first snapshot, in seconds
    #[arg(long, env = "MAX_WAIT_SECONDS", default_value = "8")]
    max_wait_seconds: u64,

    /// Timeout for each smartctl, lsblk or df invocation, in seconds
    #[arg(long, env = "PROBE_TIMEOUT_SECONDS", default_value = "3")]
    probe_timeout_seconds: u64,

    /// smartctl binary
    #[arg(long, env = "SMARTCTL_PATH", default_value = "smartctl")]
    smartctl_path: String,

    /// Extra smartctl arguments placed before the mode flag
    #[arg(long, env = "SMARTCTL_ARGS", value_delimiter = ',', allow_hyphen_values = true)]
    smartctl_args: Vec<String>,

    /// Where the host root is mounted when running in a container
    #[arg(long, env = "HOST_PREFIX")]
    host_prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch storage load from a running server and print it as JSON
    Fetch {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3001")]
        url: String,

        /// Request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout_seconds: u64,
    },
}

impl Args {
    fn telemetry_config(&self) -> Result<TelemetryConfig> {
        let layout_path = self.layout.clone().ok_or_else(|| {
            Error::Config("a storage layout is required (--layout or STORAGE_LAYOUT)".to_string())
        })?;

        Ok(TelemetryConfig {
            layout_path,
            bind_addr: self.bind_addr.clone(),
            enable_smart_temps: self.enable_smart_temps,
            fs_type_filter: parse_fs_type_filter(&self.fs_type_filter),
            disable_storage: self.disable_storage,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            max_wait: Duration::from_secs(self.max_wait_seconds),
            probe_timeout: Duration::from_secs(self.probe_timeout_seconds),
            smartctl_path: self.smartctl_path.clone(),
            smartctl_args: self.smartctl_args.clone(),
            host_prefix: self.host_prefix.clone(),
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    if let Some(Command::Fetch { url, timeout_seconds }) = &args.command {
        return fetch(url, Duration::from_secs(*timeout_seconds)).await;
    }

    let config = args.telemetry_config()?;
    config.validate()?;
    serve(config).await
}

async fn serve(config: TelemetryConfig) -> Result<()> {
    info!("Starting Storage Telemetry");
    info!("  Layout: {}", config.layout_path.display());
    info!("  SMART temperatures: {}", config.enable_smart_temps);
    info!("  Storage disabled: {}", config.disable_storage);
    info!("  Poll interval: {:?}", config.poll_interval);

    let layout = Arc::new(load_layout(&config.layout_path)?);
    info!("Loaded {} layout entries", layout.len());

    let prober = SmartctlProber::new(config.smartctl_path.clone(), config.probe_timeout)
        .with_args(config.smartctl_args.clone());
    let cache = Arc::new(HealthCache::new(Arc::new(prober)));
    let mapper = Arc::new(StorageLoadMapper::new(config.mapper_config(), cache));
    let source = Arc::new(SystemSnapshotSource::new(config.probe_timeout));

    let (poller, snapshots) = Poller::new(config.poller_config(), layout, source, mapper);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_token.cancel();
    });

    let poller_handle = if config.disable_storage {
        None
    } else {
        Some(tokio::spawn(poller.run(shutdown.clone())))
    };

    let state = ServerState::new(snapshots, !config.disable_storage, config.max_wait);
    let served = run_server(&config.bind_addr, state, shutdown.clone()).await;
    shutdown.cancel();

    if let Some(handle) = poller_handle {
        if let Err(e) = handle.await {
            error!("Poller task failed: {}", e);
        }
    }

    served?;
    info!("Storage Telemetry shutdown complete");
    Ok(())
}

async fn fetch(url: &str, timeout: Duration) -> Result<()> {
    let client = LoadClient::new(url, timeout)
        .map_err(|e| Error::Internal(format!("Client creation failed: {}", e)))?;

    let entries = client
        .fetch_storage_load()
        .await
        .map_err(|e| Error::Internal(format!("Fetching storage load failed: {}", e)))?;

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = ["hyper=warn", "reqwest=warn"]
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::from_default_env().add_directive(level.into()), |f, d| {
            f.add_directive(d)
        });

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
