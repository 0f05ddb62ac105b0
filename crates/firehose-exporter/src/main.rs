//! firehose-exporter: Cloud Foundry firehose metrics for Prometheus.
//!
//! Single binary that assembles the exporter:
//! - Metrics store with its expiration sweep
//! - Firehose nozzle (doppler websocket subscription)
//! - HTTP server for the telemetry path
//!
//! # Usage
//!
//! ```text
//! firehose-exporter \
//!     --doppler.url wss://doppler.sys.example.com:443 \
//!     --uaa.url https://uaa.sys.example.com \
//!     --uaa.client-id firehose_exporter \
//!     --uaa.client-secret secret
//! ```

mod cli;
mod exporter;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cli::{Cli, LogFormat};

const DEFAULT_LOG_FILTER: &str = "info,firehose=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };

    if let Err(e) = exporter::run(config).await {
        error!(error = %format!("{e:#}"), "firehose exporter stopped");
        return Err(e);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
