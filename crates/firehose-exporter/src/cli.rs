//! Command-line flags.
//!
//! Every flag is optional and can also be set through its
//! `FIREHOSE_EXPORTER_*` environment variable. Flags override values from
//! the `--config` file, which override the built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use firehose_core::{ConfigError, ExporterConfig, UaaConfig, parse_duration};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "firehose-exporter",
    version,
    about = "Exports Cloud Foundry firehose metrics for Prometheus"
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "FIREHOSE_EXPORTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t, env = "FIREHOSE_EXPORTER_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Doppler websocket endpoint, e.g. wss://doppler.sys.example.com:443.
    #[arg(long = "doppler.url", env = "FIREHOSE_EXPORTER_DOPPLER_URL")]
    pub doppler_url: Option<String>,

    /// Firehose subscription id; exporters sharing it split the stream.
    #[arg(long = "doppler.subscription-id", env = "FIREHOSE_EXPORTER_DOPPLER_SUBSCRIPTION_ID")]
    pub subscription_id: Option<String>,

    /// Reconnect when no envelope arrives for this long (0 disables).
    #[arg(long = "doppler.idle-timeout", value_parser = parse_duration, env = "FIREHOSE_EXPORTER_DOPPLER_IDLE_TIMEOUT")]
    pub idle_timeout: Option<Duration>,

    #[arg(long = "doppler.min-retry-delay", value_parser = parse_duration, env = "FIREHOSE_EXPORTER_DOPPLER_MIN_RETRY_DELAY")]
    pub min_retry_delay: Option<Duration>,

    #[arg(long = "doppler.max-retry-delay", value_parser = parse_duration, env = "FIREHOSE_EXPORTER_DOPPLER_MAX_RETRY_DELAY")]
    pub max_retry_delay: Option<Duration>,

    /// Consecutive reconnect attempts before giving up (0 retries forever).
    #[arg(long = "doppler.max-retry-count", env = "FIREHOSE_EXPORTER_DOPPLER_MAX_RETRY_COUNT")]
    pub max_retry_count: Option<u32>,

    /// Accept any TLS certificate from doppler and UAA.
    #[arg(long = "skip-ssl-verify", env = "FIREHOSE_EXPORTER_SKIP_SSL_VERIFY")]
    pub skip_ssl_verify: bool,

    #[arg(long = "uaa.url", env = "FIREHOSE_EXPORTER_UAA_URL")]
    pub uaa_url: Option<String>,

    #[arg(long = "uaa.client-id", env = "FIREHOSE_EXPORTER_UAA_CLIENT_ID")]
    pub uaa_client_id: Option<String>,

    #[arg(long = "uaa.client-secret", env = "FIREHOSE_EXPORTER_UAA_CLIENT_SECRET", hide_env_values = true)]
    pub uaa_client_secret: Option<String>,

    /// Pre-issued token sent as-is, instead of asking UAA.
    #[arg(long = "auth.token", env = "FIREHOSE_EXPORTER_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    #[arg(long = "metrics.namespace", env = "FIREHOSE_EXPORTER_METRICS_NAMESPACE")]
    pub metrics_namespace: Option<String>,

    /// Value of the `environment` label on every metric.
    #[arg(long = "metrics.environment", env = "FIREHOSE_EXPORTER_METRICS_ENVIRONMENT")]
    pub metrics_environment: Option<String>,

    /// Drop series not updated for this long (0 keeps them forever).
    #[arg(long = "metrics.expiration", value_parser = parse_duration, env = "FIREHOSE_EXPORTER_METRICS_EXPIRATION")]
    pub metrics_expiration: Option<Duration>,

    #[arg(long = "metrics.cleanup-interval", value_parser = parse_duration, env = "FIREHOSE_EXPORTER_METRICS_CLEANUP_INTERVAL")]
    pub metrics_cleanup_interval: Option<Duration>,

    /// Origin label reported for application (UUID-origin) metrics.
    #[arg(long = "metrics.custom-uuid-origin", env = "FIREHOSE_EXPORTER_METRICS_CUSTOM_UUID_ORIGIN")]
    pub metrics_custom_uuid_origin: Option<String>,

    /// Comma separated BOSH deployments to keep (empty keeps all).
    #[arg(long = "filter.deployments", value_delimiter = ',', env = "FIREHOSE_EXPORTER_FILTER_DEPLOYMENTS")]
    pub filter_deployments: Option<Vec<String>>,

    /// Comma separated event kinds to keep, e.g. CounterEvent,ValueMetric.
    #[arg(long = "filter.events", value_delimiter = ',', env = "FIREHOSE_EXPORTER_FILTER_EVENTS")]
    pub filter_events: Option<Vec<String>>,

    #[arg(long = "web.listen-address", env = "FIREHOSE_EXPORTER_WEB_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    #[arg(long = "web.telemetry-path", env = "FIREHOSE_EXPORTER_WEB_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,
}

impl Cli {
    /// Load the config file (if any), apply flags, and validate.
    pub fn load_config(&self) -> Result<ExporterConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ExporterConfig::from_file(path)?,
            None => ExporterConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ExporterConfig) {
        let doppler = &mut config.doppler;
        set(&mut doppler.url, &self.doppler_url);
        set(&mut doppler.subscription_id, &self.subscription_id);
        set(&mut doppler.idle_timeout, &self.idle_timeout);
        set(&mut doppler.min_retry_delay, &self.min_retry_delay);
        set(&mut doppler.max_retry_delay, &self.max_retry_delay);
        set(&mut doppler.max_retry_count, &self.max_retry_count);
        if self.skip_ssl_verify {
            doppler.skip_tls_verify = true;
        }

        if self.uaa_url.is_some() || self.uaa_client_id.is_some() || self.uaa_client_secret.is_some() {
            let uaa = config.uaa.get_or_insert_with(UaaConfig::default);
            set(&mut uaa.url, &self.uaa_url);
            set(&mut uaa.client_id, &self.uaa_client_id);
            set(&mut uaa.client_secret, &self.uaa_client_secret);
        }
        if self.auth_token.is_some() {
            config.auth.token = self.auth_token.clone();
        }

        let metrics = &mut config.metrics;
        set(&mut metrics.namespace, &self.metrics_namespace);
        set(&mut metrics.environment, &self.metrics_environment);
        set(&mut metrics.expiration, &self.metrics_expiration);
        set(&mut metrics.cleanup_interval, &self.metrics_cleanup_interval);
        set(&mut metrics.custom_uuid_origin, &self.metrics_custom_uuid_origin);

        set(&mut config.filter.deployments, &self.filter_deployments);
        set(&mut config.filter.events, &self.filter_events);

        set(&mut config.web.listen_address, &self.listen_address);
        set(&mut config.web.telemetry_path, &self.telemetry_path);
    }
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}
