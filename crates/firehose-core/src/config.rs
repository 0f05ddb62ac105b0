//! Exporter configuration.
//!
//! The TOML file mirrors the CLI flags section by section:
//!
//! ```toml
//! [doppler]
//! url = "wss://doppler.sys.example.com"
//! subscription_id = "prometheus"
//! max_retry_count = 0
//!
//! [uaa]
//! url = "https://uaa.sys.example.com"
//! client_id = "firehose_exporter"
//! client_secret = "secret"
//!
//! [metrics]
//! namespace = "firehose"
//! expiration = "10m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::endpoint::parse_endpoint;
use crate::envelope::EventKind;
use crate::error::ConfigError;
use crate::filters::{DeploymentFilter, EventFilter};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExporterConfig {
    pub doppler: DopplerConfig,
    pub uaa: Option<UaaConfig>,
    pub auth: AuthConfig,
    pub metrics: MetricsConfig,
    pub filter: FilterConfig,
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DopplerConfig {
    pub url: String,
    pub subscription_id: String,
    #[serde(deserialize_with = "de_duration")]
    pub idle_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub min_retry_delay: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_retry_delay: Duration,
    /// Zero means retry forever.
    pub max_retry_count: u32,
    pub skip_tls_verify: bool,
}

impl Default for DopplerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            subscription_id: "prometheus".to_string(),
            idle_timeout: Duration::ZERO,
            min_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(60),
            max_retry_count: 0,
            skip_tls_verify: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UaaConfig {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// A static bearer token, used instead of UAA.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub namespace: String,
    pub environment: String,
    /// Zero keeps entries forever.
    #[serde(deserialize_with = "de_duration")]
    pub expiration: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub cleanup_interval: Duration,
    /// Replaces UUID origins in labels when non-empty.
    pub custom_uuid_origin: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "firehose".to_string(),
            environment: String::new(),
            expiration: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(2 * 60),
            custom_uuid_origin: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub deployments: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebConfig {
    pub listen_address: String,
    pub telemetry_path: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9186".to_string(),
            telemetry_path: "/metrics".to_string(),
        }
    }
}

impl ExporterConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check everything that can be checked before any connection is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.doppler.url.trim().is_empty() {
            return Err(ConfigError::Missing("doppler.url"));
        }
        parse_endpoint(&self.doppler.url)?;

        if self.doppler.subscription_id.trim().is_empty() {
            return Err(ConfigError::Missing("doppler.subscription_id"));
        }

        if self.doppler.min_retry_delay > self.doppler.max_retry_delay {
            return Err(ConfigError::Invalid(format!(
                "doppler.min_retry_delay ({:?}) exceeds doppler.max_retry_delay ({:?})",
                self.doppler.min_retry_delay, self.doppler.max_retry_delay
            )));
        }

        match (&self.uaa, &self.auth.token) {
            (Some(uaa), _) => {
                parse_endpoint(&uaa.url)?;
                if uaa.client_id.is_empty() {
                    return Err(ConfigError::Missing("uaa.client_id"));
                }
            }
            (None, Some(token)) if !token.is_empty() => {}
            _ => return Err(ConfigError::Missing("uaa.url or auth.token")),
        }

        if self.metrics.namespace.trim().is_empty() {
            return Err(ConfigError::Missing("metrics.namespace"));
        }

        if !self.web.telemetry_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "web.telemetry_path must start with '/': {}",
                self.web.telemetry_path
            )));
        }

        for kind in &self.filter.events {
            kind.parse::<EventKind>()?;
        }

        Ok(())
    }

    pub fn deployment_filter(&self) -> DeploymentFilter {
        DeploymentFilter::new(&self.filter.deployments)
    }

    pub fn event_filter(&self) -> Result<EventFilter, ConfigError> {
        EventFilter::new(&self.filter.events)
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(invalid)
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
