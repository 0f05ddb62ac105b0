//! firehose-core: shared types for the firehose exporter.
//!
//! Holds everything the nozzle, the metrics store and the binary agree on:
//!
//! - **`envelope`**: the dropsonde wire schema (prost) and the decoded
//!   [`Envelope`] with its closed [`Payload`] union
//! - **`filters`**: deployment and event-kind allow-lists
//! - **`endpoint`**: parsing of the doppler / UAA base URLs
//! - **`config`**: the exporter configuration model and duration parsing

pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod filters;

pub use config::{
    parse_duration, AuthConfig, DopplerConfig, ExporterConfig, FilterConfig, MetricsConfig,
    UaaConfig, WebConfig,
};
pub use endpoint::parse_endpoint;
pub use envelope::{CounterEvent, Envelope, EventKind, Payload, ValueMetric};
pub use error::{ConfigError, EnvelopeError};
pub use filters::{DeploymentFilter, EventFilter};
