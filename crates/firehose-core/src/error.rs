//! Error types shared by the core crate.

use thiserror::Error;

use crate::envelope::EventKind;

/// Errors raised while building or validating exporter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised while decoding a single envelope off the wire.
///
/// These never stop the stream; the affected envelope is dropped.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unknown event type: {0}")]
    UnknownEventType(i32),

    #[error("{0} envelope carries no matching payload")]
    MissingPayload(EventKind),
}
