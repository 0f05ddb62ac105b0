//! Error types for the nozzle and its credential providers.

use thiserror::Error;

use firehose_core::ConfigError;

/// Result type alias for nozzle operations.
pub type NozzleResult<T> = Result<T, NozzleError>;

/// Errors raised while obtaining a bearer token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The provider can never succeed with its current settings.
    #[error("invalid token configuration: {0}")]
    InvalidConfig(String),

    #[error("token request failed: {0}")]
    Request(String),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid token response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TokenError {
    /// Whether retrying could ever help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TokenError::InvalidConfig(_))
    }
}

/// Errors that end [`Nozzle::start`](crate::Nozzle::start).
#[derive(Debug, Error)]
pub enum NozzleError {
    #[error("firehose connection lost, gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("credential provider failed permanently: {0}")]
    Credentials(#[source] TokenError),

    #[error("invalid nozzle configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("tls setup failed: {0}")]
    Tls(#[from] rustls::Error),
}
