//! firehose-nozzle: the doppler firehose consumer.
//!
//! Opens an authenticated websocket subscription, decodes every envelope
//! into the shared [`MetricsStore`](firehose_metrics::MetricsStore) and
//! reconnects with exponential backoff when the stream drops.
//!
//! # Architecture
//!
//! ```text
//! Nozzle
//!   ├── TokenProvider (StaticToken | UaaTokenRefresher)
//!   │     └── current_token() before every connect
//!   ├── RetryBackoff (consecutive failures, min → max delay)
//!   └── MetricsStore::add_metric() per envelope
//! ```
//!
//! # Slow consumers
//!
//! Doppler signals that it is dropping messages for this subscription in
//! two ways: a `TruncatingBuffer.DroppedMessages` counter event, or a
//! close frame with code 1008. Either one raises the store's sticky
//! slow-consumer alert.

pub mod backoff;
pub mod error;
pub mod nozzle;
pub mod tls;
pub mod token;

pub use backoff::RetryBackoff;
pub use error::{NozzleError, NozzleResult, TokenError};
pub use nozzle::{DROPPED_MESSAGES_COUNTER, Nozzle, NozzleConfig};
pub use token::{Credentials, StaticToken, TokenProvider, UaaTokenRefresher};
