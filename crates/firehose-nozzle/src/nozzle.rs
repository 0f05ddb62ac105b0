//! The firehose subscription loop.
//!
//! A [`Nozzle`] keeps one websocket open to `<doppler>/firehose/<id>` and
//! feeds every decoded envelope into the [`MetricsStore`]. Doppler splits
//! the stream between all connections sharing a subscription id, so
//! several exporters with the same id each see a disjoint share.
//!
//! ```text
//! Connecting ──ok──▶ Streaming ──close/idle/error──▶ Disconnected
//!     ▲                                                  │
//!     └──────────────── after backoff ◀──────────────────┤
//!                                                        ▼
//!                                        Terminated (retry limit reached)
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use http::HeaderValue;
use http::header::AUTHORIZATION;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use firehose_core::endpoint::{self, parse_endpoint};
use firehose_core::{DopplerConfig, Envelope, Payload};
use firehose_metrics::MetricsStore;

use crate::backoff::RetryBackoff;
use crate::error::{NozzleError, NozzleResult};
use crate::tls;
use crate::token::TokenProvider;

/// Counter doppler emits when it drops messages for a slow subscriber.
pub const DROPPED_MESSAGES_COUNTER: &str = "TruncatingBuffer.DroppedMessages";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

type FirehoseStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for one firehose subscription.
#[derive(Debug, Clone)]
pub struct NozzleConfig {
    /// Doppler base URL (`ws://`, `wss://`, or the `http(s)://` equivalent).
    pub endpoint: Url,
    pub subscription_id: String,
    pub skip_tls_verify: bool,
    /// Zero disables the idle check.
    pub idle_timeout: Duration,
    pub min_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Zero means retry forever.
    pub max_retry_count: u32,
}

impl NozzleConfig {
    pub fn from_doppler(config: &DopplerConfig) -> NozzleResult<Self> {
        Ok(Self {
            endpoint: parse_endpoint(&config.url)?,
            subscription_id: config.subscription_id.clone(),
            skip_tls_verify: config.skip_tls_verify,
            idle_timeout: config.idle_timeout,
            min_retry_delay: config.min_retry_delay,
            max_retry_delay: config.max_retry_delay,
            max_retry_count: config.max_retry_count,
        })
    }

    /// Full websocket URL of the subscription.
    pub fn subscription_url(&self) -> Url {
        endpoint::join_segments(
            &endpoint::to_websocket(&self.endpoint),
            &["firehose", &self.subscription_id],
        )
    }
}

/// Why a streaming period ended.
#[derive(Debug)]
enum Disconnect {
    ConnectFailed(String),
    Closed(Option<CloseFrame<'static>>),
    IdleTimeout(Duration),
    ReadError(String),
    StreamEnded,
}

enum Phase {
    Connecting,
    Streaming(Box<FirehoseStream>),
    Disconnected(Disconnect),
    Terminated,
}

/// Result of a connect attempt that did not produce a stream.
enum ConnectError {
    Transient(String),
    Fatal(NozzleError),
}

/// Consumer of the doppler firehose.
pub struct Nozzle<P> {
    config: NozzleConfig,
    tokens: P,
    store: Arc<MetricsStore>,
    connector: Connector,
}

impl<P: TokenProvider> Nozzle<P> {
    pub fn new(config: NozzleConfig, tokens: P, store: Arc<MetricsStore>) -> NozzleResult<Self> {
        let connector = if endpoint::is_tls(&config.endpoint) {
            Connector::Rustls(tls::client_config(config.skip_tls_verify)?)
        } else {
            Connector::Plain
        };

        Ok(Self {
            config,
            tokens,
            store,
            connector,
        })
    }

    /// Consume the firehose until a fatal error.
    ///
    /// Disconnects are retried with backoff; this only returns once the
    /// retry limit is exhausted or the credentials can never work.
    pub async fn start(&self) -> Result<Infallible, NozzleError> {
        let mut backoff = RetryBackoff::new(
            self.config.min_retry_delay,
            self.config.max_retry_delay,
            self.config.max_retry_count,
        );
        let mut phase = Phase::Connecting;

        info!(
            url = %self.config.subscription_url(),
            subscription_id = %self.config.subscription_id,
            "starting firehose nozzle"
        );

        loop {
            phase = match phase {
                Phase::Connecting => match self.connect().await {
                    Ok(stream) => Phase::Streaming(Box::new(stream)),
                    Err(ConnectError::Fatal(e)) => return Err(e),
                    Err(ConnectError::Transient(reason)) => {
                        Phase::Disconnected(Disconnect::ConnectFailed(reason))
                    }
                },
                Phase::Streaming(stream) => {
                    let (received, reason) = self.stream(*stream).await;
                    if received > 0 {
                        backoff.reset();
                    }
                    Phase::Disconnected(reason)
                }
                Phase::Disconnected(reason) => {
                    self.inspect_disconnect(&reason);
                    match backoff.next_delay() {
                        Some(delay) => {
                            info!(
                                attempt = backoff.attempts(),
                                ?delay,
                                "reconnecting to firehose"
                            );
                            tokio::time::sleep(delay).await;
                            Phase::Connecting
                        }
                        None => Phase::Terminated,
                    }
                }
                Phase::Terminated => {
                    let attempts = backoff.attempts();
                    error!(attempts, "firehose retry limit reached");
                    return Err(NozzleError::RetriesExhausted { attempts });
                }
            };
        }
    }

    async fn connect(&self) -> Result<FirehoseStream, ConnectError> {
        let token = match self.tokens.current_token().await {
            Ok(token) => token,
            Err(e) if e.is_fatal() => return Err(ConnectError::Fatal(NozzleError::Credentials(e))),
            Err(e) => return Err(ConnectError::Transient(format!("fetching token: {e}"))),
        };

        let url = self.config.subscription_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Transient(format!("building request: {e}")))?;
        let auth = HeaderValue::from_str(&token)
            .map_err(|e| ConnectError::Transient(format!("token is not a valid header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let handshake = tokio_tungstenite::connect_async_tls_with_config(
            request,
            None,
            false,
            Some(self.connector.clone()),
        );
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok((stream, response))) => {
                info!(%url, status = %response.status(), "connected to firehose");
                Ok(stream)
            }
            Ok(Err(e)) => Err(ConnectError::Transient(e.to_string())),
            Err(_) => Err(ConnectError::Transient(format!(
                "handshake timed out after {HANDSHAKE_TIMEOUT:?}"
            ))),
        }
    }

    /// Read envelopes until the connection ends.
    ///
    /// Only a decoded envelope pushes the idle deadline back; control and
    /// text frames do not. Returns how many envelopes were received and why
    /// the stream ended.
    async fn stream(&self, mut ws: FirehoseStream) -> (u64, Disconnect) {
        let idle = self.config.idle_timeout;
        let mut deadline = Instant::now() + idle;
        let mut received = 0u64;

        loop {
            let next = if idle.is_zero() {
                ws.next().await
            } else {
                match tokio::time::timeout_at(deadline, ws.next()).await {
                    Ok(next) => next,
                    Err(_) => return (received, Disconnect::IdleTimeout(idle)),
                }
            };

            match next {
                Some(Ok(Message::Binary(data))) => match Envelope::decode(&data) {
                    Ok(envelope) => {
                        received += 1;
                        deadline = Instant::now() + idle;
                        self.handle_envelope(&envelope);
                    }
                    Err(e) => debug!(error = %e, len = data.len(), "dropping malformed envelope"),
                },
                Some(Ok(Message::Close(frame))) => return (received, Disconnect::Closed(frame)),
                Some(Ok(Message::Text(_))) => trace!("ignoring text frame"),
                Some(Ok(_)) => {}
                Some(Err(e)) => return (received, Disconnect::ReadError(e.to_string())),
                None => return (received, Disconnect::StreamEnded),
            }
        }
    }

    fn handle_envelope(&self, envelope: &Envelope) {
        if let Payload::Counter(counter) = &envelope.payload {
            if counter.name == DROPPED_MESSAGES_COUNTER {
                warn!(
                    origin = %envelope.origin,
                    delta = counter.delta,
                    "doppler dropped messages for this subscription"
                );
                self.store.alert_slow_consumer();
            }
        }
        self.store.add_metric(envelope);
    }

    fn inspect_disconnect(&self, reason: &Disconnect) {
        match reason {
            Disconnect::Closed(Some(frame)) if frame.code == CloseCode::Policy => {
                warn!(reason = %frame.reason, "firehose closed the connection for policy violation");
                self.store.alert_slow_consumer();
            }
            Disconnect::Closed(Some(frame)) => {
                warn!(code = %frame.code, reason = %frame.reason, "firehose closed the connection");
            }
            Disconnect::Closed(None) => warn!("firehose closed the connection"),
            Disconnect::ConnectFailed(e) => warn!(error = %e, "firehose connect failed"),
            Disconnect::IdleTimeout(idle) => {
                warn!(?idle, "no envelope received within idle timeout")
            }
            Disconnect::ReadError(e) => warn!(error = %e, "firehose read failed"),
            Disconnect::StreamEnded => warn!("firehose stream ended"),
        }
    }
}
