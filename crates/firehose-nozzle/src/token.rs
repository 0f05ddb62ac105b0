//! Bearer credentials for the firehose subscription.
//!
//! The nozzle asks its [`TokenProvider`] for a token before every connect.
//! [`UaaTokenRefresher`] performs an OAuth2 `client_credentials` grant
//! against a UAA server and caches the result until shortly before expiry.

use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::{Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};
use url::{Position, Url};

use firehose_core::endpoint::{self, parse_endpoint};

use crate::error::TokenError;
use crate::tls;

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of the `Authorization` header value for the firehose.
pub trait TokenProvider: Send + Sync {
    /// A token valid right now, e.g. `bearer eyJhbGci...`.
    fn current_token(&self) -> impl Future<Output = Result<String, TokenError>> + Send;
}

/// A fixed, pre-issued token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    async fn current_token(&self) -> Result<String, TokenError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    /// Seconds; absent means the token does not expire.
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at
            .is_none_or(|at| Instant::now() + REFRESH_MARGIN < at)
    }
}

/// OAuth2 client-credentials token source backed by a UAA server.
pub struct UaaTokenRefresher {
    url: Url,
    token_url: Url,
    client_id: String,
    client_secret: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    cache: Mutex<Option<CachedToken>>,
}

impl UaaTokenRefresher {
    /// Validate the UAA settings. Nothing is fetched until the first call.
    pub fn new(
        url: &str,
        client_id: &str,
        client_secret: &str,
        skip_tls_verify: bool,
    ) -> Result<Self, TokenError> {
        let base = parse_endpoint(url).map_err(|e| TokenError::InvalidConfig(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(TokenError::InvalidConfig(format!(
                "uaa url must be http or https: {url}"
            )));
        }
        if client_id.is_empty() {
            return Err(TokenError::InvalidConfig("uaa client id is empty".to_string()));
        }

        let tls = if endpoint::is_tls(&base) {
            let config = tls::client_config(skip_tls_verify)
                .map_err(|e| TokenError::InvalidConfig(e.to_string()))?;
            let server_name = ServerName::try_from(endpoint::server_name(&base).to_string())
                .map_err(|e| TokenError::InvalidConfig(e.to_string()))?;
            Some((TlsConnector::from(config), server_name))
        } else {
            None
        };

        Ok(Self {
            token_url: endpoint::join_segments(&base, &["oauth", "token"]),
            url: base,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            tls,
            cache: Mutex::new(None),
        })
    }

    fn token_request(&self) -> Result<Request<Full<Bytes>>, TokenError> {
        let credentials = BASE64.encode(format!("{}:{}", self.client_id, self.client_secret));
        Request::builder()
            .method(Method::POST)
            .uri(&self.token_url[Position::BeforePath..Position::AfterQuery])
            .header(header::HOST, &self.url[Position::BeforeHost..Position::AfterPort])
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, "firehose-exporter/0.1")
            .body(Full::new(Bytes::from_static(b"grant_type=client_credentials")))
            .map_err(|e| TokenError::InvalidConfig(e.to_string()))
    }

    async fn fetch(&self) -> Result<TokenResponse, TokenError> {
        let request = self.token_request()?;
        let uri = &self.token_url[Position::BeforeHost..Position::AfterPath];

        let exchange = async {
            let stream = TcpStream::connect(endpoint::socket_authority(&self.url))
                .await
                .map_err(|e| TokenError::Request(format!("connect {uri}: {e}")))?;

            match &self.tls {
                Some((connector, server_name)) => {
                    let stream = connector
                        .connect(server_name.clone(), stream)
                        .await
                        .map_err(|e| TokenError::Request(format!("tls handshake {uri}: {e}")))?;
                    send_request(stream, request).await
                }
                None => send_request(stream, request).await,
            }
        };

        let (status, body) = tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| TokenError::Request(format!("{uri} timed out")))??;

        if !status.is_success() {
            return Err(TokenError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

impl TokenProvider for UaaTokenRefresher {
    async fn current_token(&self) -> Result<String, TokenError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let uaa = endpoint::socket_authority(&self.url);
        debug!(%uaa, "requesting new token");
        let response = self.fetch().await?;
        let token_type = if response.token_type.is_empty() {
            "bearer"
        } else {
            response.token_type.as_str()
        };
        let value = format!("{token_type} {}", response.access_token);
        let expires_at = response
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        info!(%uaa, expires_in = ?response.expires_in, "token refreshed");
        *cache = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }
}

/// The credential source selected at startup.
pub enum Credentials {
    Static(StaticToken),
    Uaa(UaaTokenRefresher),
}

impl TokenProvider for Credentials {
    async fn current_token(&self) -> Result<String, TokenError> {
        match self {
            Credentials::Static(token) => token.current_token().await,
            Credentials::Uaa(refresher) => refresher.current_token().await,
        }
    }
}

async fn send_request<S>(
    io: S,
    request: Request<Full<Bytes>>,
) -> Result<(StatusCode, Bytes), TokenError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| TokenError::Request(format!("handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "token connection closed with error");
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| TokenError::Request(e.to_string()))?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| TokenError::Request(format!("reading body: {e}")))?
        .to_bytes();

    Ok((status, body))
}
