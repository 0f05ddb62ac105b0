//! Base URLs for the doppler and UAA endpoints.

use url::Url;

use crate::error::ConfigError;

/// Parse a `ws`, `wss`, `http` or `https` base URL.
///
/// Query strings and userinfo are kept; a host is required.
pub fn parse_endpoint(uri: &str) -> Result<Url, ConfigError> {
    let uri = uri.trim();
    let url = Url::parse(uri).map_err(|e| ConfigError::InvalidEndpoint(format!("{uri}: {e}")))?;

    if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
        return Err(ConfigError::InvalidEndpoint(format!(
            "{uri}: unsupported scheme {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidEndpoint(format!("{uri}: missing host")));
    }
    Ok(url)
}

pub fn is_tls(url: &Url) -> bool {
    matches!(url.scheme(), "wss" | "https")
}

/// The same URL with `http(s)` mapped to `ws(s)`.
pub fn to_websocket(url: &Url) -> Url {
    let mut ws = url.clone();
    let scheme = if is_tls(url) { "wss" } else { "ws" };
    // Switching between special schemes cannot fail.
    let _ = ws.set_scheme(scheme);
    ws
}

/// `base` with `segments` appended below its path, each percent-encoded.
pub fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Host name without IPv6 brackets, suitable for TLS SNI.
pub fn server_name(url: &Url) -> &str {
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']')
}

/// `host:port` with the scheme's default port filled in.
pub fn socket_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
