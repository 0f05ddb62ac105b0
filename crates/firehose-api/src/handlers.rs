//! Route handlers.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse};
use tracing::debug;

use firehose_metrics::CONTENT_TYPE;

use crate::ApiState;

/// GET <telemetry path>
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let registry = state.registry.clone();
    // Rendering takes the store's read lock; keep it off the async workers.
    let body = match tokio::task::spawn_blocking(move || registry.render()).await {
        Ok(body) => body,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("render failed: {e}"))
                .into_response();
        }
    };
    debug!(bytes = body.len(), "metrics scraped");

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /
pub async fn landing_page(State(state): State<ApiState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Cloud Foundry Firehose Exporter</title></head>\n\
         <body>\n\
         <h1>Cloud Foundry Firehose Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = state.telemetry_path
    ))
}
