//! firehose-api: HTTP surface of the firehose exporter.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `<telemetry path>` | Prometheus exposition (default `/metrics`) |
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/` | Landing page linking the telemetry path |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use firehose_metrics::Registry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
    pub telemetry_path: Arc<str>,
}

/// Build the exporter router.
pub fn build_router(registry: Arc<Registry>, telemetry_path: &str) -> Router {
    let state = ApiState {
        registry,
        telemetry_path: Arc::from(telemetry_path),
    };

    let mut router = Router::new()
        .route(telemetry_path, get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz));
    if telemetry_path != "/" {
        router = router.route("/", get(handlers::landing_page));
    }
    router.with_state(state)
}
