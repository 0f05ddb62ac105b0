//! Router tests: scrape a store filled with firehose envelopes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use firehose_api::build_router;
use firehose_core::{DeploymentFilter, Envelope, EventFilter};
use firehose_metrics::{MetricsStore, Registry};

fn test_store() -> Arc<MetricsStore> {
    Arc::new(MetricsStore::new(
        Duration::ZERO,
        Duration::ZERO,
        DeploymentFilter::default(),
        EventFilter::default(),
    ))
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn scrape_exposes_counter_events() {
    let store = test_store();
    store.add_metric(
        &Envelope::counter("fake.origin", "FakeCounterEvent1", 5, 1000)
            .with_job("fake-deployment-name", "fake-job-name", "0", "1.2.3.4")
            .with_tag("tag1", "v1"),
    );
    let registry = Arc::new(Registry::for_store("test_exporter", "test_environment", store));
    let router = build_router(registry, "/metrics");

    let (status, body) = get(router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let labels = "origin=\"fake.origin\",bosh_deployment=\"fake-deployment-name\",\
                  bosh_job_name=\"fake-job-name\",bosh_job_id=\"0\",bosh_job_ip=\"1.2.3.4\",\
                  tag1=\"v1\",environment=\"test_environment\"";
    assert!(body.contains(&format!(
        "test_exporter_counter_event_fake_origin_fake_counter_event_1_total{{{labels}}} 1000\n"
    )));
    assert!(body.contains(&format!(
        "test_exporter_counter_event_fake_origin_fake_counter_event_1_delta{{{labels}}} 5\n"
    )));
    assert!(body.contains(
        "# TYPE test_exporter_counter_event_fake_origin_fake_counter_event_1_total counter"
    ));
    assert!(body.contains(
        "test_exporter_firehose_total_envelopes_received{environment=\"test_environment\"} 1"
    ));
}

#[tokio::test]
async fn scrape_exposes_prefixed_names() {
    let store = test_store();
    store.add_metric(&Envelope::counter("p.fake.origin", "/p.fake/CounterEvent2", 10, 2000));
    let registry = Arc::new(Registry::for_store("test_exporter", "", store));
    let router = build_router(registry, "/metrics");

    let (_, body) = get(router, "/metrics").await;
    assert!(body.contains("test_exporter_counter_event_p_fake_origin_p_fake_counter_event_2_total"));
}

#[tokio::test]
async fn custom_telemetry_path() {
    let registry = Arc::new(Registry::for_store("firehose", "", test_store()));
    let router = build_router(registry, "/telemetry");

    let (status, body) = get(router.clone(), "/telemetry").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("firehose_firehose_slow_consumer_alert"));

    let (status, _) = get(router, "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn healthz_and_landing_page() {
    let registry = Arc::new(Registry::for_store("firehose", "", test_store()));
    let router = build_router(registry, "/metrics");

    let (status, body) = get(router.clone(), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, body) = get(router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<a href=\"/metrics\">"));
}
