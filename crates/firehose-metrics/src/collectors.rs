//! Collectors: turn store snapshots into exposition samples.
//!
//! Each scrape calls [`Collector::collect`] on every registered collector.
//! Collectors never mutate the store.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::normalize::{normalize_name, normalize_name_desc, normalize_origin_desc};
use crate::prometheus::{MetricType, Sample, render_prometheus};
use crate::store::{MetricLabels, MetricsStore};

const COUNTER_EVENT_SUBSYSTEM: &str = "counter_event";
const VALUE_METRIC_SUBSYSTEM: &str = "value_metric";
const FIREHOSE_SUBSYSTEM: &str = "firehose";
const ENVIRONMENT_LABEL: &str = "environment";

/// Something that produces samples on every scrape.
pub trait Collector: Send + Sync {
    fn collect(&self) -> Vec<Sample>;
}

/// An ordered set of collectors rendered together.
#[derive(Default)]
pub struct Registry {
    collectors: Vec<Box<dyn Collector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three standard firehose collectors over one store.
    pub fn for_store(namespace: &str, environment: &str, store: Arc<MetricsStore>) -> Self {
        let mut registry = Self::new();
        registry.register(InternalMetricsCollector::new(namespace, environment, store.clone()));
        registry.register(CounterEventsCollector::new(namespace, environment, store.clone()));
        registry.register(ValueMetricsCollector::new(namespace, environment, store));
        registry
    }

    pub fn register(&mut self, collector: impl Collector + 'static) {
        self.collectors.push(Box::new(collector));
    }

    /// Samples from every collector, one per series.
    ///
    /// Distinct entries can normalize to the same name and label set
    /// (`statusCode` and `status_code` tags, say); only the first is kept.
    pub fn gather(&self) -> Vec<Sample> {
        let mut seen = HashSet::new();
        let mut samples = Vec::new();

        for sample in self.collectors.iter().flat_map(|c| c.collect()) {
            let mut labels = sample.labels.clone();
            labels.sort();
            if !seen.insert((sample.name.clone(), labels)) {
                warn!(name = %sample.name, labels = ?sample.labels, "duplicate series dropped");
                continue;
            }
            samples.push(sample);
        }

        samples
    }

    /// Gather every collector and render the result.
    pub fn render(&self) -> String {
        render_prometheus(&self.gather())
    }
}

/// Exposes counter events as `<ns>_counter_event_<origin>_<name>_{total,delta}`.
pub struct CounterEventsCollector {
    namespace: String,
    environment: String,
    store: Arc<MetricsStore>,
}

impl CounterEventsCollector {
    pub fn new(namespace: &str, environment: &str, store: Arc<MetricsStore>) -> Self {
        Self {
            namespace: namespace.to_string(),
            environment: environment.to_string(),
            store,
        }
    }
}

impl Collector for CounterEventsCollector {
    fn collect(&self) -> Vec<Sample> {
        let mut samples = Vec::new();

        for counter in self.store.counter_metrics() {
            let Some(labels) = build_labels(&counter.labels, None, &self.environment) else {
                warn!(
                    name = %counter.name,
                    origin = %counter.labels.origin,
                    "counter event discarded: conflicting or invalid label names"
                );
                continue;
            };

            let base = fq_name(
                &self.namespace,
                COUNTER_EVENT_SUBSYSTEM,
                &metric_name(&counter.labels.origin, &counter.name, counter.custom),
            );
            let name_desc = normalize_name_desc(&counter.name);
            let origin_desc = normalize_origin_desc(&counter.labels.origin);

            samples.push(Sample {
                name: format!("{base}_total"),
                help: format!(
                    "Cloud Foundry Firehose '{name_desc}' total counter event from '{origin_desc}'."
                ),
                metric_type: MetricType::Counter,
                labels: labels.clone(),
                value: counter.total as f64,
            });
            samples.push(Sample {
                name: format!("{base}_delta"),
                help: format!(
                    "Cloud Foundry Firehose '{name_desc}' delta counter event from '{origin_desc}'."
                ),
                metric_type: MetricType::Gauge,
                labels,
                value: counter.delta as f64,
            });
        }

        samples
    }
}

/// Exposes value metrics as `<ns>_value_metric_<origin>_<name>` gauges.
pub struct ValueMetricsCollector {
    namespace: String,
    environment: String,
    store: Arc<MetricsStore>,
}

impl ValueMetricsCollector {
    pub fn new(namespace: &str, environment: &str, store: Arc<MetricsStore>) -> Self {
        Self {
            namespace: namespace.to_string(),
            environment: environment.to_string(),
            store,
        }
    }
}

impl Collector for ValueMetricsCollector {
    fn collect(&self) -> Vec<Sample> {
        let mut samples = Vec::new();

        for metric in self.store.value_metrics() {
            let unit = (!metric.unit.is_empty()).then_some(metric.unit.as_str());
            let Some(labels) = build_labels(&metric.labels, unit, &self.environment) else {
                warn!(
                    name = %metric.name,
                    origin = %metric.labels.origin,
                    "value metric discarded: conflicting or invalid label names"
                );
                continue;
            };

            samples.push(Sample {
                name: fq_name(
                    &self.namespace,
                    VALUE_METRIC_SUBSYSTEM,
                    &metric_name(&metric.labels.origin, &metric.name, metric.custom),
                ),
                help: format!(
                    "Cloud Foundry Firehose '{}' value metric from '{}'.",
                    normalize_name_desc(&metric.name),
                    normalize_origin_desc(&metric.labels.origin)
                ),
                metric_type: MetricType::Gauge,
                labels,
                value: metric.value,
            });
        }

        samples
    }
}

/// Exposes the store's own diagnostics, including the slow-consumer alert.
pub struct InternalMetricsCollector {
    namespace: String,
    environment: String,
    store: Arc<MetricsStore>,
}

impl InternalMetricsCollector {
    pub fn new(namespace: &str, environment: &str, store: Arc<MetricsStore>) -> Self {
        Self {
            namespace: namespace.to_string(),
            environment: environment.to_string(),
            store,
        }
    }

    fn sample(&self, name: &str, help: &str, metric_type: MetricType, value: f64) -> Sample {
        Sample {
            name: fq_name(&self.namespace, FIREHOSE_SUBSYSTEM, name),
            help: help.to_string(),
            metric_type,
            labels: vec![(ENVIRONMENT_LABEL.to_string(), self.environment.clone())],
            value,
        }
    }
}

impl Collector for InternalMetricsCollector {
    fn collect(&self) -> Vec<Sample> {
        use MetricType::{Counter, Gauge};

        let m = self.store.internal_metrics();
        vec![
            self.sample(
                "total_envelopes_received",
                "Total number of envelopes received from Cloud Foundry Firehose.",
                Counter,
                m.total_envelopes_received as f64,
            ),
            self.sample(
                "last_envelope_received_timestamp",
                "Number of seconds since 1970 since last envelope received from Cloud Foundry Firehose.",
                Gauge,
                m.last_envelope_received_timestamp as f64,
            ),
            self.sample(
                "total_counter_events_received",
                "Total number of counter events received from Cloud Foundry Firehose.",
                Counter,
                m.total_counter_events_received as f64,
            ),
            self.sample(
                "last_counter_event_received_timestamp",
                "Number of seconds since 1970 since last counter event received from Cloud Foundry Firehose.",
                Gauge,
                m.last_counter_event_received_timestamp as f64,
            ),
            self.sample(
                "total_value_metrics_received",
                "Total number of value metrics received from Cloud Foundry Firehose.",
                Counter,
                m.total_value_metrics_received as f64,
            ),
            self.sample(
                "last_value_metric_received_timestamp",
                "Number of seconds since 1970 since last value metric received from Cloud Foundry Firehose.",
                Gauge,
                m.last_value_metric_received_timestamp as f64,
            ),
            self.sample(
                "total_envelopes_filtered",
                "Total number of envelopes dropped by the deployment or event filters.",
                Counter,
                m.total_envelopes_filtered as f64,
            ),
            self.sample(
                "slow_consumer_alert",
                "Cloud Foundry Firehose slow consumer alert (1 once the firehose dropped messages for this exporter).",
                Gauge,
                if m.slow_consumer_alert { 1.0 } else { 0.0 },
            ),
            self.sample(
                "last_slow_consumer_alert_timestamp",
                "Number of seconds since 1970 since last slow consumer alert received from Cloud Foundry Firehose.",
                Gauge,
                m.last_slow_consumer_alert_timestamp as f64,
            ),
            self.sample(
                "cached_counter_events",
                "Number of counter event series currently cached.",
                Gauge,
                m.cached_counter_events as f64,
            ),
            self.sample(
                "cached_value_metrics",
                "Number of value metric series currently cached.",
                Gauge,
                m.cached_value_metrics as f64,
            ),
        ]
    }
}

fn fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

fn metric_name(origin: &str, name: &str, custom: bool) -> String {
    if custom {
        format!("custom_{}", normalize_name(name))
    } else {
        format!("{}_{}", normalize_name(origin), normalize_name(name))
    }
}

/// Ordered label set for one entry, or `None` if two labels collide.
fn build_labels(
    labels: &MetricLabels,
    unit: Option<&str>,
    environment: &str,
) -> Option<Vec<(String, String)>> {
    let mut out = vec![
        ("origin".to_string(), labels.origin.clone()),
        ("bosh_deployment".to_string(), labels.deployment.clone()),
        ("bosh_job_name".to_string(), labels.job.clone()),
        ("bosh_job_id".to_string(), labels.index.clone()),
        ("bosh_job_ip".to_string(), labels.ip.clone()),
    ];
    if let Some(unit) = unit {
        out.push(("unit".to_string(), unit.to_string()));
    }

    for (tag, value) in &labels.tags {
        let name = normalize_name(tag);
        if !valid_label_name(&name) || name == ENVIRONMENT_LABEL || out.iter().any(|(n, _)| *n == name) {
            return None;
        }
        out.push((name, value.clone()));
    }

    out.push((ENVIRONMENT_LABEL.to_string(), environment.to_string()));
    Some(out)
}

fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
