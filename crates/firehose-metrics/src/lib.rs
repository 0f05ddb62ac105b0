//! firehose-metrics: the metric cache behind the exporter.
//!
//! Stores the latest counter event and value metric per series, expires
//! series that stop reporting, and renders everything as Prometheus text.
//!
//! # Architecture
//!
//! ```text
//! MetricsStore
//!   ├── add_metric() ← called per firehose envelope
//!   ├── alert_slow_consumer() ← called by the nozzle
//!   └── run_cleanup() → periodic expiry sweep
//!
//! Registry
//!   ├── InternalMetricsCollector
//!   ├── CounterEventsCollector
//!   └── ValueMetricsCollector
//!         └── render_prometheus() → text/plain for the telemetry path
//! ```

pub mod collectors;
pub mod normalize;
pub mod prometheus;
pub mod store;

pub use collectors::{
    Collector, CounterEventsCollector, InternalMetricsCollector, Registry, ValueMetricsCollector,
};
pub use prometheus::{CONTENT_TYPE, MetricType, Sample, render_prometheus};
pub use store::{CounterEntry, InternalMetrics, MetricLabels, MetricsStore, ValueEntry};

