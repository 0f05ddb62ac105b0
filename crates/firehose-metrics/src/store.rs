//! Metric aggregation store: the latest value per metric key.
//!
//! Envelopes arrive from the nozzle one at a time. Counter and value
//! payloads are merged into two keyed maps (last write wins), which the
//! collectors copy out on every scrape. A background sweep evicts entries
//! that have not been refreshed within the expiration window.
//!
//! Both maps sit behind one `RwLock`; diagnostics are plain atomics so the
//! hot path only takes the write lock for the map insert.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use firehose_core::{DeploymentFilter, Envelope, EventFilter, Payload};

use crate::normalize::is_valid_uuid;

/// Tag name that collides with the value-metric unit label.
const UNIT_TAG: &str = "unit";

/// Composite identity of an aggregated entry within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    origin: String,
    name: String,
    deployment: String,
    job: String,
    index: String,
    tags: BTreeMap<String, String>,
}

/// Source coordinates shared by both entry kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    pub origin: String,
    pub deployment: String,
    pub job: String,
    pub index: String,
    pub ip: String,
    pub tags: BTreeMap<String, String>,
}

/// Latest state of one counter series.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterEntry {
    pub name: String,
    pub labels: MetricLabels,
    pub delta: u64,
    pub total: u64,
    /// Emitter timestamp of the last merged envelope.
    pub timestamp: i64,
    /// Origin was an anonymous UUID.
    pub custom: bool,
    pub updated_at: Instant,
}

/// Latest state of one gauge series.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueEntry {
    pub name: String,
    pub labels: MetricLabels,
    pub value: f64,
    pub unit: String,
    pub timestamp: i64,
    pub custom: bool,
    pub updated_at: Instant,
}

/// Point-in-time copy of the store's own health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalMetrics {
    pub total_envelopes_received: u64,
    pub last_envelope_received_timestamp: u64,
    /// Counter events that passed the filters.
    pub total_counter_events_received: u64,
    pub last_counter_event_received_timestamp: u64,
    /// Value metrics that passed the filters.
    pub total_value_metrics_received: u64,
    pub last_value_metric_received_timestamp: u64,
    pub total_envelopes_filtered: u64,
    pub slow_consumer_alert: bool,
    pub last_slow_consumer_alert_timestamp: u64,
    pub cached_counter_events: usize,
    pub cached_value_metrics: usize,
}

#[derive(Default)]
struct Diagnostics {
    envelopes_received: AtomicU64,
    last_envelope_received: AtomicU64,
    counter_events_received: AtomicU64,
    last_counter_event_received: AtomicU64,
    value_metrics_received: AtomicU64,
    last_value_metric_received: AtomicU64,
    envelopes_filtered: AtomicU64,
    slow_consumer_alert: AtomicBool,
    last_slow_consumer_alert: AtomicU64,
}

#[derive(Default)]
struct Entries {
    counters: HashMap<MetricKey, CounterEntry>,
    values: HashMap<MetricKey, ValueEntry>,
}

/// In-memory aggregation of firehose counter events and value metrics.
///
/// Shared between the nozzle (writer), the sweep loop and the scrape
/// handlers via `Arc<MetricsStore>`.
pub struct MetricsStore {
    entries: RwLock<Entries>,
    diagnostics: Diagnostics,
    deployment_filter: DeploymentFilter,
    event_filter: EventFilter,
    /// Zero disables expiration.
    expiration: Duration,
    /// Zero disables the background sweep.
    cleanup_interval: Duration,
    custom_uuid_origin: String,
}

impl MetricsStore {
    pub fn new(
        expiration: Duration,
        cleanup_interval: Duration,
        deployment_filter: DeploymentFilter,
        event_filter: EventFilter,
    ) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            diagnostics: Diagnostics::default(),
            deployment_filter,
            event_filter,
            expiration,
            cleanup_interval,
            custom_uuid_origin: String::new(),
        }
    }

    /// Report every UUID origin under this single origin label instead.
    pub fn with_custom_uuid_origin(mut self, origin: impl Into<String>) -> Self {
        self.custom_uuid_origin = origin.into();
        self
    }

    /// Merge one envelope into the store.
    ///
    /// Filtered envelopes only bump the received and filtered counters.
    pub fn add_metric(&self, envelope: &Envelope) {
        let now = epoch_secs();
        let d = &self.diagnostics;
        d.envelopes_received.fetch_add(1, Ordering::Relaxed);
        d.last_envelope_received.store(now, Ordering::Relaxed);

        let kind = envelope.kind();
        if !self.deployment_filter.enabled(&envelope.deployment) || !self.event_filter.enabled(kind) {
            d.envelopes_filtered.fetch_add(1, Ordering::Relaxed);
            trace!(
                origin = %envelope.origin,
                deployment = %envelope.deployment,
                %kind,
                "envelope filtered"
            );
            return;
        }

        let (origin, custom) = self.resolve_origin(&envelope.origin);

        match &envelope.payload {
            Payload::Counter(counter) => {
                d.counter_events_received.fetch_add(1, Ordering::Relaxed);
                d.last_counter_event_received.store(now, Ordering::Relaxed);

                let labels = labels_for(envelope, origin, envelope.tags.clone());
                let key = key_for(&counter.name, &labels);
                let entry = CounterEntry {
                    name: counter.name.clone(),
                    labels,
                    delta: counter.delta,
                    total: counter.total,
                    timestamp: envelope.timestamp,
                    custom,
                    updated_at: Instant::now(),
                };
                self.write().counters.insert(key, entry);
            }
            Payload::Value(value) => {
                d.value_metrics_received.fetch_add(1, Ordering::Relaxed);
                d.last_value_metric_received.store(now, Ordering::Relaxed);

                let mut tags = envelope.tags.clone();
                let mut unit = value.unit.clone();
                if let Some(tag_unit) = tags.remove(UNIT_TAG) {
                    if unit.is_empty() {
                        unit = tag_unit;
                    }
                }

                let labels = labels_for(envelope, origin, tags);
                let key = key_for(&value.name, &labels);
                let entry = ValueEntry {
                    name: value.name.clone(),
                    labels,
                    value: value.value,
                    unit,
                    timestamp: envelope.timestamp,
                    custom,
                    updated_at: Instant::now(),
                };
                self.write().values.insert(key, entry);
            }
            Payload::Other(kind) => {
                trace!(origin = %envelope.origin, %kind, "envelope kind not aggregated");
            }
        }
    }

    /// Copy of all current counter entries.
    pub fn counter_metrics(&self) -> Vec<CounterEntry> {
        self.read().counters.values().cloned().collect()
    }

    /// Copy of all current value entries.
    pub fn value_metrics(&self) -> Vec<ValueEntry> {
        self.read().values.values().cloned().collect()
    }

    pub fn flush_counter_events(&self) {
        let removed = {
            let mut entries = self.write();
            let n = entries.counters.len();
            entries.counters.clear();
            n
        };
        debug!(removed, "counter events flushed");
    }

    pub fn flush_value_metrics(&self) {
        let removed = {
            let mut entries = self.write();
            let n = entries.values.len();
            entries.values.clear();
            n
        };
        debug!(removed, "value metrics flushed");
    }

    /// Raise the slow-consumer alert. It stays raised until restart.
    pub fn alert_slow_consumer(&self) {
        let d = &self.diagnostics;
        if !d.slow_consumer_alert.swap(true, Ordering::Relaxed) {
            warn!("slow consumer alert raised, firehose is dropping messages for this subscription");
        }
        d.last_slow_consumer_alert.store(epoch_secs(), Ordering::Relaxed);
    }

    pub fn internal_metrics(&self) -> InternalMetrics {
        let d = &self.diagnostics;
        let (cached_counter_events, cached_value_metrics) = {
            let entries = self.read();
            (entries.counters.len(), entries.values.len())
        };

        InternalMetrics {
            total_envelopes_received: d.envelopes_received.load(Ordering::Relaxed),
            last_envelope_received_timestamp: d.last_envelope_received.load(Ordering::Relaxed),
            total_counter_events_received: d.counter_events_received.load(Ordering::Relaxed),
            last_counter_event_received_timestamp: d
                .last_counter_event_received
                .load(Ordering::Relaxed),
            total_value_metrics_received: d.value_metrics_received.load(Ordering::Relaxed),
            last_value_metric_received_timestamp: d
                .last_value_metric_received
                .load(Ordering::Relaxed),
            total_envelopes_filtered: d.envelopes_filtered.load(Ordering::Relaxed),
            slow_consumer_alert: d.slow_consumer_alert.load(Ordering::Relaxed),
            last_slow_consumer_alert_timestamp: d.last_slow_consumer_alert.load(Ordering::Relaxed),
            cached_counter_events,
            cached_value_metrics,
        }
    }

    /// Remove entries older than the expiration window.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        if self.expiration.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let expiration = self.expiration;
        let fresh = |updated_at: Instant| now.saturating_duration_since(updated_at) <= expiration;

        let mut entries = self.write();
        let before = entries.counters.len() + entries.values.len();
        entries.counters.retain(|_, e| fresh(e.updated_at));
        entries.values.retain(|_, e| fresh(e.updated_at));
        before - (entries.counters.len() + entries.values.len())
    }

    /// Run the expiration sweep until shutdown signal.
    pub async fn run_cleanup(&self, mut shutdown: watch::Receiver<bool>) {
        if self.cleanup_interval.is_zero() || self.expiration.is_zero() {
            info!("metrics expiration disabled");
            return;
        }

        info!(
            interval = ?self.cleanup_interval,
            expiration = ?self.expiration,
            "metrics cleanup started"
        );

        let mut interval = tokio::time::interval(self.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "expired metrics removed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics cleanup shutting down");
                    break;
                }
            }
        }
    }

    /// Origin label for an envelope, and whether it was an anonymous UUID.
    fn resolve_origin(&self, origin: &str) -> (String, bool) {
        if is_valid_uuid(origin) {
            if self.custom_uuid_origin.is_empty() {
                (origin.to_string(), true)
            } else {
                (self.custom_uuid_origin.clone(), true)
            }
        } else {
            (origin.to_string(), false)
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn labels_for(envelope: &Envelope, origin: String, tags: BTreeMap<String, String>) -> MetricLabels {
    MetricLabels {
        origin,
        deployment: envelope.deployment.clone(),
        job: envelope.job.clone(),
        index: envelope.index.clone(),
        ip: envelope.ip.clone(),
        tags,
    }
}

fn key_for(name: &str, labels: &MetricLabels) -> MetricKey {
    MetricKey {
        origin: labels.origin.clone(),
        name: name.to_string(),
        deployment: labels.deployment.clone(),
        job: labels.job.clone(),
        index: labels.index.clone(),
        tags: labels.tags.clone(),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use firehose_core::EventKind;

    fn open_store() -> MetricsStore {
        MetricsStore::new(
            Duration::ZERO,
            Duration::ZERO,
            DeploymentFilter::default(),
            EventFilter::default(),
        )
    }

    fn counter(name: &str, delta: u64, total: u64) -> Envelope {
        Envelope::counter("fake.origin", name, delta, total)
            .with_job("fake-deployment-name", "fake-job-name", "0", "1.2.3.4")
    }

    fn value(name: &str, v: f64) -> Envelope {
        Envelope::value("fake.origin", name, v, "counter")
            .with_job("fake-deployment-name", "fake-job-name", "0", "1.2.3.4")
    }

    #[test]
    fn last_write_wins_per_key() {
        let store = open_store();
        store.add_metric(&counter("requests", 5, 1000));
        store.add_metric(&counter("requests", 3, 1003));

        let counters = store.counter_metrics();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].total, 1003);
        assert_eq!(counters[0].delta, 3);
    }

    #[test]
    fn emitter_restart_overwrites_total() {
        let store = open_store();
        store.add_metric(&counter("requests", 5, 1000));
        store.add_metric(&counter("requests", 2, 2));

        let counters = store.counter_metrics();
        assert_eq!(counters[0].total, 2);
    }

    #[test]
    fn distinct_tags_are_distinct_entries() {
        let store = open_store();
        store.add_metric(&counter("requests", 1, 10).with_tag("route", "a"));
        store.add_metric(&counter("requests", 1, 20).with_tag("route", "b"));
        store.add_metric(&counter("requests", 1, 30).with_tag("route", "a"));

        let mut totals: Vec<u64> = store.counter_metrics().iter().map(|c| c.total).collect();
        totals.sort_unstable();
        assert_eq!(totals, vec![20, 30]);
    }

    #[test]
    fn distinct_job_index_are_distinct_entries() {
        let store = open_store();
        store.add_metric(&counter("requests", 1, 10));
        store.add_metric(
            &Envelope::counter("fake.origin", "requests", 1, 10)
                .with_job("fake-deployment-name", "fake-job-name", "1", "1.2.3.5"),
        );
        assert_eq!(store.counter_metrics().len(), 2);
    }

    #[test]
    fn value_metrics_overwrite_value_and_unit() {
        let store = open_store();
        store.add_metric(&value("memory", 1.0));
        store.add_metric(&Envelope::value("fake.origin", "memory", 2.5, "MiB").with_job(
            "fake-deployment-name",
            "fake-job-name",
            "0",
            "1.2.3.4",
        ));

        let values = store.value_metrics();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].value, 2.5);
        assert_eq!(values[0].unit, "MiB");
    }

    #[test]
    fn deployment_filter_is_total() {
        let store = MetricsStore::new(
            Duration::ZERO,
            Duration::ZERO,
            DeploymentFilter::new(["cf"]),
            EventFilter::default(),
        );

        for _ in 0..5 {
            store.add_metric(&counter("requests", 1, 1));
        }

        assert!(store.counter_metrics().is_empty());
        let internal = store.internal_metrics();
        assert_eq!(internal.total_envelopes_received, 5);
        assert_eq!(internal.total_envelopes_filtered, 5);
        assert_eq!(internal.total_counter_events_received, 0);
    }

    #[test]
    fn event_filter_is_total() {
        let store = MetricsStore::new(
            Duration::ZERO,
            Duration::ZERO,
            DeploymentFilter::default(),
            EventFilter::new(["ValueMetric"]).unwrap(),
        );

        store.add_metric(&counter("requests", 1, 1));
        store.add_metric(&value("memory", 1.0));

        assert!(store.counter_metrics().is_empty());
        assert_eq!(store.value_metrics().len(), 1);
    }

    #[test]
    fn other_kinds_are_counted_not_aggregated() {
        let store = open_store();
        store.add_metric(&Envelope::new("cell", Payload::Other(EventKind::LogMessage)));

        assert!(store.counter_metrics().is_empty());
        assert!(store.value_metrics().is_empty());
        assert_eq!(store.internal_metrics().total_envelopes_received, 1);
    }

    #[test]
    fn flush_is_kind_scoped() {
        let store = open_store();
        store.add_metric(&counter("requests", 1, 1));
        store.add_metric(&value("memory", 1.0));

        store.flush_counter_events();
        assert!(store.counter_metrics().is_empty());
        assert_eq!(store.value_metrics().len(), 1);

        store.add_metric(&counter("requests", 1, 1));
        store.flush_value_metrics();
        assert!(store.value_metrics().is_empty());
        assert_eq!(store.counter_metrics().len(), 1);
    }

    #[test]
    fn unit_tag_yields_to_payload_unit() {
        let store = open_store();
        store.add_metric(&value("latency", 1.0).with_tag("unit", "ms"));

        let values = store.value_metrics();
        assert_eq!(values[0].unit, "counter");
        assert!(!values[0].labels.tags.contains_key("unit"));
    }

    #[test]
    fn unit_tag_fills_empty_payload_unit() {
        let store = open_store();
        store.add_metric(
            &Envelope::value("log-store", "ingress", 7.0, "")
                .with_tag("unit", "bytes")
                .with_tag("source_id", "log-store"),
        );

        let values = store.value_metrics();
        assert_eq!(values[0].unit, "bytes");
        assert_eq!(values[0].labels.tags.len(), 1);
    }

    #[test]
    fn uuid_origin_is_custom() {
        let uuid = "3b6c7ba1-7b4c-4d8e-9a3f-2f1c0e5d6a7b";
        let store = open_store();
        store.add_metric(&Envelope::counter(uuid, "orders", 1, 1));
        store.add_metric(&counter("requests", 1, 1));

        let mut entries = store.counter_metrics();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert!(entries[0].custom);
        assert_eq!(entries[0].labels.origin, uuid);
        assert!(!entries[1].custom);
    }

    #[test]
    fn uuid_origin_override() {
        let store = open_store().with_custom_uuid_origin("apps");
        store.add_metric(&Envelope::counter("3b6c7ba1-7b4c-4d8e-9a3f-2f1c0e5d6a7b", "orders", 1, 1));
        store.add_metric(&Envelope::counter("9f0e1d2c-3b4a-4958-8776-655443322110", "orders", 1, 2));

        let entries = store.counter_metrics();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].labels.origin, "apps");
        assert_eq!(entries[0].total, 2);
    }

    #[test]
    fn slow_consumer_alert_is_sticky() {
        let store = open_store();
        assert!(!store.internal_metrics().slow_consumer_alert);

        store.alert_slow_consumer();
        store.add_metric(&counter("requests", 1, 1));
        store.flush_counter_events();

        let internal = store.internal_metrics();
        assert!(internal.slow_consumer_alert);
        assert!(internal.last_slow_consumer_alert_timestamp > 0);
    }

    #[test]
    fn internal_metrics_track_cache_sizes() {
        let store = open_store();
        store.add_metric(&counter("a", 1, 1));
        store.add_metric(&counter("b", 1, 1));
        store.add_metric(&value("c", 1.0));

        let internal = store.internal_metrics();
        assert_eq!(internal.cached_counter_events, 2);
        assert_eq!(internal.cached_value_metrics, 1);
        assert_eq!(internal.total_counter_events_received, 2);
        assert_eq!(internal.total_value_metrics_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_stale_entries() {
        let store = MetricsStore::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            DeploymentFilter::default(),
            EventFilter::default(),
        );

        store.add_metric(&counter("stale", 1, 1));
        store.add_metric(&value("stale-gauge", 1.0));
        tokio::time::advance(Duration::from_secs(8)).await;
        store.add_metric(&counter("fresh", 1, 1));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(store.sweep_expired(), 2);
        let counters = store.counter_metrics();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].name, "fresh");
        assert!(store.value_metrics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_entry_alive() {
        let store = MetricsStore::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            DeploymentFilter::default(),
            EventFilter::default(),
        );

        store.add_metric(&counter("requests", 1, 1));
        tokio::time::advance(Duration::from_secs(9)).await;
        store.add_metric(&counter("requests", 1, 2));
        tokio::time::advance(Duration::from_secs(9)).await;

        assert_eq!(store.sweep_expired(), 0);
        assert_eq!(store.counter_metrics()[0].total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_expiration_never_expires() {
        let store = open_store();
        store.add_metric(&counter("requests", 1, 1));
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;

        assert_eq!(store.sweep_expired(), 0);
        assert_eq!(store.counter_metrics().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_loop_expires_after_next_tick() {
        let store = Arc::new(MetricsStore::new(
            Duration::from_secs(10),
            Duration::from_secs(5),
            DeploymentFilter::default(),
            EventFilter::default(),
        ));
        store.add_metric(&counter("requests", 1, 1));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleanup = {
            let store = store.clone();
            tokio::spawn(async move { store.run_cleanup(shutdown_rx).await })
        };

        // Ticks at 5s and 10s leave the entry alone (age <= 10s).
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(store.counter_metrics().len(), 1);

        // The 15s tick sees age 15s and removes it.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(store.counter_metrics().is_empty());

        shutdown_tx.send(true).unwrap();
        cleanup.await.unwrap();
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = Arc::new(open_store());

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        store.add_metric(&counter(&format!("metric-{w}"), 1, i));
                    }
                })
            })
            .collect();

        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    assert!(store.counter_metrics().len() <= 4);
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        let counters = store.counter_metrics();
        assert_eq!(counters.len(), 4);
        assert!(counters.iter().all(|c| c.total == 249));
        assert_eq!(store.internal_metrics().total_envelopes_received, 1000);
    }
}
