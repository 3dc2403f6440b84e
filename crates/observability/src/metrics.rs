//! OpenTelemetry-backed counters and duration histograms.
//!
//! Each [`MetricsRegistry`] owns an SDK meter provider with a manual reader.
//! Callers record by metric name and `(key, value)` labels; instruments are
//! created on first use and cached. [`MetricsRegistry::snapshot`] collects
//! the reader's cumulative state for `/metrics` and test assertions.
//!
//! The process-wide registry ([`global`]) is also installed as the
//! `opentelemetry::global` meter provider.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::data::{self, ResourceMetrics};
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::{InstrumentKind, ManualReader, MetricResult, Pipeline, SdkMeterProvider, Temporality};
use serde::Serialize;

const METER_NAME: &str = "ets";

/// One counter sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: u64,
}

/// One duration histogram sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub count: u64,
    pub total_millis: f64,
    pub max_millis: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<CounterSample>,
    pub timers: Vec<TimerSample>,
}

impl MetricsSnapshot {
    /// Value of the counter with exactly these labels (0 when absent).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let wanted = label_map(labels);
        self.counters
            .iter()
            .filter(|c| c.name == name && c.labels == wanted)
            .map(|c| c.value)
            .sum()
    }

    /// Sum of a counter across every label combination.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters.iter().filter(|c| c.name == name).map(|c| c.value).sum()
    }
}

/// The provider keeps one handle on the reader, the registry the other.
#[derive(Debug, Clone)]
struct SharedReader(Arc<ManualReader>);

impl MetricReader for SharedReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        self.0.register_pipeline(pipeline)
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> MetricResult<()> {
        self.0.collect(rm)
    }

    fn force_flush(&self) -> MetricResult<()> {
        self.0.force_flush()
    }

    fn shutdown(&self) -> MetricResult<()> {
        self.0.shutdown()
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.0.temporality(kind)
    }
}

pub struct MetricsRegistry {
    provider: SdkMeterProvider,
    reader: Arc<ManualReader>,
    meter: Meter,
    counters: RwLock<HashMap<String, Counter<u64>>>,
    histograms: RwLock<HashMap<String, Histogram<f64>>>,
}

impl core::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MetricsRegistry").field("meter", &METER_NAME).finish_non_exhaustive()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        let reader = Arc::new(ManualReader::builder().build());
        let provider = SdkMeterProvider::builder()
            .with_reader(SharedReader(reader.clone()))
            .build();
        let meter = provider.meter(METER_NAME);
        Self {
            provider,
            reader,
            meter,
            counters: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.add(name, labels, 1);
    }

    pub fn add(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        self.counter_instrument(name).add(value, &attributes(labels));
    }

    /// Recorded in seconds, the OTel convention for durations.
    pub fn record_duration(&self, name: &str, labels: &[(&str, &str)], elapsed: Duration) {
        self.histogram_instrument(name)
            .record(elapsed.as_secs_f64(), &attributes(labels));
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.snapshot().counter(name, labels)
    }

    pub fn counter_total(&self, name: &str) -> u64 {
        self.snapshot().counter_total(name)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut rm = ResourceMetrics {
            resource: Resource::empty(),
            scope_metrics: Vec::new(),
        };
        if let Err(err) = self.reader.collect(&mut rm) {
            ::tracing::warn!(error = %err, "metrics collection failed");
            return MetricsSnapshot::default();
        }

        let mut snapshot = MetricsSnapshot::default();
        for metric in rm.scope_metrics.iter().flat_map(|sm| sm.metrics.iter()) {
            let name = metric.name.to_string();
            let any = metric.data.as_any();
            if let Some(sum) = any.downcast_ref::<data::Sum<u64>>() {
                for dp in &sum.data_points {
                    snapshot.counters.push(CounterSample {
                        name: name.clone(),
                        labels: attribute_map(&dp.attributes),
                        value: dp.value,
                    });
                }
            } else if let Some(hist) = any.downcast_ref::<data::Histogram<f64>>() {
                for dp in &hist.data_points {
                    snapshot.timers.push(TimerSample {
                        name: name.clone(),
                        labels: attribute_map(&dp.attributes),
                        count: dp.count,
                        total_millis: dp.sum * 1000.0,
                        max_millis: dp.max.unwrap_or_default() * 1000.0,
                    });
                }
            }
        }
        snapshot.counters.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        snapshot.timers.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        snapshot
    }

    fn counter_instrument(&self, name: &str) -> Counter<u64> {
        if let Some(c) = self.counters.read().ok().and_then(|m| m.get(name).cloned()) {
            return c;
        }
        let counter = self.meter.u64_counter(name.to_string()).build();
        if let Ok(mut map) = self.counters.write() {
            map.entry(name.to_string()).or_insert_with(|| counter.clone());
        }
        counter
    }

    fn histogram_instrument(&self, name: &str) -> Histogram<f64> {
        if let Some(h) = self.histograms.read().ok().and_then(|m| m.get(name).cloned()) {
            return h;
        }
        let histogram = self.meter.f64_histogram(name.to_string()).with_unit("s").build();
        if let Ok(mut map) = self.histograms.write() {
            map.entry(name.to_string()).or_insert_with(|| histogram.clone());
        }
        histogram
    }
}

fn attributes(labels: &[(&str, &str)]) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|(k, v)| KeyValue::new((*k).to_string(), (*v).to_string()))
        .collect()
}

fn attribute_map(attributes: &[KeyValue]) -> BTreeMap<String, String> {
    attributes
        .iter()
        .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
        .collect()
}

fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

/// Process-wide registry, also registered as the global meter provider.
pub fn global() -> &'static MetricsRegistry {
    static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = MetricsRegistry::new();
        opentelemetry::global::set_meter_provider(registry.provider.clone());
        registry
    })
}

pub fn increment(name: &str, labels: &[(&str, &str)]) {
    global().increment(name, labels);
}

pub fn record_duration(name: &str, labels: &[(&str, &str)], elapsed: Duration) {
    global().record_duration(name, labels, elapsed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_matter() {
        let reg = MetricsRegistry::new();
        reg.increment("hits", &[("a", "1"), ("b", "2")]);
        reg.increment("hits", &[("b", "2"), ("a", "1")]);
        assert_eq!(reg.counter("hits", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn counters_are_keyed_by_labels() {
        let reg = MetricsRegistry::new();
        reg.increment("v", &[("success", "true")]);
        reg.increment("v", &[("success", "false")]);
        reg.add("v", &[("success", "true")], 2);

        assert_eq!(reg.counter("v", &[("success", "true")]), 3);
        assert_eq!(reg.counter("v", &[("success", "false")]), 1);
        assert_eq!(reg.counter_total("v"), 4);
        assert_eq!(reg.counter("missing", &[]), 0);
    }

    #[test]
    fn durations_land_in_a_histogram() {
        let reg = MetricsRegistry::new();
        reg.record_duration("t", &[("trigger_id", "t1")], Duration::from_millis(10));
        reg.record_duration("t", &[("trigger_id", "t1")], Duration::from_millis(30));

        let snap = reg.snapshot();
        assert_eq!(snap.timers.len(), 1);
        assert_eq!(snap.timers[0].count, 2);
        assert!((snap.timers[0].total_millis - 40.0).abs() < 0.001);
        assert!((snap.timers[0].max_millis - 30.0).abs() < 0.001);
        assert_eq!(snap.timers[0].labels.get("trigger_id").map(String::as_str), Some("t1"));
    }

    #[test]
    fn registries_are_isolated() {
        let a = MetricsRegistry::new();
        let b = MetricsRegistry::new();
        a.increment("only_a", &[]);
        assert_eq!(a.counter_total("only_a"), 1);
        assert_eq!(b.counter_total("only_a"), 0);
    }
}
