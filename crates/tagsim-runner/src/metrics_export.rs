//! In-memory metrics recorder and JSON export.
//!
//! [`InMemoryRecorder`] keeps every counter, gauge and histogram the
//! simulator emits. [`InMemoryRecorder::export`] folds them into one value
//! per metric name, with per-label breakdowns nested in label order:
//!
//! ```text
//! tagsim.fsm.transitions
//!   total: 12
//!   labels.tag.reflector_a.total: 6
//!   labels.tag.reflector_a.labels.machine.output.total: 6
//! ```

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use serde::Serialize;

// ============================================================================
// Export Types
// ============================================================================

/// Breakdown of a metric by label name, then label value.
pub type LabelTree<V> = BTreeMap<String, BTreeMap<String, Box<V>>>;

/// Snapshot of every recorded metric.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsExport {
    /// RFC 3339 wall-clock time of the export.
    pub timestamp: String,
    pub metrics: BTreeMap<String, MetricValue>,
    /// Descriptions registered through `describe_*`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub descriptions: BTreeMap<String, String>,
}

impl MetricsExport {
    pub fn counter(&self, name: &str) -> Option<&CounterValue> {
        match self.metrics.get(name)? {
            MetricValue::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<&GaugeValue> {
        match self.metrics.get(name)? {
            MetricValue::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn histogram(&self, name: &str) -> Option<&HistogramValue> {
        match self.metrics.get(name)? {
            MetricValue::Histogram(h) => Some(h),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Counter(CounterValue),
    Gauge(GaugeValue),
    Histogram(HistogramValue),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterValue {
    pub total: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelTree<CounterValue>,
}

impl CounterValue {
    /// Value for a path of `(label, value)` pairs, in breakdown order.
    pub fn for_labels(&self, labels: &[(&str, &str)]) -> Option<u64> {
        let mut current = self;
        for (name, value) in labels {
            current = current.labels.get(*name)?.get(*value)?;
        }
        Some(current.total)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GaugeValue {
    pub total: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelTree<GaugeValue>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramValue {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelTree<HistogramValue>,
}

// ============================================================================
// Metric Selection
// ============================================================================

/// A `name/label/label` selection for the export.
///
/// The listed labels are the breakdown, in the listed order. Labels the
/// metric carries but the selection omits are summed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: String,
    pub labels: Vec<String>,
}

impl FromStr for MetricSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(format!("Invalid metric selection '{}': missing metric name", s));
        }
        let labels: Vec<String> = parts.map(|p| p.trim().to_string()).collect();
        if labels.iter().any(String::is_empty) {
            return Err(format!("Invalid metric selection '{}': empty label name", s));
        }
        Ok(MetricSpec {
            name: name.to_string(),
            labels,
        })
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Default)]
struct CounterCell(AtomicU64);

impl CounterFn for CounterCell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct GaugeCell(Mutex<f64>);

impl GaugeFn for GaugeCell {
    fn increment(&self, value: f64) {
        *lock(&self.0) += value;
    }

    fn decrement(&self, value: f64) {
        *lock(&self.0) -= value;
    }

    fn set(&self, value: f64) {
        *lock(&self.0) = value;
    }
}

#[derive(Debug, Default)]
struct HistogramCell(Mutex<Vec<f64>>);

impl HistogramFn for HistogramCell {
    fn record(&self, value: f64) {
        lock(&self.0).push(value);
    }
}

#[derive(Debug, Default)]
struct Registry {
    counters: HashMap<Key, Arc<CounterCell>>,
    gauges: HashMap<Key, Arc<GaugeCell>>,
    histograms: HashMap<Key, Arc<HistogramCell>>,
    descriptions: BTreeMap<String, String>,
}

/// A [`Recorder`] that keeps all values in memory until exported.
///
/// Install it with `metrics::set_global_recorder(Arc::clone(&recorder))`,
/// or scope it to a closure with `metrics::with_local_recorder`.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    registry: Mutex<Registry>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Labels = Vec<(String, String)>;

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn describe(&self, key: KeyName, description: SharedString) {
        lock(&self.registry)
            .descriptions
            .insert(key.as_str().to_string(), description.to_string());
    }

    /// Export all metrics, broken down by every label in emission order.
    pub fn snapshot(&self) -> MetricsExport {
        self.export(&[])
    }

    /// Export metrics. With an empty `specs` every metric is exported with
    /// its full label breakdown; otherwise only the selected metrics are,
    /// broken down by the selected labels.
    pub fn export(&self, specs: &[MetricSpec]) -> MetricsExport {
        let registry = lock(&self.registry);
        let mut metrics = BTreeMap::new();

        for (name, entries) in collect(&registry.counters, specs, |c| c.0.load(Ordering::Relaxed)) {
            metrics.insert(name, MetricValue::Counter(breakdown(&entries)));
        }
        for (name, entries) in collect(&registry.gauges, specs, |g| *lock(&g.0)) {
            metrics.insert(name, MetricValue::Gauge(breakdown(&entries)));
        }
        for (name, entries) in collect(&registry.histograms, specs, |h| lock(&h.0).clone()) {
            metrics.insert(name, MetricValue::Histogram(breakdown(&entries)));
        }

        MetricsExport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            metrics,
            descriptions: registry.descriptions.clone(),
        }
    }
}

/// Group samples by metric name, keeping the labels the selection asks for.
fn collect<C, S>(
    cells: &HashMap<Key, Arc<C>>,
    specs: &[MetricSpec],
    sample: impl Fn(&C) -> S,
) -> BTreeMap<String, Vec<(Labels, S)>> {
    let mut grouped: BTreeMap<String, Vec<(Labels, S)>> = BTreeMap::new();
    for (key, cell) in cells {
        let labels: Labels = key
            .labels()
            .map(|l| (l.key().to_string(), l.value().to_string()))
            .collect();
        let labels = if specs.is_empty() {
            labels
        } else {
            let Some(spec) = specs.iter().find(|s| s.name == key.name()) else {
                continue;
            };
            spec.labels
                .iter()
                .filter_map(|wanted| labels.iter().find(|(k, _)| k == wanted).cloned())
                .collect()
        };
        grouped
            .entry(key.name().to_string())
            .or_default()
            .push((labels, sample(cell)));
    }
    grouped
}

/// A value that can summarize samples and carry a label breakdown.
trait Summary: Sized {
    type Sample: Clone;

    fn summarize(samples: &[Self::Sample]) -> Self;
    fn labels_mut(&mut self) -> &mut LabelTree<Self>;
}

impl Summary for CounterValue {
    type Sample = u64;

    fn summarize(samples: &[u64]) -> Self {
        CounterValue {
            total: samples.iter().sum(),
            labels: BTreeMap::new(),
        }
    }

    fn labels_mut(&mut self) -> &mut LabelTree<Self> {
        &mut self.labels
    }
}

impl Summary for GaugeValue {
    type Sample = f64;

    fn summarize(samples: &[f64]) -> Self {
        GaugeValue {
            total: samples.iter().sum(),
            labels: BTreeMap::new(),
        }
    }

    fn labels_mut(&mut self) -> &mut LabelTree<Self> {
        &mut self.labels
    }
}

impl Summary for HistogramValue {
    type Sample = Vec<f64>;

    fn summarize(samples: &[Vec<f64>]) -> Self {
        let mut values: Vec<f64> = samples.iter().flatten().copied().collect();
        if values.is_empty() {
            return HistogramValue::default();
        }
        values.sort_by(f64::total_cmp);
        let sum: f64 = values.iter().sum();
        let count = values.len();
        HistogramValue {
            count: count as u64,
            sum,
            min: values[0],
            max: values[count - 1],
            mean: sum / count as f64,
            p50: percentile(&values, 0.50),
            p90: percentile(&values, 0.90),
            p99: percentile(&values, 0.99),
            labels: BTreeMap::new(),
        }
    }

    fn labels_mut(&mut self) -> &mut LabelTree<Self> {
        &mut self.labels
    }
}

/// Nearest-rank percentile of sorted, non-empty values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn breakdown<V: Summary>(entries: &[(Labels, V::Sample)]) -> V {
    let samples: Vec<V::Sample> = entries.iter().map(|(_, s)| s.clone()).collect();
    let mut value = V::summarize(&samples);

    let mut groups: BTreeMap<(String, String), Vec<(Labels, V::Sample)>> = BTreeMap::new();
    for (labels, sample) in entries {
        if let Some(((name, label_value), rest)) = labels.split_first() {
            groups
                .entry((name.clone(), label_value.clone()))
                .or_default()
                .push((rest.to_vec(), sample.clone()));
        }
    }
    for ((name, label_value), group) in groups {
        value
            .labels_mut()
            .entry(name)
            .or_default()
            .insert(label_value, Box::new(breakdown(&group)));
    }
    value
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.describe(key, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let cell = Arc::clone(lock(&self.registry).counters.entry(key.clone()).or_default());
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let cell = Arc::clone(lock(&self.registry).gauges.entry(key.clone()).or_default());
        Gauge::from_arc(cell)
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let cell = Arc::clone(lock(&self.registry).histograms.entry(key.clone()).or_default());
        Histogram::from_arc(cell)
    }
}
