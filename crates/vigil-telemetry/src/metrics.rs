use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// One series as read at `taken_at`. Histograms report their median.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub metric_type: MetricType,
    pub value: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl HistogramSummary {
    fn from_observations(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(f64::total_cmp);
        let rank = |q: f64| {
            // nearest-rank percentile
            let idx = (q * values.len() as f64).ceil() as usize;
            values[idx.clamp(1, values.len()) - 1]
        };
        Self {
            count: values.len() as u64,
            sum: values.iter().sum(),
            min: values[0],
            max: values[values.len() - 1],
            p50: rank(0.50),
            p95: rank(0.95),
            p99: rank(0.99),
        }
    }
}

/// Series identity. Labels are sorted so call-site order does not matter.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    metric_type: MetricType,
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(metric_type: MetricType, name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<_> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        labels.sort();
        Self {
            metric_type,
            name: name.to_string(),
            labels,
        }
    }
}

enum Series {
    Counter(AtomicU64),
    Gauge(Mutex<f64>),
    Histogram(Mutex<Vec<f64>>),
}

impl Series {
    fn empty(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Counter => Self::Counter(AtomicU64::new(0)),
            MetricType::Gauge => Self::Gauge(Mutex::new(0.0)),
            MetricType::Histogram => Self::Histogram(Mutex::new(Vec::new())),
        }
    }

    /// Scalar reading used by snapshots.
    fn reading(&self) -> f64 {
        match self {
            Self::Counter(n) => n.load(Ordering::Relaxed) as f64,
            Self::Gauge(v) => *v.lock(),
            Self::Histogram(obs) => HistogramSummary::from_observations(obs.lock().clone()).p50,
        }
    }
}

/// In-process metrics store shared by the pipeline and the binary.
///
/// Counters, gauges and histograms live in separate namespaces, so the same
/// name may be used for more than one type.
#[derive(Default)]
pub struct MetricsRecorder {
    series: DashMap<SeriesKey, Series>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_series(&self, metric_type: MetricType, name: &str, labels: &[(&str, &str)], f: impl FnOnce(&Series)) {
        let key = SeriesKey::new(metric_type, name, labels);
        let entry = self.series.entry(key).or_insert_with(|| Series::empty(metric_type));
        f(entry.value());
    }

    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        self.with_series(MetricType::Counter, name, labels, |s| {
            if let Series::Counter(c) = s {
                c.fetch_add(n, Ordering::Relaxed);
            }
        });
    }

    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.with_series(MetricType::Gauge, name, labels, |s| {
            if let Series::Gauge(g) = s {
                *g.lock() = value;
            }
        });
    }

    /// Add `delta` (possibly negative) to a gauge.
    pub fn gauge_inc(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        self.with_series(MetricType::Gauge, name, labels, |s| {
            if let Series::Gauge(g) = s {
                *g.lock() += delta;
            }
        });
    }

    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.with_series(MetricType::Histogram, name, labels, |s| {
            if let Series::Histogram(h) = s {
                h.lock().push(value);
            }
        });
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.series.get(&SeriesKey::new(MetricType::Counter, name, labels)).as_deref() {
            Some(Series::Counter(c)) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        match self.series.get(&SeriesKey::new(MetricType::Gauge, name, labels)).as_deref() {
            Some(Series::Gauge(g)) => *g.lock(),
            _ => 0.0,
        }
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        match self.series.get(&SeriesKey::new(MetricType::Histogram, name, labels)).as_deref() {
            Some(Series::Histogram(h)) => HistogramSummary::from_observations(h.lock().clone()),
            _ => HistogramSummary::default(),
        }
    }

    /// Every series, ordered by name then labels.
    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        let taken_at = Utc::now();
        let mut out: Vec<_> = self
            .series
            .iter()
            .map(|entry| MetricsSnapshot {
                taken_at,
                name: entry.key().name.clone(),
                labels: entry.key().labels.clone(),
                metric_type: entry.key().metric_type,
                value: entry.value().reading(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));
        out
    }
}
