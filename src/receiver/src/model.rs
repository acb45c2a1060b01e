//! Internal types for Prometheus → OTEL translation
//!
//! Samples come in as flat label sets; the builder turns them into typed
//! [`MetricFamily`] values which the adjuster and the staleness fixer rewrite
//! in place before they are converted to OTLP.

use std::fmt;

/// Label holding the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";
/// Label holding the scrape job name
pub const JOB_LABEL: &str = "job";
/// Label holding the scraped instance (usually `host:port`)
pub const INSTANCE_LABEL: &str = "instance";
/// Target label holding the scrape scheme
pub const SCHEME_LABEL: &str = "__scheme__";
/// Target label holding the scrape path
pub const METRICS_PATH_LABEL: &str = "__metrics_path__";
/// Histogram bucket upper bound
pub const BUCKET_LABEL: &str = "le";
/// Summary quantile
pub const QUANTILE_LABEL: &str = "quantile";

/// A Prometheus label key-value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrometheusLabel {
    pub name: String,
    pub value: String,
}

impl PrometheusLabel {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered label set of one sample.
///
/// Names are expected to be unique; when they are not, lookups return the
/// first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(Vec<PrometheusLabel>);

impl Labels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(name, value)| PrometheusLabel::new(name, value))
                .collect(),
        )
    }

    /// Get a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|l| l.name == name)
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(PrometheusLabel::new(name, value));
    }

    /// Append every label of `overlay` whose name is not present yet
    pub fn overlay(&mut self, overlay: &Labels) {
        for label in overlay.iter() {
            if !self.contains(&label.name) {
                self.0.push(label.clone());
            }
        }
    }

    /// Copy of this label set without the named labels
    pub fn without(&self, exclude: &[&str]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|l| !exclude.contains(&l.name.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Order-independent key of the label set, used to group samples into
    /// data points and data points into series
    pub fn key(&self) -> String {
        let mut key_parts: Vec<String> = self
            .0
            .iter()
            .map(|l| format!("{}={}", l.name, l.value))
            .collect();
        key_parts.sort();
        key_parts.join(",")
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrometheusLabel> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<PrometheusLabel> for Labels {
    fn from_iter<T: IntoIterator<Item = PrometheusLabel>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Declared Prometheus metric types, as found in `# TYPE` metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrometheusMetricType {
    #[default]
    Unknown,
    Counter,
    Gauge,
    Summary,
    Histogram,
    GaugeHistogram,
    Info,
    StateSet,
}

impl PrometheusMetricType {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "counter" => Self::Counter,
            "gauge" => Self::Gauge,
            "summary" => Self::Summary,
            "histogram" => Self::Histogram,
            "gaugehistogram" => Self::GaugeHistogram,
            "info" => Self::Info,
            "stateset" => Self::StateSet,
            _ => Self::Unknown,
        }
    }
}

/// Metric type of a reconstructed family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricType {
    /// Whether values of this type accumulate from a start time
    pub fn is_cumulative(self) -> bool {
        match self {
            MetricType::Counter | MetricType::Histogram | MetricType::Summary => true,
            MetricType::Gauge | MetricType::Untyped => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }
}

impl From<PrometheusMetricType> for MetricType {
    fn from(value: PrometheusMetricType) -> Self {
        match value {
            PrometheusMetricType::Counter => MetricType::Counter,
            PrometheusMetricType::Gauge
            | PrometheusMetricType::Info
            | PrometheusMetricType::StateSet => MetricType::Gauge,
            PrometheusMetricType::Histogram => MetricType::Histogram,
            PrometheusMetricType::Summary => MetricType::Summary,
            // Gauge histograms are not cumulative, and their `_gcount`/`_gsum`
            // series are not reassembled here
            PrometheusMetricType::GaugeHistogram | PrometheusMetricType::Unknown => {
                MetricType::Untyped
            }
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Histogram value in explicit-bounds layout.
///
/// `bucket_counts` holds per-bucket (not cumulative) counts and has one more
/// entry than `bounds`; the last entry counts observations above the largest
/// bound.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramValue {
    pub count: u64,
    pub sum: f64,
    pub bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
}

/// One summary quantile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryValue {
    pub count: u64,
    pub sum: f64,
    pub quantiles: Vec<Quantile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Number(f64),
    Histogram(HistogramValue),
    Summary(SummaryValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Series labels without name, target and bucket/quantile labels
    pub attributes: Labels,
    /// Zero for gauges and untyped points
    pub start_time_unix_nano: u64,
    pub time_unix_nano: u64,
    pub value: PointValue,
    /// Set by the staleness fixer for points carrying the stale marker
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub metric_type: MetricType,
    pub help: String,
    pub unit: String,
    pub points: Vec<DataPoint>,
}

/// Total number of data points in a batch
pub fn data_point_count(families: &[MetricFamily]) -> usize {
    families.iter().map(|f| f.points.len()).sum()
}

/// Convert a sample timestamp in milliseconds to unix nanoseconds.
/// Timestamps before the epoch clamp to zero.
pub fn millis_to_unix_nanos(timestamp_ms: i64) -> u64 {
    u64::try_from(timestamp_ms)
        .unwrap_or(0)
        .saturating_mul(1_000_000)
}

/// Convert cumulative `(upper bound, count)` pairs, sorted by bound and ending
/// with the `+Inf` bucket, to explicit bounds and per-bucket counts.
///
/// A cumulative count lower than its predecessor is malformed input and yields
/// an empty bucket instead of underflowing.
pub fn cumulative_to_per_bucket(cumulative: &[(f64, u64)]) -> (Vec<f64>, Vec<u64>) {
    let mut bounds = Vec::with_capacity(cumulative.len().saturating_sub(1));
    let mut bucket_counts = Vec::with_capacity(cumulative.len());
    let mut prev_count = 0u64;

    for (bound, count) in cumulative {
        if !bound.is_infinite() {
            bounds.push(*bound);
        }
        bucket_counts.push(count.saturating_sub(prev_count));
        prev_count = prev_count.max(*count);
    }

    (bounds, bucket_counts)
}

/// Inverse of [`cumulative_to_per_bucket`]: explicit bounds and per-bucket
/// counts back to cumulative `(upper bound, count)` pairs ending at `+Inf`.
pub fn per_bucket_to_cumulative(bounds: &[f64], bucket_counts: &[u64]) -> Vec<(f64, u64)> {
    let mut running = 0u64;
    bucket_counts
        .iter()
        .enumerate()
        .map(|(i, count)| {
            running = running.saturating_add(*count);
            let bound = bounds.get(i).copied().unwrap_or(f64::INFINITY);
            (bound, running)
        })
        .collect()
}
