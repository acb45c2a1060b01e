//! Accumulation of the samples belonging to one metric family

use std::collections::{BTreeMap, HashMap};

use crate::error::SampleError;
use crate::model::{
    BUCKET_LABEL, DataPoint, HistogramValue, INSTANCE_LABEL, JOB_LABEL, Labels,
    METRIC_NAME_LABEL, METRICS_PATH_LABEL, MetricFamily, MetricType, PointValue,
    QUANTILE_LABEL, Quantile, SCHEME_LABEL, SummaryValue, cumulative_to_per_bucket,
    millis_to_unix_nanos,
};

/// Labels that never become data point attributes
const TARGET_LABELS: &[&str] = &[
    METRIC_NAME_LABEL,
    JOB_LABEL,
    INSTANCE_LABEL,
    SCHEME_LABEL,
    METRICS_PATH_LABEL,
];

const HISTOGRAM_EXCLUDED: &[&str] = &[
    METRIC_NAME_LABEL,
    JOB_LABEL,
    INSTANCE_LABEL,
    SCHEME_LABEL,
    METRICS_PATH_LABEL,
    BUCKET_LABEL,
];

const SUMMARY_EXCLUDED: &[&str] = &[
    METRIC_NAME_LABEL,
    JOB_LABEL,
    INSTANCE_LABEL,
    SCHEME_LABEL,
    METRICS_PATH_LABEL,
    QUANTILE_LABEL,
];

/// Parse a `le` or `quantile` label value. `+Inf` is the unbounded bucket.
pub(crate) fn parse_bound(value: &str) -> Option<f64> {
    let bound = match value {
        "+Inf" | "Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        _ => value.parse::<f64>().ok()?,
    };
    (!bound.is_nan()).then_some(bound)
}

/// Which part of a family a sample contributes
#[derive(Debug, Clone, Copy, PartialEq)]
enum Component {
    Value,
    Bucket(f64),
    Quantile(f64),
    Sum,
    Count,
    Ignored,
}

/// Wrapper for f64 that implements Ord for use as a map key
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f64);

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Samples sharing a family and an attribute set, i.e. one future data point
#[derive(Debug, Default)]
struct SeriesGroup {
    attributes: Labels,
    timestamp_ms: i64,
    value: Option<f64>,
    buckets: BTreeMap<OrderedFloat, f64>, // le bound -> cumulative count
    quantiles: BTreeMap<OrderedFloat, f64>,
    count: Option<f64>,
    sum: Option<f64>,
}

#[derive(Debug)]
pub(crate) struct FamilyAccumulator {
    name: String,
    metric_type: MetricType,
    help: String,
    unit: String,
    groups: Vec<SeriesGroup>,
    group_index: HashMap<String, usize>,
}

impl FamilyAccumulator {
    pub(crate) fn new(name: String, metric_type: MetricType, help: String, unit: String) -> Self {
        Self {
            name,
            metric_type,
            help,
            unit,
            groups: Vec::new(),
            group_index: HashMap::new(),
        }
    }

    fn component(&self, metric_name: &str, labels: &Labels) -> Result<Component, SampleError> {
        let suffix = metric_name.strip_prefix(self.name.as_str());
        match self.metric_type {
            MetricType::Histogram => match suffix {
                Some("_bucket") => {
                    let le = labels.get(BUCKET_LABEL).unwrap_or_default();
                    parse_bound(le)
                        .map(Component::Bucket)
                        .ok_or_else(|| SampleError::InvalidBucketBound {
                            metric: metric_name.to_string(),
                            value: le.to_string(),
                        })
                }
                Some("_sum") => Ok(Component::Sum),
                Some("_count") => Ok(Component::Count),
                _ => Ok(Component::Ignored),
            },
            MetricType::Summary => match suffix {
                Some("_sum") => Ok(Component::Sum),
                Some("_count") => Ok(Component::Count),
                Some("") => {
                    let quantile = labels.get(QUANTILE_LABEL).unwrap_or_default();
                    parse_bound(quantile)
                        .map(Component::Quantile)
                        .ok_or_else(|| SampleError::InvalidQuantile {
                            metric: metric_name.to_string(),
                            value: quantile.to_string(),
                        })
                }
                _ => Ok(Component::Ignored),
            },
            MetricType::Counter | MetricType::Gauge | MetricType::Untyped => Ok(Component::Value),
        }
    }

    pub(crate) fn add(
        &mut self,
        metric_name: &str,
        labels: &Labels,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<(), SampleError> {
        let component = self.component(metric_name, labels)?;
        if component == Component::Ignored {
            return Ok(());
        }

        let excluded = match self.metric_type {
            MetricType::Histogram => HISTOGRAM_EXCLUDED,
            MetricType::Summary => SUMMARY_EXCLUDED,
            MetricType::Counter | MetricType::Gauge | MetricType::Untyped => TARGET_LABELS,
        };
        let attributes = labels.without(excluded);
        let key = attributes.key();

        let index = match self.group_index.get(&key) {
            Some(index) => *index,
            None => {
                self.groups.push(SeriesGroup {
                    attributes,
                    timestamp_ms,
                    ..Default::default()
                });
                self.group_index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[index];
        group.timestamp_ms = group.timestamp_ms.max(timestamp_ms);
        match component {
            Component::Value => group.value = Some(value),
            Component::Bucket(bound) => {
                group.buckets.insert(OrderedFloat(bound), value);
            }
            Component::Quantile(quantile) => {
                group.quantiles.insert(OrderedFloat(quantile), value);
            }
            Component::Sum => group.sum = Some(value),
            Component::Count => group.count = Some(value),
            Component::Ignored => {}
        }
        Ok(())
    }

    /// Assemble the data points. Histograms and summaries without a `_count`
    /// series are dropped; the second value is the number of dropped points.
    pub(crate) fn into_family(self, start_time_unix_nano: u64) -> (MetricFamily, usize) {
        let metric_type = self.metric_type;
        let start_time_unix_nano = if metric_type.is_cumulative() {
            start_time_unix_nano
        } else {
            0
        };

        let mut dropped = 0;
        let mut points = Vec::with_capacity(self.groups.len());

        for group in self.groups {
            let value = match metric_type {
                MetricType::Counter | MetricType::Gauge | MetricType::Untyped => {
                    group.value.map(PointValue::Number)
                }
                MetricType::Histogram => histogram_value(&group).map(PointValue::Histogram),
                MetricType::Summary => summary_value(&group).map(PointValue::Summary),
            };

            let Some(value) = value else {
                tracing::debug!(
                    metric = %self.name,
                    attributes = %group.attributes.key(),
                    "Dropping incomplete data point: missing _count series"
                );
                dropped += 1;
                continue;
            };

            points.push(DataPoint {
                attributes: group.attributes,
                start_time_unix_nano,
                time_unix_nano: millis_to_unix_nanos(group.timestamp_ms),
                value,
                stale: false,
            });
        }

        let family = MetricFamily {
            name: self.name,
            metric_type,
            help: self.help,
            unit: self.unit,
            points,
        };
        (family, dropped)
    }
}

fn histogram_value(group: &SeriesGroup) -> Option<HistogramValue> {
    let count = group.count?;

    let mut cumulative: Vec<(f64, u64)> = group
        .buckets
        .iter()
        .map(|(bound, count)| (bound.0, *count as u64))
        .collect();
    // Without an explicit +Inf bucket the total count closes the histogram
    if cumulative.last().is_none_or(|(bound, _)| !bound.is_infinite()) {
        cumulative.push((f64::INFINITY, count as u64));
    }

    let (bounds, bucket_counts) = cumulative_to_per_bucket(&cumulative);
    Some(HistogramValue {
        count: count as u64,
        sum: group.sum.unwrap_or(0.0),
        bounds,
        bucket_counts,
    })
}

fn summary_value(group: &SeriesGroup) -> Option<SummaryValue> {
    let count = group.count?;
    Some(SummaryValue {
        count: count as u64,
        sum: group.sum.unwrap_or(0.0),
        quantiles: group
            .quantiles
            .iter()
            .map(|(quantile, value)| Quantile {
                quantile: quantile.0,
                value: *value,
            })
            .collect(),
    })
}
