//! Metric family reconstruction
//!
//! A scrape yields flat samples: `foo_bucket{le="0.1"}`, `foo_sum`,
//! `foo_count`, ... The builder resolves every sample to its family using the
//! target metadata, groups histogram buckets and summary quantiles back into
//! single data points and produces typed [`MetricFamily`] values.

mod family;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ReceiverError, ReceiverResult, SampleError};
use crate::metadata::TargetMetadata;
use crate::model::{Labels, METRIC_NAME_LABEL, MetricFamily, MetricType, millis_to_unix_nanos};
use crate::start_time::StartTimeMatcher;
use family::FamilyAccumulator;

/// Series Prometheus generates about the scrape itself. They describe the
/// scrape, not the target, and are not forwarded.
/// See https://prometheus.io/docs/concepts/jobs_instances/#automatically-generated-labels-and-time-series
const INTERNAL_METRICS: &[&str] = &[
    SCRAPE_UP_METRIC,
    "scrape_duration_seconds",
    "scrape_samples_scraped",
    "scrape_samples_post_metric_relabeling",
    "scrape_series_added",
];

const SCRAPE_UP_METRIC: &str = "up";

pub fn is_internal_metric(metric_name: &str) -> bool {
    INTERNAL_METRICS.contains(&metric_name)
}

/// Result of [`MetricFamilyBuilder::build`]
#[derive(Debug, Default)]
pub struct BuildOutput {
    pub families: Vec<MetricFamily>,
    /// Value of the start time metric, when one was matched
    pub start_time: Option<f64>,
    /// Histogram and summary points dropped for lack of a `_count` series
    pub dropped_points: usize,
}

#[derive(Debug)]
pub struct MetricFamilyBuilder {
    metadata: Arc<TargetMetadata>,
    start_time_matcher: Option<StartTimeMatcher>,
    families: Vec<FamilyAccumulator>,
    family_index: HashMap<String, usize>,
    has_data: bool,
    has_internal_metric: bool,
    start_time: Option<f64>,
    earliest_timestamp_ms: Option<i64>,
}

impl MetricFamilyBuilder {
    /// `start_time_matcher` is set when start times come from a metric of the
    /// scrape rather than from cross-scrape tracking
    pub fn new(metadata: Arc<TargetMetadata>, start_time_matcher: Option<StartTimeMatcher>) -> Self {
        Self {
            metadata,
            start_time_matcher,
            families: Vec::new(),
            family_index: HashMap::new(),
            has_data: false,
            has_internal_metric: false,
            start_time: None,
            earliest_timestamp_ms: None,
        }
    }

    /// Earliest sample timestamp seen so far, in milliseconds
    pub fn earliest_timestamp_ms(&self) -> Option<i64> {
        self.earliest_timestamp_ms
    }

    /// Value of the start time metric seen so far
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn add_data_point(
        &mut self,
        labels: &Labels,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<(), SampleError> {
        let metric_name = labels
            .get(METRIC_NAME_LABEL)
            .filter(|name| !name.is_empty())
            .ok_or(SampleError::MetricNameNotFound)?;

        self.earliest_timestamp_ms = Some(
            self.earliest_timestamp_ms
                .map_or(timestamp_ms, |earliest| earliest.min(timestamp_ms)),
        );

        if is_internal_metric(metric_name) {
            self.has_internal_metric = true;
            if metric_name == SCRAPE_UP_METRIC && value != 1.0 {
                if value == 0.0 {
                    tracing::warn!(labels = %labels.key(), "Failed to scrape Prometheus endpoint");
                } else {
                    tracing::warn!(
                        labels = %labels.key(),
                        value,
                        "The 'up' metric contains invalid value"
                    );
                }
            }
            return Ok(());
        }

        if self
            .start_time_matcher
            .as_ref()
            .is_some_and(|matcher| matcher.matches(metric_name))
        {
            self.start_time = Some(value);
        }

        let index = self.family_for(metric_name);
        self.families[index].add(metric_name, labels, timestamp_ms, value)?;
        self.has_data = true;
        Ok(())
    }

    /// Index of the family accumulator for a sample name, created on first use
    fn family_for(&mut self, metric_name: &str) -> usize {
        let (family_name, metric_type, help, unit) = self.resolve_family(metric_name);
        if let Some(index) = self.family_index.get(&family_name) {
            return *index;
        }
        self.families.push(FamilyAccumulator::new(
            family_name.clone(),
            metric_type,
            help,
            unit,
        ));
        self.family_index
            .insert(family_name, self.families.len() - 1);
        self.families.len() - 1
    }

    /// Resolve the family of a sample name.
    ///
    /// Type suffixes are stripped and the base name looked up in the target
    /// metadata; the match only counts when the declared type can carry that
    /// suffix. Otherwise the full name is looked up, and without metadata the
    /// family is untyped.
    fn resolve_family(&self, metric_name: &str) -> (String, MetricType, String, String) {
        const SUFFIXES: &[(&str, &[MetricType])] = &[
            ("_bucket", &[MetricType::Histogram]),
            ("_sum", &[MetricType::Histogram, MetricType::Summary]),
            ("_count", &[MetricType::Histogram, MetricType::Summary]),
            ("_total", &[MetricType::Counter]),
        ];

        for (suffix, allowed) in SUFFIXES {
            let Some(base) = metric_name.strip_suffix(suffix) else {
                continue;
            };
            if let Some(metadata) = self.metadata.metadata(base) {
                let metric_type = MetricType::from(metadata.metric_type);
                if allowed.contains(&metric_type) {
                    return (
                        base.to_string(),
                        metric_type,
                        metadata.help.clone(),
                        metadata.unit.clone(),
                    );
                }
            }
        }

        match self.metadata.metadata(metric_name) {
            Some(metadata) => (
                metric_name.to_string(),
                MetricType::from(metadata.metric_type),
                metadata.help.clone(),
                metadata.unit.clone(),
            ),
            None => (
                metric_name.to_string(),
                MetricType::Untyped,
                String::new(),
                String::new(),
            ),
        }
    }

    /// Assemble the accumulated families.
    ///
    /// Fails with [`ReceiverError::NoDataToBuild`] only when no sample other
    /// than Prometheus' own scrape series was accepted.
    pub fn build(self) -> ReceiverResult<BuildOutput> {
        if !self.has_data {
            if self.has_internal_metric {
                return Ok(BuildOutput::default());
            }
            return Err(ReceiverError::NoDataToBuild);
        }

        let start_time_unix_nano = self
            .earliest_timestamp_ms
            .map(millis_to_unix_nanos)
            .unwrap_or(0);

        let mut output = BuildOutput {
            families: Vec::with_capacity(self.families.len()),
            start_time: self.start_time,
            dropped_points: 0,
        };
        for accumulator in self.families {
            let (family, dropped) = accumulator.into_family(start_time_unix_nano);
            output.dropped_points += dropped;
            if !family.points.is_empty() {
                output.families.push(family);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PrometheusMetricMetadata;
    use crate::model::{PointValue, PrometheusMetricType};
    use crate::staleness::stale_nan;

    fn target_metadata() -> Arc<TargetMetadata> {
        Arc::new(
            TargetMetadata::default()
                .with_metric(PrometheusMetricMetadata::new(
                    "http_request_duration_seconds",
                    PrometheusMetricType::Histogram,
                    "Request latency",
                ))
                .with_metric(PrometheusMetricMetadata::new(
                    "http_requests",
                    PrometheusMetricType::Counter,
                    "Requests served",
                ))
                .with_metric(PrometheusMetricMetadata::new(
                    "rpc_duration_seconds",
                    PrometheusMetricType::Summary,
                    "",
                ))
                .with_metric(PrometheusMetricMetadata::new(
                    "memory_bytes",
                    PrometheusMetricType::Gauge,
                    "",
                ))
                .with_metric(PrometheusMetricMetadata::new(
                    "process_start_time_seconds",
                    PrometheusMetricType::Gauge,
                    "",
                )),
        )
    }

    fn sample(name: &str, extra: &[(&str, &str)]) -> Labels {
        let mut labels = Labels::from_pairs([
            ("__name__", name),
            ("job", "api"),
            ("instance", "localhost:8080"),
        ]);
        for (k, v) in extra {
            labels.push(*k, *v);
        }
        labels
    }

    #[test]
    fn test_histogram_bucket_reconstruction() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        let name = "http_request_duration_seconds";
        let method = ("method", "GET");

        builder
            .add_data_point(&sample(&format!("{name}_bucket"), &[method, ("le", "0.1")]), 1_000, 3.0)
            .unwrap();
        builder
            .add_data_point(&sample(&format!("{name}_bucket"), &[method, ("le", "0.5")]), 1_000, 7.0)
            .unwrap();
        builder
            .add_data_point(&sample(&format!("{name}_bucket"), &[method, ("le", "+Inf")]), 1_000, 10.0)
            .unwrap();
        builder
            .add_data_point(&sample(&format!("{name}_sum"), &[method]), 1_000, 4.2)
            .unwrap();
        builder
            .add_data_point(&sample(&format!("{name}_count"), &[method]), 1_000, 10.0)
            .unwrap();

        let output = builder.build().unwrap();
        assert_eq!(output.families.len(), 1);
        let family = &output.families[0];
        assert_eq!(family.name, name);
        assert_eq!(family.metric_type, MetricType::Histogram);
        assert_eq!(family.help, "Request latency");
        assert_eq!(family.points.len(), 1);

        let point = &family.points[0];
        assert_eq!(point.attributes, Labels::from_pairs([("method", "GET")]));
        match &point.value {
            PointValue::Histogram(h) => {
                assert_eq!(h.bounds, vec![0.1, 0.5]);
                assert_eq!(h.bucket_counts, vec![3, 4, 3]);
                assert_eq!(h.count, 10);
                assert_eq!(h.sum, 4.2);
            }
            other => panic!("expected histogram, got {other:?}"),
        }
    }

    #[test]
    fn test_histogram_series_split_by_labels() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        let name = "http_request_duration_seconds";
        for method in ["GET", "POST"] {
            builder
                .add_data_point(
                    &sample(&format!("{name}_bucket"), &[("method", method), ("le", "+Inf")]),
                    1_000,
                    1.0,
                )
                .unwrap();
            builder
                .add_data_point(&sample(&format!("{name}_count"), &[("method", method)]), 1_000, 1.0)
                .unwrap();
        }

        let output = builder.build().unwrap();
        assert_eq!(output.families[0].points.len(), 2);
    }

    #[test]
    fn test_counter_total_suffix_resolves_to_family() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder
            .add_data_point(&sample("http_requests_total", &[("code", "200")]), 2_000, 12.0)
            .unwrap();

        let output = builder.build().unwrap();
        let family = &output.families[0];
        assert_eq!(family.name, "http_requests");
        assert_eq!(family.metric_type, MetricType::Counter);
        assert_eq!(family.points[0].value, PointValue::Number(12.0));
        assert_eq!(family.points[0].start_time_unix_nano, 2_000_000_000);
    }

    #[test]
    fn test_missing_metadata_is_untyped() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder
            .add_data_point(&sample("mystery_count", &[]), 1, 3.0)
            .unwrap();

        let output = builder.build().unwrap();
        assert_eq!(output.families[0].name, "mystery_count");
        assert_eq!(output.families[0].metric_type, MetricType::Untyped);
    }

    #[test]
    fn test_suffix_with_inconsistent_type_uses_full_name() {
        // memory_bytes is a gauge, so memory_bytes_count is not part of it
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder
            .add_data_point(&sample("memory_bytes_count", &[]), 1, 3.0)
            .unwrap();

        let output = builder.build().unwrap();
        assert_eq!(output.families[0].name, "memory_bytes_count");
        assert_eq!(output.families[0].metric_type, MetricType::Untyped);
    }

    #[test]
    fn test_missing_metric_name() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        let labels = Labels::from_pairs([("job", "api"), ("instance", "localhost:8080")]);
        assert_eq!(
            builder.add_data_point(&labels, 1, 1.0),
            Err(SampleError::MetricNameNotFound)
        );
        assert!(matches!(builder.build(), Err(ReceiverError::NoDataToBuild)));
    }

    #[test]
    fn test_no_data_to_build() {
        let builder = MetricFamilyBuilder::new(target_metadata(), None);
        assert!(matches!(builder.build(), Err(ReceiverError::NoDataToBuild)));
    }

    #[test]
    fn test_internal_metrics_only_builds_empty() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder.add_data_point(&sample("up", &[]), 1, 0.0).unwrap();
        builder
            .add_data_point(&sample("scrape_duration_seconds", &[]), 1, 0.2)
            .unwrap();

        let output = builder.build().unwrap();
        assert!(output.families.is_empty());
    }

    #[test]
    fn test_start_time_metric_recorded() {
        let mut builder =
            MetricFamilyBuilder::new(target_metadata(), Some(StartTimeMatcher::default()));
        builder
            .add_data_point(&sample("process_start_time_seconds", &[]), 5_000, 1_600_000_000.0)
            .unwrap();
        builder
            .add_data_point(&sample("memory_bytes", &[]), 4_000, 1024.0)
            .unwrap();

        assert_eq!(builder.start_time(), Some(1_600_000_000.0));
        assert_eq!(builder.earliest_timestamp_ms(), Some(4_000));
        let output = builder.build().unwrap();
        assert_eq!(output.start_time, Some(1_600_000_000.0));
        // The start time metric is still forwarded
        assert_eq!(output.families.len(), 2);
    }

    #[test]
    fn test_start_time_not_recorded_without_matcher() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder
            .add_data_point(&sample("process_start_time_seconds", &[]), 5_000, 1_600_000_000.0)
            .unwrap();
        assert_eq!(builder.build().unwrap().start_time, None);
    }

    #[test]
    fn test_stale_samples_are_kept_for_the_fixer() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder
            .add_data_point(&sample("memory_bytes", &[]), 1, stale_nan())
            .unwrap();

        let output = builder.build().unwrap();
        match output.families[0].points[0].value {
            PointValue::Number(v) => assert!(crate::staleness::is_stale_nan(v)),
            ref other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_summary_dropped() {
        let mut builder = MetricFamilyBuilder::new(target_metadata(), None);
        builder
            .add_data_point(&sample("rpc_duration_seconds", &[("quantile", "0.5")]), 1, 0.2)
            .unwrap();
        builder
            .add_data_point(&sample("rpc_duration_seconds_sum", &[]), 1, 3.0)
            .unwrap();

        let output = builder.build().unwrap();
        assert!(output.families.is_empty());
        assert_eq!(output.dropped_points, 1);
    }
}
