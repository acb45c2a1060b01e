//! Internal families to OTLP export requests

use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::common::v1::{InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::{
    AggregationTemporality, DataPointFlags, Gauge, Histogram, HistogramDataPoint, Metric,
    NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum, Summary, SummaryDataPoint, metric::Data,
    number_data_point, summary_data_point::ValueAtQuantile,
};

use crate::model::{DataPoint, Labels, MetricFamily, MetricType, PointValue};
use crate::resource::{ResourceIdentity, string_attribute};

/// Instrumentation scope stamped on everything this receiver emits
pub const SCOPE_NAME: &str = "signalscrape.prometheus";

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    }
}

fn flags(point: &DataPoint) -> u32 {
    if point.stale {
        DataPointFlags::NoRecordedValueMask as u32
    } else {
        0
    }
}

fn attributes(labels: &Labels) -> Vec<KeyValue> {
    labels
        .iter()
        .map(|label| string_attribute(&label.name, &label.value))
        .collect()
}

/// One target's batch as an export request with a single resource
pub fn to_export_request(
    identity: &ResourceIdentity,
    families: Vec<MetricFamily>,
) -> ExportMetricsServiceRequest {
    let metrics = families.into_iter().map(to_metric).collect();

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(identity.to_resource()),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(scope()),
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn to_metric(family: MetricFamily) -> Metric {
    let data = match family.metric_type {
        MetricType::Counter => Data::Sum(Sum {
            data_points: family.points.iter().filter_map(number_point).collect(),
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic: true,
        }),
        MetricType::Gauge | MetricType::Untyped => Data::Gauge(Gauge {
            data_points: family.points.iter().filter_map(number_point).collect(),
        }),
        MetricType::Histogram => Data::Histogram(Histogram {
            data_points: family.points.iter().filter_map(histogram_point).collect(),
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
        }),
        MetricType::Summary => Data::Summary(Summary {
            data_points: family.points.iter().filter_map(summary_point).collect(),
        }),
    };

    Metric {
        name: family.name,
        description: family.help,
        unit: family.unit,
        data: Some(data),
        ..Default::default()
    }
}

fn number_point(point: &DataPoint) -> Option<NumberDataPoint> {
    let PointValue::Number(value) = point.value else {
        return None;
    };
    Some(NumberDataPoint {
        attributes: attributes(&point.attributes),
        start_time_unix_nano: point.start_time_unix_nano,
        time_unix_nano: point.time_unix_nano,
        value: Some(number_data_point::Value::AsDouble(value)),
        flags: flags(point),
        ..Default::default()
    })
}

fn histogram_point(point: &DataPoint) -> Option<HistogramDataPoint> {
    let PointValue::Histogram(histogram) = &point.value else {
        return None;
    };
    Some(HistogramDataPoint {
        attributes: attributes(&point.attributes),
        start_time_unix_nano: point.start_time_unix_nano,
        time_unix_nano: point.time_unix_nano,
        count: histogram.count,
        sum: Some(histogram.sum),
        bucket_counts: histogram.bucket_counts.clone(),
        explicit_bounds: histogram.bounds.clone(),
        flags: flags(point),
        ..Default::default()
    })
}

fn summary_point(point: &DataPoint) -> Option<SummaryDataPoint> {
    let PointValue::Summary(summary) = &point.value else {
        return None;
    };
    Some(SummaryDataPoint {
        attributes: attributes(&point.attributes),
        start_time_unix_nano: point.start_time_unix_nano,
        time_unix_nano: point.time_unix_nano,
        count: summary.count,
        sum: summary.sum,
        quantile_values: summary
            .quantiles
            .iter()
            .map(|q| ValueAtQuantile {
                quantile: q.quantile,
                value: q.value,
            })
            .collect(),
        flags: flags(point),
        ..Default::default()
    })
}
