//! Test doubles and helpers shared by unit and integration tests

use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::{Metric, metric::Data};
use tokio::sync::Mutex;

use crate::metadata::{InMemoryMetadataService, PrometheusMetricMetadata, TargetMetadata};
use crate::model::{
    INSTANCE_LABEL, JOB_LABEL, Labels, METRIC_NAME_LABEL, PrometheusMetricType, SCHEME_LABEL,
};
use crate::sink::MetricsSink;

/// Sink keeping every request it receives
#[derive(Debug, Default)]
pub struct RecordingSink {
    requests: Mutex<Vec<ExportMetricsServiceRequest>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<ExportMetricsServiceRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// All metrics received so far, flattened across requests
    pub async fn metrics(&self) -> Vec<Metric> {
        self.requests
            .lock()
            .await
            .iter()
            .flat_map(|r| &r.resource_metrics)
            .flat_map(|rm| &rm.scope_metrics)
            .flat_map(|sm| sm.metrics.clone())
            .collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn consume(&self, request: ExportMetricsServiceRequest) -> anyhow::Result<()> {
        self.requests.lock().await.push(request);
        Ok(())
    }
}

/// Sink rejecting everything
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl MetricsSink for FailingSink {
    async fn consume(&self, _request: ExportMetricsServiceRequest) -> anyhow::Result<()> {
        anyhow::bail!("downstream unavailable")
    }
}

/// Labels of a sample scraped from `job`/`instance`
pub fn sample_labels(name: &str, job: &str, instance: &str, extra: &[(&str, &str)]) -> Labels {
    let mut labels = Labels::from_pairs([
        (METRIC_NAME_LABEL, name),
        (JOB_LABEL, job),
        (INSTANCE_LABEL, instance),
    ]);
    for (key, value) in extra {
        labels.push(*key, *value);
    }
    labels
}

/// Metadata of a target exposing the metrics used across tests
pub fn target_metadata() -> TargetMetadata {
    TargetMetadata::new(Labels::from_pairs([(SCHEME_LABEL, "http")]))
        .with_metric(PrometheusMetricMetadata::new(
            "http_requests",
            PrometheusMetricType::Counter,
            "Requests served",
        ))
        .with_metric(PrometheusMetricMetadata::new(
            "memory_bytes",
            PrometheusMetricType::Gauge,
            "Resident memory",
        ))
        .with_metric(PrometheusMetricMetadata::new(
            "request_duration_seconds",
            PrometheusMetricType::Histogram,
            "Request latency",
        ))
        .with_metric(PrometheusMetricMetadata::new(
            "rpc_duration_seconds",
            PrometheusMetricType::Summary,
            "RPC latency",
        ))
        .with_metric(PrometheusMetricMetadata::new(
            "process_start_time_seconds",
            PrometheusMetricType::Gauge,
            "Start time of the process",
        ))
}

/// Metadata service knowing each `(job, instance)` with [`target_metadata`]
pub fn metadata_service(targets: &[(&str, &str)]) -> InMemoryMetadataService {
    let service = InMemoryMetadataService::new();
    for (job, instance) in targets {
        service.insert(job, instance, target_metadata());
    }
    service
}

/// Double values of the number points of `metric`, in order
pub fn number_values(metric: &Metric) -> Vec<f64> {
    use opentelemetry_proto::tonic::metrics::v1::number_data_point::Value;

    let points = match &metric.data {
        Some(Data::Sum(sum)) => &sum.data_points,
        Some(Data::Gauge(gauge)) => &gauge.data_points,
        _ => return Vec::new(),
    };
    points
        .iter()
        .filter_map(|p| match p.value {
            Some(Value::AsDouble(v)) => Some(v),
            Some(Value::AsInt(v)) => Some(v as f64),
            None => None,
        })
        .collect()
}
