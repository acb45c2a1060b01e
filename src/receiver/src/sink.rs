use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;

/// Downstream consumer of committed batches
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn consume(&self, request: ExportMetricsServiceRequest) -> anyhow::Result<()>;
}
