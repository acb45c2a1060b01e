//! Replay of recorded scrapes
//!
//! A dump file describes targets (with their metric metadata) and a sequence
//! of scrapes. Every scrape runs through its own transaction, exactly as a
//! live scrape loop would drive the receiver.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use receiver::model::{INSTANCE_LABEL, JOB_LABEL, METRIC_NAME_LABEL, SCHEME_LABEL};
use receiver::staleness::stale_nan;
use receiver::{
    CommitSummary, InMemoryMetadataService, JobsMap, Labels, MetricsSink, PrometheusMetricMetadata,
    PrometheusMetricType, PrometheusReceiver, ReceiverError, TargetMetadata,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
pub struct ScrapeDump {
    #[serde(default)]
    pub targets: Vec<TargetDump>,
    #[serde(default)]
    pub scrapes: Vec<ScrapeRecord>,
}

#[derive(Debug, Deserialize)]
pub struct TargetDump {
    pub job: String,
    pub instance: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

fn default_scheme() -> String {
    "http".to_string()
}

#[derive(Debug, Deserialize)]
pub struct MetadataEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: String,
    #[serde(default)]
    pub help: String,
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRecord {
    pub job: String,
    pub instance: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub samples: Vec<SampleRecord>,
}

#[derive(Debug, Deserialize)]
pub struct SampleRecord {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub value: SampleValue,
    /// Overrides the scrape timestamp
    pub timestamp_ms: Option<i64>,
}

/// Sample values as written in dumps: a number, or one of `"stale"`,
/// `"NaN"`, `"+Inf"` and `"-Inf"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    pub fn to_f64(&self) -> Result<f64> {
        match self {
            SampleValue::Number(v) => Ok(*v),
            SampleValue::Text(text) => match text.as_str() {
                "stale" => Ok(stale_nan()),
                "NaN" => Ok(f64::NAN),
                "+Inf" | "Inf" => Ok(f64::INFINITY),
                "-Inf" => Ok(f64::NEG_INFINITY),
                other => other
                    .parse()
                    .with_context(|| format!("Invalid sample value: {other:?}")),
            },
        }
    }
}

impl ScrapeDump {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse scrape dump")
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid scrape dump {}", path.display()))
    }

    /// Metadata service knowing every target of the dump
    pub fn metadata_service(&self) -> InMemoryMetadataService {
        let service = InMemoryMetadataService::new();
        for target in &self.targets {
            let mut metadata =
                TargetMetadata::new(Labels::from_pairs([(SCHEME_LABEL, target.scheme.as_str())]));
            for entry in &target.metadata {
                metadata.insert(PrometheusMetricMetadata::new(
                    &entry.name,
                    PrometheusMetricType::parse(&entry.metric_type),
                    &entry.help,
                ));
            }
            service.insert(&target.job, &target.instance, metadata);
        }
        service
    }
}

impl SampleRecord {
    fn labels(&self, job: &str, instance: &str) -> Labels {
        let mut labels = Labels::from_pairs([
            (METRIC_NAME_LABEL, self.name.as_str()),
            (JOB_LABEL, job),
            (INSTANCE_LABEL, instance),
        ]);
        for (name, value) in &self.labels {
            labels.push(name.as_str(), value.as_str());
        }
        labels
    }
}

/// Sink that logs what it receives instead of exporting it
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl MetricsSink for LoggingSink {
    async fn consume(&self, request: ExportMetricsServiceRequest) -> anyhow::Result<()> {
        for metric in request
            .resource_metrics
            .iter()
            .flat_map(|rm| &rm.scope_metrics)
            .flat_map(|sm| &sm.metrics)
        {
            let (kind, points) = match &metric.data {
                Some(Data::Sum(s)) => ("sum", s.data_points.len()),
                Some(Data::Gauge(g)) => ("gauge", g.data_points.len()),
                Some(Data::Histogram(h)) => ("histogram", h.data_points.len()),
                Some(Data::Summary(s)) => ("summary", s.data_points.len()),
                Some(Data::ExponentialHistogram(h)) => ("exponential_histogram", h.data_points.len()),
                None => ("empty", 0),
            };
            tracing::info!(metric = %metric.name, kind, points, "Exported metric");
        }
        Ok(())
    }
}

/// Outcome of one replayed scrape
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub job: String,
    pub instance: String,
    pub result: Result<CommitSummary, ReceiverError>,
}

/// Run every scrape of the dump through `receiver`, in order
pub async fn replay(
    receiver: &PrometheusReceiver,
    dump: &ScrapeDump,
    cancel: &CancellationToken,
) -> Result<Vec<ScrapeOutcome>> {
    let mut outcomes = Vec::with_capacity(dump.scrapes.len());

    for scrape in &dump.scrapes {
        if cancel.is_cancelled() {
            tracing::warn!("Replay cancelled");
            break;
        }

        let result = replay_scrape(receiver, scrape, cancel.child_token()).await?;
        outcomes.push(ScrapeOutcome {
            job: scrape.job.clone(),
            instance: scrape.instance.clone(),
            result,
        });
    }

    Ok(outcomes)
}

async fn replay_scrape(
    receiver: &PrometheusReceiver,
    scrape: &ScrapeRecord,
    cancel: CancellationToken,
) -> Result<Result<CommitSummary, ReceiverError>> {
    let mut transaction = receiver.begin_transaction(cancel);

    for sample in &scrape.samples {
        let labels = sample.labels(&scrape.job, &scrape.instance);
        let value = sample.value.to_f64()?;
        let timestamp_ms = sample.timestamp_ms.unwrap_or(scrape.timestamp_ms);

        match transaction.append(&labels, timestamp_ms, value) {
            Ok(()) => {}
            Err(err) if err.is_sample_error() => {
                tracing::warn!(metric = %sample.name, error = %err, "Skipping sample");
            }
            Err(err) => {
                transaction.rollback();
                return Ok(Err(err));
            }
        }
    }

    Ok(transaction.commit().await)
}

/// Replay every file in order. Files share one JobsMap, so adjustment state
/// carries across them.
pub async fn run(
    config: &common::Configuration,
    files: &[std::path::PathBuf],
    cancel: CancellationToken,
) -> Result<()> {
    let jobs_map = Arc::new(JobsMap::new());
    for path in files {
        let dump = ScrapeDump::from_file(path).await?;
        let receiver = PrometheusReceiver::new(
            &config.receiver,
            Arc::new(dump.metadata_service()),
            Arc::new(LoggingSink),
            jobs_map.clone(),
        )
        .context("Failed to create receiver")?;

        tracing::info!(
            file = %path.display(),
            targets = dump.targets.len(),
            scrapes = dump.scrapes.len(),
            "Replaying scrape dump"
        );

        for outcome in replay(&receiver, &dump, &cancel).await? {
            match outcome.result {
                Ok(summary) => println!(
                    "{}/{} transaction={} points={} dropped={} sample_errors={}",
                    outcome.job,
                    outcome.instance,
                    summary.transaction_id,
                    summary.points,
                    summary.dropped_points,
                    summary.sample_errors.len()
                ),
                Err(err) => println!("{}/{} failed: {err}", outcome.job, outcome.instance),
            }
        }
    }
    Ok(())
}
