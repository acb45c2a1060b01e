use std::sync::Arc;

use common::ReceiverConfig;
use tokio_util::sync::CancellationToken;

use crate::adjuster::JobsMap;
use crate::error::ReceiverResult;
use crate::metadata::MetadataService;
use crate::model::Labels;
use crate::sink::MetricsSink;
use crate::start_time::StartTimeMatcher;
use crate::transaction::{AdjustmentMode, Transaction};

/// Shared collaborators of all transactions of one receiver
pub struct PrometheusReceiver {
    name: String,
    external_labels: Labels,
    metadata: Arc<dyn MetadataService>,
    sink: Arc<dyn MetricsSink>,
    jobs_map: Arc<JobsMap>,
    mode: AdjustmentMode,
}

impl PrometheusReceiver {
    /// Fails only on an invalid start time metric regex
    pub fn new(
        config: &ReceiverConfig,
        metadata: Arc<dyn MetadataService>,
        sink: Arc<dyn MetricsSink>,
        jobs_map: Arc<JobsMap>,
    ) -> ReceiverResult<Self> {
        let mode = if config.use_start_time_metric {
            AdjustmentMode::StartTimeMetric(StartTimeMatcher::new(
                config.start_time_metric_regex.as_deref(),
            )?)
        } else {
            AdjustmentMode::JobsMap {
                jobs_map: jobs_map.clone(),
                policy: config.reset_policy,
            }
        };

        let external_labels = config
            .external_labels
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect::<Vec<_>>();

        tracing::info!(
            receiver = %config.name,
            start_time_metric = config.use_start_time_metric,
            reset_policy = ?config.reset_policy,
            "Prometheus receiver created"
        );

        Ok(Self {
            name: config.name.clone(),
            external_labels: Labels::from_pairs(external_labels),
            metadata,
            sink,
            jobs_map,
            mode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn jobs_map(&self) -> &Arc<JobsMap> {
        &self.jobs_map
    }

    pub fn adjustment_mode(&self) -> &AdjustmentMode {
        &self.mode
    }

    /// Start the transaction of one scrape
    pub fn begin_transaction(&self, cancel: CancellationToken) -> Transaction {
        Transaction::new(
            self.name.clone(),
            self.external_labels.clone(),
            self.metadata.clone(),
            self.sink.clone(),
            self.mode.clone(),
            cancel,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReceiverError;
    use crate::testing::{RecordingSink, metadata_service, sample_labels};
    use common::ResetPolicy;
    use common::testing::TestConfigBuilder;

    fn receiver(config: &ReceiverConfig) -> ReceiverResult<PrometheusReceiver> {
        PrometheusReceiver::new(
            config,
            Arc::new(metadata_service(&[("api", "api:9090")])),
            Arc::new(RecordingSink::new()),
            Arc::new(JobsMap::new()),
        )
    }

    #[test]
    fn test_default_mode_is_jobs_map() {
        let config = TestConfigBuilder::new()
            .with_reset_policy(ResetPolicy::Suppress)
            .build();
        let receiver = receiver(&config.receiver).unwrap();

        match receiver.adjustment_mode() {
            AdjustmentMode::JobsMap { jobs_map, policy } => {
                assert!(Arc::ptr_eq(jobs_map, receiver.jobs_map()));
                assert_eq!(*policy, ResetPolicy::Suppress);
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_start_time_metric_mode() {
        let config = TestConfigBuilder::new()
            .with_start_time_metric(Some("^app_start_seconds$"))
            .build();
        let receiver = receiver(&config.receiver).unwrap();

        match receiver.adjustment_mode() {
            AdjustmentMode::StartTimeMetric(matcher) => {
                assert!(matcher.matches("app_start_seconds"));
                assert!(!matcher.matches("process_start_time_seconds"));
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let config = TestConfigBuilder::new()
            .with_start_time_metric(Some("(unclosed"))
            .build();
        assert!(matches!(
            receiver(&config.receiver),
            Err(ReceiverError::InvalidStartTimeRegex(_))
        ));
    }

    #[tokio::test]
    async fn test_transactions_are_independent() {
        let config = TestConfigBuilder::new()
            .with_external_label("cluster", "eu-1")
            .build();
        let receiver = receiver(&config.receiver).unwrap();

        let mut first = receiver.begin_transaction(CancellationToken::new());
        let second = receiver.begin_transaction(CancellationToken::new());
        assert_ne!(first.id(), second.id());

        first
            .append(&sample_labels("memory_bytes", "api", "api:9090", &[]), 1_000, 1.0)
            .unwrap();
        assert!(first.is_initialized());
        assert!(!second.is_initialized());
    }
}
