//! One scrape's worth of samples
//!
//! A [`Transaction`] collects the samples of a single scrape of a single
//! target. The first sample binds it to its `(job, instance)`; `commit`
//! builds the metric families, fixes their start times, flags stale points
//! and hands the result to the sink. Ownership enforces the lifecycle:
//! `append` takes `&mut self`, `commit` and `rollback` consume the
//! transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use common::ResetPolicy;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::adjuster::{JobsMap, MetricsAdjuster};
use crate::builder::MetricFamilyBuilder;
use crate::error::{ReceiverError, ReceiverResult, SampleError};
use crate::metadata::MetadataService;
use crate::model::{INSTANCE_LABEL, JOB_LABEL, Labels, SCHEME_LABEL, data_point_count};
use crate::otlp::to_export_request;
use crate::resource::ResourceIdentity;
use crate::sink::MetricsSink;
use crate::staleness::fix_stale_metrics;
use crate::start_time::{StartTimeMatcher, adjust_start_timestamp, usable_start_time};

static NEXT_TRANSACTION_ID: AtomicI64 = AtomicI64::new(1);

const DEFAULT_SCHEME: &str = "http";

/// How start times of cumulative points are determined
#[derive(Debug, Clone)]
pub enum AdjustmentMode {
    /// Take the start time from a metric the target reports
    StartTimeMetric(StartTimeMatcher),
    /// Track series across scrapes and rebase resets
    JobsMap {
        jobs_map: Arc<JobsMap>,
        policy: ResetPolicy,
    },
}

/// Outcome of a successful commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    pub transaction_id: i64,
    /// Data points handed to the sink
    pub points: usize,
    /// Histogram and summary points dropped while building
    pub dropped_points: usize,
    /// Samples rejected by `append`
    pub sample_errors: Vec<SampleError>,
}

impl CommitSummary {
    fn empty(transaction_id: i64, sample_errors: Vec<SampleError>) -> Self {
        Self {
            transaction_id,
            sample_errors,
            ..Default::default()
        }
    }

    /// Some samples of the batch were rejected
    pub fn is_partial(&self) -> bool {
        !self.sample_errors.is_empty()
    }
}

/// State set up by the first successful append
#[derive(Debug)]
struct Bound {
    identity: ResourceIdentity,
    builder: MetricFamilyBuilder,
}

pub struct Transaction {
    id: i64,
    receiver_name: String,
    external_labels: Labels,
    metadata: Arc<dyn MetadataService>,
    sink: Arc<dyn MetricsSink>,
    mode: AdjustmentMode,
    cancel: CancellationToken,
    bound: Option<Bound>,
    sample_errors: Vec<SampleError>,
}

impl Transaction {
    pub(crate) fn new(
        receiver_name: String,
        external_labels: Labels,
        metadata: Arc<dyn MetadataService>,
        sink: Arc<dyn MetricsSink>,
        mode: AdjustmentMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            receiver_name,
            external_labels,
            metadata,
            sink,
            mode,
            cancel,
            bound: None,
            sample_errors: Vec::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Whether the first sample bound the transaction to a target
    pub fn is_initialized(&self) -> bool {
        self.bound.is_some()
    }

    /// Add one sample to the batch.
    ///
    /// A [`ReceiverError::Sample`] rejects only this sample; it is recorded
    /// for the commit summary and the transaction stays usable.
    pub fn append(&mut self, labels: &Labels, timestamp_ms: i64, value: f64) -> ReceiverResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ReceiverError::Aborted);
        }

        let mut labels = labels.clone();
        labels.overlay(&self.external_labels);

        let bound = match self.bound.take() {
            Some(bound) => bound,
            None => self.bind(&labels)?,
        };
        let bound = self.bound.insert(bound);

        if let Err(err) = bound.builder.add_data_point(&labels, timestamp_ms, value) {
            tracing::debug!(transaction = self.id, error = %err, "Rejected sample");
            self.sample_errors.push(err.clone());
            return Err(err.into());
        }
        Ok(())
    }

    fn bind(&self, labels: &Labels) -> ReceiverResult<Bound> {
        let non_empty = |name: &str| labels.get(name).filter(|value| !value.is_empty());
        let (Some(job), Some(instance)) = (non_empty(JOB_LABEL), non_empty(INSTANCE_LABEL)) else {
            return Err(ReceiverError::MissingJobInstance);
        };

        let metadata = self.metadata.get(job, instance)?;

        let scheme = non_empty(SCHEME_LABEL)
            .or_else(|| Some(metadata.scheme()).filter(|s| !s.is_empty()))
            .unwrap_or(DEFAULT_SCHEME);
        let identity = ResourceIdentity::new(job, instance, scheme);

        let start_time_matcher = match &self.mode {
            AdjustmentMode::StartTimeMetric(matcher) => Some(matcher.clone()),
            AdjustmentMode::JobsMap { .. } => None,
        };

        tracing::debug!(
            transaction = self.id,
            job = %identity.job,
            instance = %identity.instance,
            "Transaction bound to target"
        );

        Ok(Bound {
            identity,
            builder: MetricFamilyBuilder::new(metadata, start_time_matcher),
        })
    }

    /// Build the batch and deliver it.
    ///
    /// Cancellation is honoured up to the start of the commit; once started
    /// the commit runs to completion.
    pub async fn commit(self) -> ReceiverResult<CommitSummary> {
        let span = tracing::info_span!(
            "commit",
            transaction = self.id,
            receiver = %self.receiver_name,
            transport = "http",
            dataformat = "prometheus",
        );
        self.commit_inner().instrument(span).await
    }

    async fn commit_inner(self) -> ReceiverResult<CommitSummary> {
        if self.cancel.is_cancelled() {
            return Err(ReceiverError::Aborted);
        }

        let Transaction {
            id,
            sink,
            mode,
            bound,
            sample_errors,
            ..
        } = self;
        let mut summary = CommitSummary::empty(id, sample_errors);

        let Some(Bound { identity, builder }) = bound else {
            tracing::debug!("Nothing appended, skipping commit");
            return Ok(summary);
        };

        let output = match builder.build() {
            Ok(output) => output,
            Err(ReceiverError::NoDataToBuild) => {
                tracing::debug!("No data to build");
                return Ok(summary);
            }
            Err(err) => return Err(err),
        };
        summary.dropped_points = output.dropped_points;

        let mut families = output.families;
        if families.is_empty() {
            tracing::debug!("Only scrape metrics in batch, nothing to send");
            return Ok(summary);
        }

        match &mode {
            AdjustmentMode::StartTimeMetric(_) => {
                let Some(start_time) = usable_start_time(output.start_time) else {
                    tracing::warn!(
                        job = %identity.job,
                        instance = %identity.instance,
                        start_time = ?output.start_time,
                        "Start time metric missing or unusable, dropping batch"
                    );
                    return Err(ReceiverError::MissingStartTime);
                };
                adjust_start_timestamp(start_time, &mut families);
            }
            AdjustmentMode::JobsMap { jobs_map, policy } => {
                let timeseries = jobs_map.get(&identity.job, &identity.instance).await;
                let mut timeseries = timeseries.lock().await;
                let outcome = MetricsAdjuster::new(&mut timeseries, *policy).adjust(&mut families);
                if outcome.resets > 0 {
                    tracing::debug!(
                        resets = outcome.resets,
                        suppressed = outcome.suppressed,
                        "Rebased reset series"
                    );
                }
            }
        }

        fix_stale_metrics(&mut families);

        let points = data_point_count(&families);
        if points == 0 {
            return Ok(summary);
        }

        let request = to_export_request(&identity, families);
        sink.consume(request).await.map_err(|e| {
            tracing::error!(error = ?e, "Failed to deliver metrics");
            ReceiverError::Consume(e)
        })?;

        summary.points = points;
        tracing::info!(
            points,
            dropped_points = summary.dropped_points,
            sample_errors = summary.sample_errors.len(),
            "Committed scrape"
        );
        Ok(summary)
    }

    /// Discard the batch
    pub fn rollback(self) {
        tracing::debug!(transaction = self.id, "Transaction rolled back");
    }
}
