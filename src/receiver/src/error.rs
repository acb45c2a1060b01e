use crate::metadata::MetadataError;

/// Problems with a single sample. They reject that sample only; the
/// transaction keeps going and reports them in its commit summary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("metricName not found from labels")]
    MetricNameNotFound,
    #[error("invalid bucket bound {value:?} on {metric}")]
    InvalidBucketBound { metric: String, value: String },
    #[error("invalid quantile {value:?} on {metric}")]
    InvalidQuantile { metric: String, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("transaction aborted")]
    Aborted,
    #[error("job or instance cannot be found from labels")]
    MissingJobInstance,
    #[error(transparent)]
    MetadataLookup(#[from] MetadataError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error("no data to build")]
    NoDataToBuild,
    #[error("start time metric is missing")]
    MissingStartTime,
    #[error("invalid start time metric regex: {0}")]
    InvalidStartTimeRegex(#[from] regex::Error),
    #[error("failed to deliver metrics downstream: {0:#}")]
    Consume(anyhow::Error),
}

impl ReceiverError {
    /// Whether the error only concerns a single sample
    pub fn is_sample_error(&self) -> bool {
        matches!(self, ReceiverError::Sample(_))
    }
}

pub type ReceiverResult<T> = Result<T, ReceiverError>;
