//! Target metadata lookup
//!
//! The scrape manager knows, for every `(job, instance)` target, the metric
//! metadata it parsed from `# TYPE`/`# HELP`/`# UNIT` lines and the target's
//! own labels. Transactions only need read access to it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::{Labels, PrometheusMetricType, SCHEME_LABEL};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("unable to find a target with job={job}, and instance={instance}")]
    TargetNotFound { job: String, instance: String },
}

/// Metric metadata from Prometheus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrometheusMetricMetadata {
    pub metric_family_name: String,
    pub metric_type: PrometheusMetricType,
    pub help: String,
    pub unit: String,
}

impl PrometheusMetricMetadata {
    pub fn new(name: &str, metric_type: PrometheusMetricType, help: &str) -> Self {
        Self {
            metric_family_name: name.to_string(),
            metric_type,
            help: help.to_string(),
            unit: String::new(),
        }
    }
}

/// Everything known about one scrape target
#[derive(Debug, Clone, Default)]
pub struct TargetMetadata {
    metadata: HashMap<String, PrometheusMetricMetadata>,
    shared_labels: Labels,
}

impl TargetMetadata {
    pub fn new(shared_labels: Labels) -> Self {
        Self {
            metadata: HashMap::new(),
            shared_labels,
        }
    }

    pub fn with_metric(mut self, metadata: PrometheusMetricMetadata) -> Self {
        self.insert(metadata);
        self
    }

    pub fn insert(&mut self, metadata: PrometheusMetricMetadata) {
        self.metadata
            .insert(metadata.metric_family_name.clone(), metadata);
    }

    /// Metadata of a metric family, by family name
    pub fn metadata(&self, family_name: &str) -> Option<&PrometheusMetricMetadata> {
        self.metadata.get(family_name)
    }

    /// Labels attached to the target itself, e.g. `__scheme__`
    pub fn shared_labels(&self) -> &Labels {
        &self.shared_labels
    }

    pub fn scheme(&self) -> &str {
        self.shared_labels.get(SCHEME_LABEL).unwrap_or_default()
    }
}

/// Read contract of the target metadata store
#[cfg_attr(test, mockall::automock)]
pub trait MetadataService: Send + Sync {
    fn get(&self, job: &str, instance: &str) -> Result<Arc<TargetMetadata>, MetadataError>;
}

/// Metadata store backed by an in-process map, filled by whoever discovers
/// targets
#[derive(Debug, Default)]
pub struct InMemoryMetadataService {
    targets: RwLock<HashMap<(String, String), Arc<TargetMetadata>>>,
}

impl InMemoryMetadataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: &str, instance: &str, metadata: TargetMetadata) {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((job.to_string(), instance.to_string()), Arc::new(metadata));
    }

    pub fn remove(&self, job: &str, instance: &str) -> bool {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(job.to_string(), instance.to_string()))
            .is_some()
    }
}

impl MetadataService for InMemoryMetadataService {
    fn get(&self, job: &str, instance: &str) -> Result<Arc<TargetMetadata>, MetadataError> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(job.to_string(), instance.to_string()))
            .cloned()
            .ok_or_else(|| MetadataError::TargetNotFound {
                job: job.to_string(),
                instance: instance.to_string(),
            })
    }
}
