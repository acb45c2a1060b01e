//! Prometheus receiver core
//!
//! Turns the samples of Prometheus scrapes into OTLP metrics: one
//! [`Transaction`] per scrape groups samples into typed metric families,
//! resolves start times of cumulative series and flags stale points before
//! handing the batch to a [`MetricsSink`].

pub mod adjuster;
pub mod builder;
pub mod error;
pub mod metadata;
pub mod model;
pub mod otlp;
pub mod receiver;
pub mod resource;
pub mod sink;
pub mod staleness;
pub mod start_time;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;

pub use adjuster::{JobsMap, MetricsAdjuster};
pub use error::{ReceiverError, ReceiverResult, SampleError};
pub use metadata::{
    InMemoryMetadataService, MetadataError, MetadataService, PrometheusMetricMetadata,
    TargetMetadata,
};
pub use model::{Labels, MetricFamily, MetricType, PrometheusMetricType};
pub use receiver::PrometheusReceiver;
pub use sink::MetricsSink;
pub use transaction::{AdjustmentMode, CommitSummary, Transaction};
