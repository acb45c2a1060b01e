//! Test configuration builder for creating test setups quickly.

use crate::config::{Configuration, ResetPolicy};

/// Builder for creating test configurations.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_start_time_metric(None)
///     .with_external_label("region", "eu")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Start from the default configuration (JobsMap adjustment, propagate
    /// resets, no external labels)
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    pub fn with_receiver_name(mut self, name: &str) -> Self {
        self.config.receiver.name = name.to_string();
        self
    }

    /// Switch to start-time-metric adjustment, optionally with a custom regex
    pub fn with_start_time_metric(mut self, regex: Option<&str>) -> Self {
        self.config.receiver.use_start_time_metric = true;
        self.config.receiver.start_time_metric_regex = regex.map(str::to_string);
        self
    }

    pub fn with_external_label(mut self, name: &str, value: &str) -> Self {
        self.config
            .receiver
            .external_labels
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_reset_policy(mut self, policy: ResetPolicy) -> Self {
        self.config.receiver.reset_policy = policy;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TestConfigBuilder::new().build();
        assert!(!config.receiver.use_start_time_metric);
        assert_eq!(config.receiver.reset_policy, ResetPolicy::Propagate);
    }

    #[test]
    fn test_builder_overrides() {
        let config = TestConfigBuilder::new()
            .with_receiver_name("prom/test")
            .with_start_time_metric(Some("^app_start"))
            .with_external_label("region", "eu")
            .with_reset_policy(ResetPolicy::Suppress)
            .build();

        assert_eq!(config.receiver.name, "prom/test");
        assert!(config.receiver.use_start_time_metric);
        assert_eq!(
            config.receiver.start_time_metric_regex.as_deref(),
            Some("^app_start")
        );
        assert_eq!(config.receiver.external_labels["region"], "eu");
        assert_eq!(config.receiver.reset_policy, ResetPolicy::Suppress);
    }
}
