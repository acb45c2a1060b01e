use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "signalscrape.toml";

/// Prefix for environment variable overrides, nested keys are split on `__`
pub const ENV_PREFIX: &str = "SIGNALSCRAPE__";

/// What the adjuster does with the data point that reveals a counter reset.
///
/// In both cases the series keeps its start time and the values carried over
/// from before the reset, so the emitted sequence never decreases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPolicy {
    /// Emit the transitional point with the rebased value
    #[default]
    Propagate,
    /// Drop the transitional point from the batch
    Suppress,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Receiver identity, attached to the receiver's log spans
    pub name: String,
    /// Stamp cumulative points with the target's process start time instead
    /// of tracking series across scrapes
    pub use_start_time_metric: bool,
    /// Regex selecting the start time metric. When unset the metric named
    /// `process_start_time_seconds` is used.
    pub start_time_metric_regex: Option<String>,
    /// Static labels added to every sample that does not already carry them
    pub external_labels: BTreeMap<String, String>,
    /// Handling of the point that reveals a counter reset
    pub reset_policy: ResetPolicy,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            name: String::from("prometheus"),
            use_start_time_metric: false,
            start_time_metric_regex: None,
            external_labels: BTreeMap::new(),
            reset_policy: ResetPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Prometheus receiver configuration
    pub receiver: ReceiverConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment<P: figment::Provider>(file: P) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.receiver.name, "prometheus");
        assert!(!config.receiver.use_start_time_metric);
        assert!(config.receiver.start_time_metric_regex.is_none());
        assert!(config.receiver.external_labels.is_empty());
        assert_eq!(config.receiver.reset_policy, ResetPolicy::Propagate);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.receiver.name, "prometheus");
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [receiver]
                use_start_time_metric = true
                start_time_metric_regex = "^process_start_time"
                reset_policy = "suppress"

                [receiver.external_labels]
                region = "eu-west-1"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert!(config.receiver.use_start_time_metric);
            assert_eq!(
                config.receiver.start_time_metric_regex.as_deref(),
                Some("^process_start_time")
            );
            assert_eq!(config.receiver.reset_policy, ResetPolicy::Suppress);
            assert_eq!(
                config.receiver.external_labels.get("region").map(String::as_str),
                Some("eu-west-1")
            );
            // Untouched sections keep their defaults
            assert_eq!(config.logging.level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [receiver]
                name = "from-file"
                "#,
            )?;
            jail.set_env("SIGNALSCRAPE__RECEIVER__NAME", "from-env");
            jail.set_env("SIGNALSCRAPE__LOGGING__LEVEL", "debug");
            jail.set_env("SIGNALSCRAPE__RECEIVER__EXTERNAL_LABELS__CLUSTER", "prod");

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.receiver.name, "from-env");
            assert_eq!(config.logging.level, "debug");
            assert_eq!(
                config.receiver.external_labels.get("cluster").map(String::as_str),
                Some("prod")
            );
            Ok(())
        });
    }

    #[test]
    fn test_load_from_explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [receiver]
                name = "custom"
                "#,
            )?;

            let config =
                Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;
            assert_eq!(config.receiver.name, "custom");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_reset_policy_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SIGNALSCRAPE__RECEIVER__RESET_POLICY", "rewind");
            assert!(Configuration::load().is_err());
            Ok(())
        });
    }
}
