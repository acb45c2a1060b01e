use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared by the signalscrape binaries
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that only inspect the configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Filter directive derived from the CLI flags, falling back to the
    /// configured level
    pub fn log_level<'a>(args: &CommonArgs, config: &'a Configuration) -> &'a str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs, config: &Configuration) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args, config)));

        // A subscriber may already be installed, e.g. by a test harness
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("signalscrape configuration:");
            println!("===========================");
            println!("Receiver name: {}", config.receiver.name);
            println!(
                "Use start time metric: {}",
                config.receiver.use_start_time_metric
            );
            if let Some(regex) = &config.receiver.start_time_metric_regex {
                println!("Start time metric regex: {regex}");
            }
            println!("Reset policy: {:?}", config.receiver.reset_policy);
            for (name, value) in &config.receiver.external_labels {
                println!("External label: {name}={value}");
            }
            println!("Log level: {}", config.logging.level);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.receiver.name.is_empty() {
            anyhow::bail!("Receiver name cannot be empty");
        }

        if !config.receiver.use_start_time_metric
            && config.receiver.start_time_metric_regex.is_some()
        {
            log::warn!("start_time_metric_regex is ignored unless use_start_time_metric is set");
        }

        for name in config.receiver.external_labels.keys() {
            if name.is_empty() || name.starts_with("__") {
                anyhow::bail!("Invalid external label name: {name:?}");
            }
        }

        if EnvFilter::try_new(&config.logging.level).is_err() {
            anyhow::bail!("Invalid log level: {}", config.logging.level);
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't require running the receiver
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_log_level_flags() {
        let config = Configuration::default();

        let quiet = CommonArgs {
            quiet: true,
            ..Default::default()
        };
        assert_eq!(utils::log_level(&quiet, &config), "warn");

        let verbose = CommonArgs {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(utils::log_level(&verbose, &config), "debug");

        assert_eq!(utils::log_level(&CommonArgs::default(), &config), "info");
    }

    #[test]
    fn test_validate_config() {
        let mut config = Configuration::default();
        assert!(utils::validate_config(&config).is_ok());

        config
            .receiver
            .external_labels
            .insert("__reserved".to_string(), "x".to_string());
        assert!(utils::validate_config(&config).is_err());

        let mut config = Configuration::default();
        config.receiver.name.clear();
        assert!(utils::validate_config(&config).is_err());
    }
}
