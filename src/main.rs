use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use tokio_util::sync::CancellationToken;

mod replay;

#[derive(Parser)]
#[command(name = "signalscrape")]
#[command(about = "signalscrape - Prometheus scrape to OTLP metrics receiver")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: SignalScrapeCommands,
}

#[derive(Subcommand)]
enum SignalScrapeCommands {
    /// Replay recorded scrapes through the receiver
    Replay {
        /// JSON scrape dumps, replayed in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = utils::load_config(cli.common.config.as_ref())?;
    utils::init_logging(&cli.common, &config);

    match cli.command {
        SignalScrapeCommands::Common(ref command) => utils::handle_common_command(command, &config),
        SignalScrapeCommands::Replay { ref files } => {
            log::info!("Replaying {} scrape dump(s)", files.len());
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupt received, stopping replay");
                    on_signal.cancel();
                }
            });

            replay::run(&config, files, cancel).await
        }
    }
}
