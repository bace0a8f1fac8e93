//! webmon Entry Point

use clap::Parser;
use tracing::{error, info};
use webmon::cli::{consume, produce, Cli, Commands};
use webmon::shutdown::{self, ShutdownController};
use webmon::logging;
use webmon_common::config::load_settings_for;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_settings_for(cli.config.as_deref(), &cli.env) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let guard = match logging::init(cli.debug) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = ShutdownController::default();
    let signals = tokio::spawn(shutdown::watch_signals(shutdown.clone()));

    let result = match &cli.command {
        Commands::Produce(args) => produce::execute(args, &settings, shutdown.clone())
            .await
            .map(|summary| {
                info!(
                    published = summary.published,
                    dropped = summary.dropped,
                    "Produce finished"
                )
            }),
        Commands::Consume(args) => consume::execute(args, &settings, shutdown.clone())
            .await
            .map(|summary| info!(inserted = summary.inserted, "Consume finished")),
    };

    shutdown.request_shutdown();
    let _ = signals.await;

    if let Err(e) = result {
        error!("{}", e);
        drop(guard);
        std::process::exit(1);
    }
}
