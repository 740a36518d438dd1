//! Klipp CLI entry point.

use anyhow::Result;
use clap::Parser;
use klipp::cli::{commands, Cli, Commands};
use klipp::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("klipp={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    match &cli.command {
        Commands::Serve { host, port } => {
            klipp::server::run_serve(host, *port, settings).await?;
        }

        Commands::Scan { process } => {
            commands::run_scan(*process, settings).await?;
        }

        Commands::ProcessPending => {
            commands::run_process_pending(settings).await?;
        }

        Commands::Search { query, top_k, no_fts } => {
            commands::run_search(query, *top_k, !*no_fts, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings).await?;
        }
    }

    Ok(())
}
