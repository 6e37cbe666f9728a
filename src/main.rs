//! ClipSlot - clipboard routing across machines, slots and peers
//!
//! This is the command line entry point.

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipslot::cli::{Cli, CliHandler, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut handler = CliHandler::new(cli.config.clone())?;

    // Initialize logging on stderr so stdout stays clean for paste and peek
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        handler.config().log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("clipslot={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("ClipSlot v{}", clipslot::VERSION);

    // Only watch traps Ctrl-C; everything else keeps the default behaviour
    if matches!(cli.command, Commands::Watch { .. }) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });
        handler = handler.with_shutdown(shutdown_rx);
    }

    handler.handle_command(cli.command).await?;

    Ok(())
}
