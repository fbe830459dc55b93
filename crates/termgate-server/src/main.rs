//! termgate server binary entry point.
//!
//! Serves the built-in `show_terminal` handler.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use termgate_core::CredentialStore;
use termgate_server::{Cli, Listener, show_terminal};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = termgate_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "termgate-server starting");

    if let Err(e) = run(cli).await {
        error!(error = %e, "Server failed");
        eprintln!("Error starting server: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> termgate_core::Result<()> {
    let credentials = CredentialStore::load(&cli.key_file, cli.cert_file.as_deref(), &cli.ca_file)?;
    let listener = Listener::bind(cli.listener_config(), Arc::new(credentials)).await?;
    listener.serve(show_terminal, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Interrupt received");
}
