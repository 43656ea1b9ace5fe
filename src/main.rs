//! editor-relay: open remote `path:line` requests in a local editor
//!
//! Listens on TCP (default port 5555). Each connection carries one command,
//! terminated by the client closing its side:
//!
//! ```text
//! $ printf '/home/me/src/main.c:42' | nc -q0 workstation 5555
//! ```
//!
//! The command is handed to the editor (VS Code by default) as
//! `code -r -g <command>`, reusing the open window.
//!
//! Features:
//! - One task per connection, no response to the client
//! - Configurable editor binary and flags
//! - Idle read timeout and connection cap
//! - Configuration via CLI arguments or TOML file

mod command;
mod config;
mod handler;
mod launcher;
mod server;

use config::Config;
use launcher::EditorLauncher;
use server::Server;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen_addr(),
        editor = %config.launcher.executable,
        reuse_window = config.launcher.reuse_window,
        read_timeout = ?config.read_timeout,
        max_connections = config.max_connections,
        "Starting editor-relay"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers.max(1));
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let launcher = Arc::new(EditorLauncher::new(config.launcher.clone()));

    let server = match Server::bind(&config, launcher) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Could not start listener");
            return Err(e.into());
        }
    };

    server.run(server::shutdown_signal()).await?;
    Ok(())
}
