// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! CLI relay server binary

use clap::Parser;
use relay_bridge::{Orchestrator, SessionStore};
use relay_logging::CliLoggingArgs;
use relay_server::config::default_store_path;
use relay_server::{AppState, RelayConfig, Server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a stream-json CLI as an SSE message API", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address for the server
    #[arg(short, long, env = "RELAY_BIND")]
    bind: Option<SocketAddr>,

    /// CLI binary to invoke
    #[arg(long, env = "RELAY_CLI_BINARY")]
    cli_binary: Option<String>,

    /// Session store file
    #[arg(long, env = "RELAY_STORE_PATH")]
    store_path: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

impl Args {
    /// Config file contents with flag overrides applied
    fn resolve(&self) -> anyhow::Result<RelayConfig> {
        let mut config = RelayConfig::load(self.config.as_deref())?;
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(binary) = &self.cli_binary {
            config.bridge.cli.binary = binary.clone();
        }
        if let Some(path) = &self.store_path {
            config.bridge.sessions.store_path = Some(path.clone());
        }
        if config.bridge.sessions.store_path.is_none() {
            config.bridge.sessions.store_path = default_store_path();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.resolve()?;
    args.logging.init("relay-server")?;

    info!(
        bind = %config.bind,
        binary = %config.bridge.cli.binary,
        store = ?config.bridge.sessions.store_path,
        "Starting relay server"
    );

    let sessions = Arc::new(SessionStore::from_config(&config.bridge.sessions));
    if let Err(e) = sessions.restore().await {
        warn!(error = %e, "Could not restore sessions; starting empty");
    }

    let shutdown = CancellationToken::new();
    let maintenance = Arc::clone(&sessions).spawn_maintenance(
        config.bridge.sessions.sweep_interval(),
        config.bridge.sessions.save_interval(),
        shutdown.clone(),
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    let state = AppState::new(Orchestrator::from_config(&config.bridge, sessions));
    let result = Server::new(config.bind, state).run(shutdown.clone()).await;

    shutdown.cancel();
    maintenance.await?;
    result?;
    Ok(())
}
