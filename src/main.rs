// src/main.rs

//! Entry point: parses the small CLI surface, loads and validates config,
//! wires up logging, then starts the coordinator and socket server as
//! siblings and waits for a shutdown signal.

use anyhow::{Context, Result};
use odin_agent::config::Config;
use odin_agent::core::coordinator::Coordinator;
use odin_agent::core::hub::Hub;
use odin_agent::server;
use std::env;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("odin-agent version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt().with_env_filter(log_level).compact().with_ansi(true).init();

    if let Err(err) = run(config).await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let hub = Arc::new(Hub::new());
    let coordinator = Coordinator::start(config.clone(), hub).await.context("starting coordinator")?;

    let coordinator_shutdown = coordinator.clone();
    let (coordinator_stop_tx, coordinator_stop_rx) = tokio::sync::oneshot::channel();
    let coordinator_task = tokio::spawn(async move { coordinator_shutdown.run(coordinator_stop_rx).await });

    let (server_stop_tx, server_stop_rx) = tokio::sync::oneshot::channel();
    let server_coordinator = coordinator.clone();
    let socket_config = config.socket.clone();
    let server_task = tokio::spawn(async move { server::run(socket_config, server_coordinator, server_stop_rx).await });

    await_shutdown_signal().await;
    info!("shutdown signal received, stopping coordinator and socket server");

    let _ = coordinator_stop_tx.send(());
    let _ = server_stop_tx.send(());

    if let Err(err) = coordinator_task.await {
        error!(error = ?err, "coordinator task panicked");
    }
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "socket server exited with error"),
        Err(err) => error!(error = ?err, "socket server task panicked"),
    }

    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn await_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn await_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl-C");
}
