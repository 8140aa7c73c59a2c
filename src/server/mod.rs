// src/server/mod.rs

//! The Unix-socket streaming server (spec §4.7, §6): binds the listener,
//! accepts connections, and spawns one dispatch task per connection. Runs
//! as a sibling of the `Coordinator`, not owned by it (see
//! `core::coordinator`'s module doc for why).

mod connection;
pub mod protocol;

use crate::config::SocketConfig;
use crate::core::coordinator::Coordinator;
use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Upper bound on simultaneously active connections (spec §4.7). Connections
/// accepted past this bound are closed immediately rather than queued.
const MAX_CONNECTIONS: usize = 64;

/// Binds the socket, then accepts connections until `shutdown_rx` fires.
/// Each accepted connection is dispatched to its own task, gated by a
/// semaphore of [`MAX_CONNECTIONS`] permits; on shutdown we stop accepting
/// and let in-flight connections drain on their own (the peer closing, or a
/// failed write, ends each one).
pub async fn run(config: SocketConfig, coordinator: Arc<Coordinator>, mut shutdown_rx: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
    if config.path.exists() {
        std::fs::remove_file(&config.path)
            .with_context(|| format!("removing stale socket at {}", config.path.display()))?;
    }
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating socket directory {}", parent.display()))?;
    }

    let listener = UnixListener::bind(&config.path).with_context(|| format!("binding socket at {}", config.path.display()))?;
    std::fs::set_permissions(&config.path, std::fs::Permissions::from_mode(config.mode))
        .with_context(|| format!("setting mode on socket at {}", config.path.display()))?;
    info!(path = %config.path.display(), mode = format_args!("{:o}", config.mode), "socket server listening");

    let mut connections = JoinSet::new();
    let permits = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            res = listener.accept() => {
                match res {
                    Ok((stream, _addr)) => {
                        match permits.clone().try_acquire_owned() {
                            Ok(permit) => {
                                let coordinator = coordinator.clone();
                                connections.spawn(async move {
                                    let _permit = permit;
                                    if let Err(err) = connection::handle(stream, coordinator).await {
                                        warn!(error = %err, "connection ended with error");
                                    }
                                });
                            }
                            Err(_) => {
                                warn!(max_connections = MAX_CONNECTIONS, "connection limit reached, closing new connection");
                                drop(stream);
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "failed to accept connection"),
                }
            }
            Some(res) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = res {
                    if err.is_panic() {
                        error!(error = ?err, "connection task panicked");
                    }
                }
            }
        }
    }

    info!("socket server shutting down, closing listener");
    drop(listener);
    let _ = std::fs::remove_file(&config.path);
    connections.shutdown().await;
    Ok(())
}
