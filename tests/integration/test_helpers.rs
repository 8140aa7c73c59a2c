// tests/integration/test_helpers.rs

//! Shared setup for the socket- and coordinator-level integration tests: a
//! fully wired `Coordinator` plus socket server over a temp-directory
//! config, with no real Docker daemon required (container collection simply
//! fails every tick and is skipped, per the coordinator's per-family
//! resilience design).

use odin_agent::config::{CollectConfig, Config, DockerConfig, HostConfig, SocketConfig, StorageConfig};
use odin_agent::core::coordinator::Coordinator;
use odin_agent::core::hub::Hub;
use odin_agent::server;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

pub struct TestAgent {
    pub coordinator: Arc<Coordinator>,
    pub socket_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
    server_stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
    server_task: Option<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

impl TestAgent {
    /// Starts a coordinator (one immediate tick already run, per
    /// `Coordinator::start`) and the socket server, both rooted in a fresh
    /// temp directory. The configured Docker socket path does not exist, so
    /// every tick's container collection fails and is recorded as `None`.
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");

        let config = Config {
            log_level: "warn".to_string(),
            storage: StorageConfig { path: dir.path().join("agent.db"), retention_days: 14 },
            socket: SocketConfig { path: socket_path.clone(), mode: 0o660 },
            host: HostConfig::default(),
            docker: DockerConfig { socket: dir.path().join("no-such-docker.sock"), include: vec![], exclude: vec![] },
            collect: CollectConfig { interval: Duration::from_secs(3600) },
            alerts: vec![],
            notify: Default::default(),
        };

        let hub = Arc::new(Hub::new());
        let coordinator = Coordinator::start(config.clone(), hub).await.expect("coordinator failed to start");

        let (server_stop_tx, server_stop_rx) = tokio::sync::oneshot::channel();
        let server_coordinator = coordinator.clone();
        let socket_config = config.socket.clone();
        let server_task = tokio::spawn(async move { server::run(socket_config, server_coordinator, server_stop_rx).await });

        // Give the listener a beat to bind before a client dials in.
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        TestAgent {
            coordinator,
            socket_path,
            _dir: dir,
            server_stop_tx: Some(server_stop_tx),
            server_task: Some(server_task),
        }
    }

    pub async fn connect(&self) -> Framed<UnixStream, server::protocol::EnvelopeCodec> {
        let stream = UnixStream::connect(&self.socket_path).await.expect("connecting to agent socket");
        Framed::new(stream, server::protocol::EnvelopeCodec)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.server_stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.server_task.take() {
            let _ = task.await;
        }
    }
}
