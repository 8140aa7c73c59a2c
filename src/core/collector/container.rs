// src/core/collector/container.rs

//! The container-runtime client: a narrow trait the rest of the agent
//! depends on, plus a concrete implementation against the Docker Engine API
//! over its Unix socket (spec.md explicitly scopes the runtime integration
//! itself out as "narrow interface, not deeply modeled").

use super::docker_http::{DockerSocket, FrameDemuxer, JsonStreamDemuxer};
use crate::core::errors::AgentResult;
use crate::core::model::{ContainerMetrics, ContainerState, LifecycleAction, LogStream};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists every container (running or not), with best-effort cpu/memory
    /// sampling for running ones.
    async fn list_containers(&self) -> AgentResult<Vec<ContainerMetrics>>;

    /// Fetches a fresh identity+state record for one container; used by the
    /// event watcher to refresh its cached view after a lifecycle event.
    async fn inspect(&self, id: &str) -> AgentResult<Option<ContainerMetrics>>;

    /// Opens the `container`-typed lifecycle event stream.
    async fn open_events(&self) -> AgentResult<DockerEventStream>;

    /// Opens the combined stdout+stderr log stream for one container.
    async fn open_logs(&self, id: &str, since: chrono::DateTime<Utc>) -> AgentResult<DockerLogStream>;

    /// Restarts a container. Returns `AgentError::NotFound` if it doesn't exist.
    async fn restart(&self, id: &str) -> AgentResult<()>;
}

pub struct DockerRuntime {
    socket: DockerSocket,
}

impl DockerRuntime {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        DockerRuntime { socket: DockerSocket::new(socket_path) }
    }
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawInspect {
    #[serde(rename = "RestartCount", default)]
    restart_count: i64,
    #[serde(rename = "State")]
    state: RawInspectState,
    #[serde(rename = "Config", default)]
    config: Option<RawInspectConfig>,
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawInspectConfig {
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawInspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
    #[serde(rename = "Health", default)]
    health: Option<RawHealth>,
}

#[derive(Debug, Deserialize)]
struct RawHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawStats {
    #[serde(rename = "cpu_stats")]
    cpu_stats: RawCpuStats,
    #[serde(rename = "precpu_stats")]
    precpu_stats: RawCpuStats,
    #[serde(rename = "memory_stats", default)]
    memory_stats: RawMemStats,
}

#[derive(Debug, Deserialize, Default)]
struct RawCpuStats {
    #[serde(rename = "cpu_usage", default)]
    cpu_usage: RawCpuUsage,
    #[serde(rename = "system_cpu_usage", default)]
    system_cpu_usage: u64,
    #[serde(rename = "online_cpus", default)]
    online_cpus: u64,
}

#[derive(Debug, Deserialize, Default)]
struct RawCpuUsage {
    #[serde(rename = "total_usage", default)]
    total_usage: u64,
}

#[derive(Debug, Deserialize, Default)]
struct RawMemStats {
    #[serde(rename = "usage", default)]
    usage: u64,
    #[serde(rename = "limit", default)]
    limit: u64,
}

fn parse_state(s: &str) -> ContainerState {
    match s {
        "created" => ContainerState::Created,
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "restarting" => ContainerState::Restarting,
        "removing" | "exited" | "dead" => ContainerState::Exited,
        _ => ContainerState::Unknown,
    }
}

fn compose_project_service(labels: &HashMap<String, String>) -> (String, String) {
    (
        labels.get("com.docker.compose.project").cloned().unwrap_or_default(),
        labels.get("com.docker.compose.service").cloned().unwrap_or_default(),
    )
}

fn cpu_percent(stats: &RawStats) -> f64 {
    let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64 - stats.precpu_stats.cpu_usage.total_usage as f64;
    let system_delta = stats.cpu_stats.system_cpu_usage as f64 - stats.precpu_stats.system_cpu_usage as f64;
    if cpu_delta > 0.0 && system_delta > 0.0 {
        let online_cpus = if stats.cpu_stats.online_cpus > 0 { stats.cpu_stats.online_cpus as f64 } else { 1.0 };
        (cpu_delta / system_delta) * online_cpus * 100.0
    } else {
        0.0
    }
}

fn memory_percent(stats: &RawStats) -> f64 {
    if stats.memory_stats.limit > 0 {
        stats.memory_stats.usage as f64 / stats.memory_stats.limit as f64 * 100.0
    } else {
        0.0
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> AgentResult<Vec<ContainerMetrics>> {
        let summaries: Vec<RawSummary> = self.socket.get_json("/containers/json?all=true").await?;
        let mut out = Vec::with_capacity(summaries.len());
        for s in summaries {
            let (project, service) = compose_project_service(&s.labels);
            let state = parse_state(&s.state);
            let (cpu_percent, memory_percent) = if state == ContainerState::Running {
                match self.socket.get_json::<RawStats>(&format!("/containers/{}/stats?stream=false", s.id)).await {
                    Ok(stats) => (cpu_percent(&stats), memory_percent(&stats)),
                    Err(_) => (0.0, 0.0),
                }
            } else {
                (0.0, 0.0)
            };
            let inspect: Option<RawInspect> = self.socket.get_json(&format!("/containers/{}/json", s.id)).await.ok();
            let (health, exit_code, restart_count) = inspect
                .map(|i| {
                    (
                        i.state.health.map(|h| h.status).unwrap_or_default(),
                        i.state.exit_code,
                        i.restart_count,
                    )
                })
                .unwrap_or_default();

            out.push(ContainerMetrics {
                ts: Utc::now(),
                container_id: s.id,
                container_name: s.names.first().map(|n| n.trim_start_matches('/').to_string()).unwrap_or_default(),
                project,
                service,
                state,
                health,
                cpu_percent,
                memory_percent,
                restart_count,
                exit_code,
            });
        }
        Ok(out)
    }

    async fn inspect(&self, id: &str) -> AgentResult<Option<ContainerMetrics>> {
        let inspect: Option<RawInspect> = self.socket.get_json(&format!("/containers/{id}/json")).await.ok();
        Ok(inspect.map(|i| {
            let (project, service) = i.config.map(|c| compose_project_service(&c.labels)).unwrap_or_default();
            ContainerMetrics {
                ts: Utc::now(),
                container_id: id.to_string(),
                container_name: i.name.trim_start_matches('/').to_string(),
                project,
                service,
                state: parse_state(&i.state.status),
                health: i.state.health.map(|h| h.status).unwrap_or_default(),
                cpu_percent: 0.0,
                memory_percent: 0.0,
                restart_count: i.restart_count,
                exit_code: i.state.exit_code,
            }
        }))
    }

    async fn open_events(&self) -> AgentResult<DockerEventStream> {
        let filters = serde_json::json!({ "type": ["container"] }).to_string();
        let query = format!("/events?filters={}", urlencoding_component(&filters));
        let reader = self.socket.get_stream(&query).await?;
        Ok(DockerEventStream { demux: JsonStreamDemuxer::new(reader) })
    }

    async fn open_logs(&self, id: &str, since: chrono::DateTime<Utc>) -> AgentResult<DockerLogStream> {
        let query = format!(
            "/containers/{id}/logs?stdout=true&stderr=true&follow=true&timestamps=false&since={}",
            since.timestamp()
        );
        let reader = self.socket.get_stream(&query).await?;
        Ok(DockerLogStream { demux: FrameDemuxer::new(reader) })
    }

    async fn restart(&self, id: &str) -> AgentResult<()> {
        let status = self.socket.post_empty(&format!("/containers/{id}/restart?t=10")).await?;
        match status {
            204 | 304 => Ok(()),
            404 => Err(crate::core::errors::AgentError::NotFound),
            other => Err(crate::core::errors::AgentError::Runtime(format!("restart failed with status {other}"))),
        }
    }
}

/// Percent-encodes the small set of characters that appear in our own JSON
/// query filters; not a general-purpose URL encoder.
fn urlencoding_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: RawActor,
    #[serde(rename = "time", default)]
    time: i64,
}

#[derive(Debug, Deserialize, Default)]
struct RawActor {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

pub struct DockerEventStream {
    demux: JsonStreamDemuxer<RawEvent>,
}

impl DockerEventStream {
    pub async fn next_event(&mut self) -> AgentResult<Option<crate::core::model::ContainerEvent>> {
        loop {
            let Some(raw) = self.demux.next_value().await? else {
                return Ok(None);
            };
            let action_str = raw.action.split(':').next().unwrap_or(&raw.action);
            let action = match action_str {
                "create" => LifecycleAction::Create,
                "start" => LifecycleAction::Start,
                "die" => LifecycleAction::Die,
                "stop" => LifecycleAction::Stop,
                "kill" => LifecycleAction::Kill,
                "restart" => LifecycleAction::Restart,
                "pause" => LifecycleAction::Pause,
                "unpause" => LifecycleAction::Unpause,
                "destroy" => LifecycleAction::Destroy,
                _ => LifecycleAction::Other,
            };
            let name = raw.actor.attributes.get("name").cloned().unwrap_or_default();
            return Ok(Some(crate::core::model::ContainerEvent {
                ts: chrono::DateTime::from_timestamp(raw.time, 0).unwrap_or_else(Utc::now),
                action,
                container_id: truncate(&raw.actor.id, 128),
                container_name: truncate(&name, 256),
            }));
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max { s.to_string() } else { s[..max].to_string() }
}

pub struct DockerLogStream {
    demux: FrameDemuxer,
}

impl DockerLogStream {
    /// Returns the next demuxed `(stream, raw line bytes)` pair. Docker
    /// frames don't align with lines, so callers accumulate across calls.
    pub async fn next_frame(&mut self) -> AgentResult<Option<(LogStream, Vec<u8>)>> {
        let Some((stream_id, payload)) = self.demux.next_frame().await? else {
            return Ok(None);
        };
        let stream = if stream_id == 2 { LogStream::Stderr } else { LogStream::Stdout };
        Ok(Some((stream, payload)))
    }
}
