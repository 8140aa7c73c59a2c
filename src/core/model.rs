// src/core/model.rs

//! Shared data types that flow between the collector, the store, the alerter
//! and the socket server. Everything here is `Serialize`/`Deserialize` since
//! the same structs are both persisted and streamed over the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single host-wide metric sample (one per collection tick).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostMetrics {
    pub ts: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub swap_percent: f64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

/// A single mountpoint's disk usage at one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskMetrics {
    pub ts: DateTime<Utc>,
    pub mountpoint: String,
    pub disk_percent: f64,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// A single network interface's counters at one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetMetrics {
    pub ts: DateTime<Utc>,
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// The state of a tracked container lifecycle, as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Destroyed,
    Unknown,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Destroyed => "destroyed",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A container's resource usage and identity at one tick, or a sparse
/// identity-only record synthesized from a lifecycle event (see
/// [`crate::core::watcher`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerMetrics {
    pub ts: DateTime<Utc>,
    pub container_id: String,
    pub container_name: String,
    pub project: String,
    pub service: String,
    pub state: ContainerState,
    pub health: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub restart_count: i64,
    pub exit_code: i64,
}

/// The log stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        })
    }
}

/// One parsed log line, ready for storage and fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub container_id: String,
    pub container_name: String,
    pub project: String,
    pub service: String,
    pub stream: LogStream,
    pub raw: String,
    pub level: String,
    pub message: String,
}

/// The full snapshot handed from the Coordinator to the Alerter on each tick.
/// `None` for a family means "collection failed"; `Some(vec![])` means
/// "collection succeeded, nothing present" (see [`crate::core::alerter`]).
#[derive(Debug, Clone, Default)]
pub struct CollectionSnapshot {
    pub host: Option<HostMetrics>,
    pub disks: Option<Vec<DiskMetrics>>,
    pub containers: Option<Vec<ContainerMetrics>>,
}

/// Severity of an alert rule / instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// A persisted alert row, exactly as stored in and read back from the `alerts` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedAlert {
    pub id: i64,
    pub rule_name: String,
    pub severity: Severity,
    pub condition: String,
    pub instance_key: String,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub message: String,
    pub acknowledged: bool,
}

/// State of an in-flight alert instance transition, used on the wire and as a
/// callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTransition {
    Firing,
    Resolved,
}

/// An `alert:event` envelope body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub state: AlertTransition,
    pub alert: PersistedAlert,
}

/// A lifecycle transition reported by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Create,
    Start,
    Die,
    Stop,
    Kill,
    Restart,
    Pause,
    Unpause,
    Destroy,
    Other,
}

/// A raw container lifecycle event from the runtime client, after the
/// `"exec_...: ..."` action-string normalization described in the event
/// watcher's contract.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub ts: DateTime<Utc>,
    pub action: LifecycleAction,
    pub container_id: String,
    pub container_name: String,
}

/// A `container:event` envelope body, published on the Hub after the watcher
/// updates its cached view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerEventBody {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub container_id: String,
    pub container_name: String,
    pub state: ContainerState,
}

/// A `(kind, name)` pair naming a tracking-state entry: either a single
/// container id or a whole compose project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingKind {
    Container,
    Project,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub kind: TrackingKind,
    pub name: String,
    pub tracked: bool,
}

/// The full tracking state: which containers/projects are explicitly
/// included or excluded from collection and alerting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingState {
    pub entries: BTreeSet<TrackingEntry>,
}

/// A `metrics:update` envelope body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricsUpdate {
    pub host: Option<HostMetrics>,
    pub disks: Vec<DiskMetrics>,
    pub networks: Vec<NetMetrics>,
    pub containers: Vec<ContainerMetrics>,
}
