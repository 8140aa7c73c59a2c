// src/core/tailer.rs

//! The log tailer (spec §4.6): one background task per tracked container,
//! demuxing the runtime's combined stdout/stderr stream, parsing lines into
//! [`LogEntry`] records, and batching them into the store.

use crate::core::collector::ContainerRuntime;
use crate::core::model::{ContainerMetrics, LogEntry, LogStream};
use crate::core::store::Store;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

/// Max entries accumulated before an eager flush.
const LOG_BATCH: usize = 100;
/// Flush cadence when the batch hasn't filled up.
const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Scanner buffer ceiling; a line exceeding this is dropped rather than
/// grown without bound (characterization behavior per spec §4.6).
const MAX_LINE_BYTES: usize = 64 * 1024;

pub type LogEntryCallback = Arc<dyn Fn(LogEntry) + Send + Sync>;

struct TailTask {
    stop_tx: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

pub struct LogTailer {
    runtime: Arc<dyn ContainerRuntime>,
    store: Store,
    on_entry: Option<LogEntryCallback>,
    tasks: Mutex<HashMap<String, TailTask>>,
}

impl LogTailer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, store: Store, on_entry: Option<LogEntryCallback>) -> Self {
        LogTailer { runtime, store, on_entry, tasks: Mutex::new(HashMap::new()) }
    }

    /// Diffs `containers` against the active tail set: starts a task for
    /// each newly-tracked container, stops and drains each one no longer
    /// present.
    pub async fn sync(&self, containers: &[ContainerMetrics]) {
        let mut tasks = self.tasks.lock().await;

        for c in containers {
            if !tasks.contains_key(&c.container_id) {
                let (stop_tx, stop_rx) = oneshot::channel();
                let handle = tokio::spawn(Self::tail_loop(
                    self.runtime.clone(),
                    self.store.clone(),
                    self.on_entry.clone(),
                    c.clone(),
                    stop_rx,
                ));
                tasks.insert(c.container_id.clone(), TailTask { stop_tx, handle });
            }
        }

        let wanted: HashSet<&str> = containers.iter().map(|c| c.container_id.as_str()).collect();
        let stale: Vec<String> = tasks.keys().filter(|id| !wanted.contains(id.as_str())).cloned().collect();
        for id in stale {
            if let Some(task) = tasks.remove(&id) {
                let _ = task.stop_tx.send(());
                let _ = task.handle.await;
            }
        }
    }

    /// Cancels every tail task and waits for its final batch to flush.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, task) in tasks.drain() {
            let _ = task.stop_tx.send(());
            let _ = task.handle.await;
        }
    }

    async fn tail_loop(
        runtime: Arc<dyn ContainerRuntime>,
        store: Store,
        on_entry: Option<LogEntryCallback>,
        container: ContainerMetrics,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut stream = match runtime.open_logs(&container.container_id, Utc::now()).await {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(container_id = %container.container_id, error = %err, "failed to open log stream");
                return;
            }
        };

        let mut batch: Vec<LogEntry> = Vec::new();
        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut stderr_buf: Vec<u8> = Vec::new();
        let mut flush_tick = tokio::time::interval(LOG_FLUSH_INTERVAL);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                frame = stream.next_frame() => {
                    match frame {
                        Ok(Some((stream_kind, payload))) => {
                            let buf = match stream_kind {
                                LogStream::Stdout => &mut stdout_buf,
                                LogStream::Stderr => &mut stderr_buf,
                            };
                            buf.extend_from_slice(&payload);
                            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                                let raw_bytes: Vec<u8> = buf.drain(..=pos).collect();
                                let line = String::from_utf8_lossy(&raw_bytes[..raw_bytes.len() - 1]).into_owned();
                                if let Some(entry) = parse_log_line(&container, stream_kind, &line) {
                                    batch.push(entry);
                                    if batch.len() >= LOG_BATCH {
                                        Self::flush(&store, &on_entry, &mut batch).await;
                                    }
                                }
                            }
                            if buf.len() > MAX_LINE_BYTES {
                                buf.clear();
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(container_id = %container.container_id, error = %err, "log stream ended with error");
                            break;
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    Self::flush(&store, &on_entry, &mut batch).await;
                }
            }
        }

        Self::flush(&store, &on_entry, &mut batch).await;
    }

    async fn flush(store: &Store, on_entry: &Option<LogEntryCallback>, batch: &mut Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        let entries = std::mem::take(batch);
        if let Some(cb) = on_entry {
            for entry in &entries {
                cb(entry.clone());
            }
        }
        if let Err(err) = store.insert_log_entries(entries).await {
            tracing::warn!(error = %err, "failed to persist log batch");
        }
    }
}

fn parse_log_line(container: &ContainerMetrics, stream: LogStream, raw: &str) -> Option<LogEntry> {
    if raw.is_empty() {
        return None;
    }
    let (ts, rest) = match raw.split_once(' ') {
        Some((maybe_ts, rest)) => match chrono::DateTime::parse_from_rfc3339(maybe_ts) {
            Ok(parsed) => (parsed.with_timezone(&Utc), rest),
            Err(_) => (Utc::now(), raw),
        },
        None => (Utc::now(), raw),
    };
    let (level, message) = extract_level_and_message(rest);
    Some(LogEntry {
        ts,
        container_id: container.container_id.clone(),
        container_name: container.container_name.clone(),
        project: container.project.clone(),
        service: container.service.clone(),
        stream,
        raw: raw.to_string(),
        level,
        message,
    })
}

/// Best-effort level/message extraction: structured JSON (`level`/`msg`/
/// `message` fields), then `[LEVEL] ...` or `level=LEVEL ...` prefixes, else
/// the whole line is the message with no level.
fn extract_level_and_message(rest: &str) -> (String, String) {
    if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(rest) {
        let level = obj.get("level").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let message = obj
            .get("msg")
            .or_else(|| obj.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or(rest)
            .to_string();
        return (level, message);
    }
    if let Some(stripped) = rest.strip_prefix('[')
        && let Some(end) = stripped.find(']')
    {
        return (stripped[..end].to_string(), stripped[end + 1..].trim_start().to_string());
    }
    if let Some(rest2) = rest.strip_prefix("level=")
        && let Some(end) = rest2.find(' ')
    {
        return (rest2[..end].to_string(), rest2[end + 1..].to_string());
    }
    (String::new(), rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> ContainerMetrics {
        ContainerMetrics {
            ts: Utc::now(),
            container_id: "abc".to_string(),
            container_name: "svc".to_string(),
            project: "proj".to_string(),
            service: "svc".to_string(),
            state: crate::core::model::ContainerState::Running,
            health: String::new(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            restart_count: 0,
            exit_code: 0,
        }
    }

    #[test]
    fn parses_json_level_and_message() {
        let c = container();
        let entry = parse_log_line(&c, LogStream::Stdout, r#"2024-01-01T00:00:00.000000000Z {"level":"error","msg":"boom"}"#).unwrap();
        assert_eq!(entry.level, "error");
        assert_eq!(entry.message, "boom");
    }

    #[test]
    fn parses_bracket_prefix() {
        let c = container();
        let entry = parse_log_line(&c, LogStream::Stdout, "2024-01-01T00:00:00.000000000Z [ERROR] disk full").unwrap();
        assert_eq!(entry.level, "ERROR");
        assert_eq!(entry.message, "disk full");
    }

    #[test]
    fn falls_back_to_whole_line() {
        let c = container();
        let entry = parse_log_line(&c, LogStream::Stdout, "plain line, no structure").unwrap();
        assert_eq!(entry.level, "");
        assert_eq!(entry.message, "plain line, no structure");
    }
}
