// src/core/watcher.rs

//! The event watcher (spec §4.5): a long-lived task consuming the runtime's
//! filtered lifecycle event stream, reconnecting with backoff, keeping a
//! small cached view of each container's identity/state, and fanning events
//! out to the alerter and the Hub.

use crate::core::alerter::SharedAlerter;
use crate::core::collector::ContainerRuntime;
use crate::core::hub::{Hub, Topic};
use crate::core::model::{ContainerEventBody, ContainerMetrics, ContainerState, LifecycleAction};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct EventWatcher {
    runtime: Arc<dyn ContainerRuntime>,
    alerter: SharedAlerter,
    hub: Arc<Hub>,
    cache: Mutex<HashMap<String, ContainerMetrics>>,
}

impl EventWatcher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, alerter: SharedAlerter, hub: Arc<Hub>) -> Self {
        EventWatcher { runtime, alerter, hub, cache: Mutex::new(HashMap::new()) }
    }

    /// Runs until `stop_rx` fires, reconnecting on stream end/error with
    /// exponential backoff (1s initial, doubling, capped at 30s); a
    /// connection that stayed healthy longer than the cap resets backoff to
    /// its initial value before the next failure.
    pub async fn run(&self, mut stop_rx: oneshot::Receiver<()>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if stop_rx.try_recv().is_ok() {
                return;
            }

            let connect_result = tokio::select! {
                biased;
                _ = &mut stop_rx => return,
                r = self.runtime.open_events() => r,
            };

            match connect_result {
                Ok(mut stream) => {
                    let connected_at = tokio::time::Instant::now();
                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = &mut stop_rx => return,
                            r = stream.next_event() => r,
                        };
                        match next {
                            Ok(Some(event)) => self.handle_event(event).await,
                            Ok(None) => break,
                            Err(err) => {
                                tracing::warn!(error = %err, "event stream error");
                                break;
                            }
                        }
                    }
                    backoff = if connected_at.elapsed() > MAX_BACKOFF {
                        INITIAL_BACKOFF
                    } else {
                        (backoff * 2).min(MAX_BACKOFF)
                    };
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to open event stream");
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }

            tokio::select! {
                biased;
                _ = &mut stop_rx => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn handle_event(&self, event: crate::core::model::ContainerEvent) {
        let state = match event.action {
            LifecycleAction::Create => ContainerState::Created,
            LifecycleAction::Start | LifecycleAction::Unpause => ContainerState::Running,
            LifecycleAction::Die | LifecycleAction::Stop | LifecycleAction::Kill => ContainerState::Exited,
            LifecycleAction::Restart => ContainerState::Restarting,
            LifecycleAction::Pause => ContainerState::Paused,
            LifecycleAction::Destroy => ContainerState::Destroyed,
            // Not in the fixed action→state table; nothing to update or publish.
            LifecycleAction::Other => return,
        };

        let mut cache = self.cache.lock().await;
        if state == ContainerState::Destroyed && !cache.contains_key(&event.container_id) {
            return;
        }

        let mut metrics = cache.get(&event.container_id).cloned().unwrap_or_else(|| ContainerMetrics {
            ts: event.ts,
            container_id: event.container_id.clone(),
            container_name: event.container_name.clone(),
            project: String::new(),
            service: String::new(),
            state,
            health: String::new(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            restart_count: 0,
            exit_code: 0,
        });
        metrics.ts = event.ts;
        metrics.state = state;

        if state == ContainerState::Destroyed {
            cache.remove(&event.container_id);
        } else {
            if let Ok(Some(fresh)) = self.runtime.inspect(&event.container_id).await {
                metrics.health = fresh.health;
                metrics.project = fresh.project;
                metrics.service = fresh.service;
                metrics.container_name = fresh.container_name;
                metrics.restart_count = fresh.restart_count;
                metrics.exit_code = fresh.exit_code;
            }
            cache.insert(event.container_id.clone(), metrics.clone());
        }
        drop(cache);

        let alerter = self.alerter.read().clone();
        if let Err(err) = alerter.evaluate_container_event(&metrics).await {
            tracing::warn!(error = %err, "alert evaluation failed for container event");
        }

        self.hub.publish(
            Topic::Containers,
            &ContainerEventBody {
                ts: event.ts,
                action: format!("{:?}", event.action).to_ascii_lowercase(),
                container_id: metrics.container_id.clone(),
                container_name: metrics.container_name.clone(),
                state,
            },
        );
    }
}
