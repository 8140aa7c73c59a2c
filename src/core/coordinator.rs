// src/core/coordinator.rs

//! Owns the tick loop and the startup/reload/shutdown choreography (spec
//! §4.8). Structurally grounded on the teacher's `server::initialization`
//! (phased startup: open resources, wire components, start background
//! tasks) and `server::connection_loop` (the shutdown sequence: signal →
//! wait tasks → final flush → close).
//!
//! The socket server (spec §4.7) is wired up and run alongside this
//! coordinator by `main.rs` rather than owned by it: nesting the listener
//! in here would put a `core -> server` dependency edge in a crate that
//! otherwise only flows `server -> core`, so the two long-lived components
//! are siblings started from the same place instead.

use crate::config::{AlertRuleConfig, Config, DockerConfig, NotifyConfig};
use crate::core::alerter::rule::{Action, AlertRule, RuleSpec};
use crate::core::alerter::{Alerter, SharedAlerter, StateChangeCallback};
use crate::core::collector::{ContainerRuntime, DockerRuntime, HostCollector};
use crate::core::errors::{AgentError, AgentResult};
use crate::core::hub::{Hub, Topic};
use crate::core::model::{AlertEvent, CollectionSnapshot, ContainerMetrics, MetricsUpdate, TrackingState};
use crate::core::notifier::{Notifier, NotifierConfig, SmtpChannel, WebhookChannel};
use crate::core::store::Store;
use crate::core::tailer::LogTailer;
use crate::core::watcher::EventWatcher;
use chrono::{DateTime, Utc};
use parking_lot::RwLock as SyncRwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot, watch};
use wildmatch::WildMatch;

/// Minimum spacing between prune passes; checked, not slept on, from inside
/// `tick`.
const PRUNE_INTERVAL: chrono::Duration = chrono::Duration::hours(1);

pub struct Coordinator {
    config: tokio::sync::RwLock<Config>,
    store: Store,
    hub: Arc<Hub>,
    notifier: SyncRwLock<Arc<Notifier>>,
    alerter: SharedAlerter,
    runtime: Arc<dyn ContainerRuntime>,
    tailer: Arc<LogTailer>,
    watcher: Arc<EventWatcher>,
    watcher_stop: Mutex<Option<oneshot::Sender<()>>>,
    watcher_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    host_collector: Mutex<HostCollector>,
    last_prune: Mutex<DateTime<Utc>>,
    reload_tx: watch::Sender<Config>,
    reload_rx: Mutex<watch::Receiver<Config>>,
}

impl Coordinator {
    /// Runs the full startup sequence from spec §4.8: opens the store,
    /// constructs every component, starts the event watcher, adopts
    /// persisted unresolved alerts, then performs one immediate collection
    /// before returning. The returned coordinator is ready for `run`.
    pub async fn start(config: Config, hub: Arc<Hub>) -> AgentResult<Arc<Coordinator>> {
        let store = Store::open(&config.storage.path).await?;
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(config.docker.socket.clone()));

        let notifier = Arc::new(build_notifier(&config.notify)?);
        let rules = compile_rules(&config.alerts)?;
        let alerter = Arc::new(Alerter::new(store.clone(), notifier.clone(), rules, make_state_change_callback(hub.clone())));
        let shared_alerter: SharedAlerter = Arc::new(SyncRwLock::new(alerter));

        let tailer = Arc::new(LogTailer::new(runtime.clone(), store.clone(), Some(make_log_entry_callback(hub.clone()))));
        let watcher = Arc::new(EventWatcher::new(runtime.clone(), shared_alerter.clone(), hub.clone()));

        let (watcher_stop_tx, watcher_stop_rx) = oneshot::channel();
        let watcher_for_task = watcher.clone();
        let watcher_handle = tokio::spawn(async move { watcher_for_task.run(watcher_stop_rx).await });

        shared_alerter.read().clone().adopt().await?;

        let (reload_tx, reload_rx) = watch::channel(config.clone());

        let coordinator = Arc::new(Coordinator {
            config: tokio::sync::RwLock::new(config),
            store,
            hub,
            notifier: SyncRwLock::new(notifier),
            alerter: shared_alerter,
            runtime,
            tailer,
            watcher,
            watcher_stop: Mutex::new(Some(watcher_stop_tx)),
            watcher_handle: Mutex::new(Some(watcher_handle)),
            host_collector: Mutex::new(HostCollector::new()),
            last_prune: Mutex::new(Utc::now()),
            reload_tx,
            reload_rx: Mutex::new(reload_rx),
        });

        coordinator.tick().await?;
        Ok(coordinator)
    }

    /// A channel handle for requesting configuration reloads. Concurrent
    /// requests coalesce: `watch` only ever retains the latest value, so a
    /// burst of `request_reload` calls before `run`'s loop gets to them
    /// collapses to the most recent one.
    pub fn reload_handle(&self) -> watch::Sender<Config> {
        self.reload_tx.clone()
    }

    /// The tick | reload | shutdown loop. Runs until `shutdown_rx` fires,
    /// then performs the full shutdown sequence before returning.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        let interval_dur = self.config.read().await.collect.interval;
        let mut interval = tokio::time::interval(interval_dur);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut reload_rx = self.reload_rx.lock().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::warn!(error = %err, "coordinator tick failed");
                    }
                }
                changed = reload_rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped (coordinator is being replaced/shut
                        // down elsewhere); keep ticking until shutdown.
                        continue;
                    }
                    let new_config = reload_rx.borrow_and_update().clone();
                    self.apply_reload(new_config, &mut interval).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// One collection cycle: sample host/disk/net, list+filter containers,
    /// persist all of it, sync log tailers, run alert evaluation, publish
    /// the metrics update, and prune if due. Ordering matches spec §5:
    /// host-family inserts precede container-family inserts, which precede
    /// evaluation, which precedes the Hub publish.
    async fn tick(&self) -> AgentResult<()> {
        let now = Utc::now();
        let config = self.config.read().await.clone();

        let (host, disks, networks) = {
            let mut hc = self.host_collector.lock().await;
            (hc.sample_host(), hc.sample_disks(), hc.sample_networks())
        };
        self.store.insert_host_metrics(host.clone()).await?;
        self.store.insert_disk_metrics(disks.clone()).await?;
        self.store.insert_net_metrics(networks.clone()).await?;

        let containers_snapshot = match self.runtime.list_containers().await {
            Ok(raw) => {
                let tracking = self.store.load_tracking_state().await.unwrap_or_default();
                let filtered = filter_containers(raw, &config.docker, &tracking);
                self.store.insert_container_metrics(filtered.clone()).await?;
                self.tailer.sync(&filtered).await;
                Some(filtered)
            }
            Err(err) => {
                tracing::warn!(error = %err, "container collection failed this tick");
                None
            }
        };

        let snapshot = CollectionSnapshot {
            host: Some(host.clone()),
            disks: Some(disks.clone()),
            containers: containers_snapshot.clone(),
        };
        let alerter = self.alerter.read().clone();
        if let Err(err) = alerter.evaluate(&snapshot).await {
            tracing::warn!(error = %err, "alert evaluation failed");
        }

        self.hub.publish(
            Topic::Metrics,
            &MetricsUpdate {
                host: Some(host),
                disks,
                networks,
                containers: containers_snapshot.unwrap_or_default(),
            },
        );

        let mut last_prune = self.last_prune.lock().await;
        if now - *last_prune > PRUNE_INTERVAL {
            match self.store.prune(config.storage.retention_days, now).await {
                Ok(deleted) => tracing::info!(deleted, "pruned store past retention window"),
                Err(err) => tracing::warn!(error = %err, "prune failed"),
            }
            *last_prune = now;
        }
        Ok(())
    }

    /// Applies a reloaded config. Non-reloadable fields (storage path,
    /// socket path/mode, host proc/sys, docker socket) are compared against
    /// the live config and warned about, never applied. The collection
    /// interval is applied directly. Any change to alert rules or notifier
    /// config rebuilds the alerter (and, if needed, the notifier) from
    /// scratch, resolving the prior alerter's firing instances first.
    async fn apply_reload(&self, new_config: Config, interval: &mut tokio::time::Interval) {
        let mut current = self.config.write().await;

        if new_config.storage.path != current.storage.path {
            tracing::warn!("ignoring reload attempt to change storage.path; restart required");
        }
        if new_config.socket.path != current.socket.path || new_config.socket.mode != current.socket.mode {
            tracing::warn!("ignoring reload attempt to change socket.path/mode; restart required");
        }
        if new_config.host.proc != current.host.proc || new_config.host.sys != current.host.sys {
            tracing::warn!("ignoring reload attempt to change host.proc/host.sys; restart required");
        }
        if new_config.docker.socket != current.docker.socket {
            tracing::warn!("ignoring reload attempt to change docker.socket; restart required");
        }

        if new_config.collect.interval != current.collect.interval {
            *interval = tokio::time::interval(new_config.collect.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        }

        let alerts_changed = new_config.alerts != current.alerts;
        let notify_changed = new_config.notify != current.notify;

        if alerts_changed || notify_changed {
            self.rebuild_alerter(&new_config, notify_changed).await;
        }

        current.collect.interval = new_config.collect.interval;
        current.storage.retention_days = new_config.storage.retention_days;
        current.docker.include = new_config.docker.include;
        current.docker.exclude = new_config.docker.exclude;
        current.alerts = new_config.alerts;
        current.notify = new_config.notify;
    }

    async fn rebuild_alerter(&self, new_config: &Config, notify_changed: bool) {
        let rules = match compile_rules(&new_config.alerts) {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!(error = %err, "reload: new alert rules failed to compile, keeping prior alerter");
                return;
            }
        };

        let notifier = if notify_changed {
            match build_notifier(&new_config.notify) {
                Ok(n) => Arc::new(n),
                Err(err) => {
                    tracing::warn!(error = %err, "reload: new notifier config invalid, keeping prior notifier");
                    self.notifier.read().clone()
                }
            }
        } else {
            self.notifier.read().clone()
        };

        let new_alerter = Arc::new(Alerter::new(
            self.store.clone(),
            notifier.clone(),
            rules,
            make_state_change_callback(self.hub.clone()),
        ));
        if let Err(err) = new_alerter.adopt().await {
            tracing::warn!(error = %err, "reload: adoption into rebuilt alerter failed");
        }

        let old_alerter = std::mem::replace(&mut *self.alerter.write(), new_alerter);
        let old_notifier = std::mem::replace(&mut *self.notifier.write(), notifier);

        if let Err(err) = old_alerter.resolve_all().await {
            tracing::warn!(error = %err, "reload: failed to resolve prior alerter's firing instances");
        }
        if notify_changed {
            old_notifier.stop().await;
        }
    }

    /// The shutdown sequence from spec §4.8 and §5: cancel the event
    /// watcher, wait for it to exit, stop log tailers (flushing their final
    /// batch), resolve every firing instance and stop the alerter's
    /// notifier, then return — closing the Store happens implicitly when
    /// the last clone of its pool is dropped.
    async fn shutdown(&self) {
        if let Some(stop_tx) = self.watcher_stop.lock().await.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.watcher_handle.lock().await.take() {
            let _ = handle.await;
        }

        self.tailer.stop().await;

        let alerter = self.alerter.read().clone();
        if let Err(err) = alerter.resolve_all().await {
            tracing::warn!(error = %err, "shutdown: failed to resolve all firing alerts");
        }
        self.notifier.read().clone().stop().await;
    }

    pub fn store(&self) -> Store {
        self.store.clone()
    }

    pub fn hub(&self) -> Arc<Hub> {
        self.hub.clone()
    }

    pub fn alerter(&self) -> SharedAlerter {
        self.alerter.clone()
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }
}

fn make_state_change_callback(hub: Arc<Hub>) -> StateChangeCallback {
    Arc::new(move |transition, alert| {
        hub.publish(Topic::Alerts, &AlertEvent { state: transition, alert });
    })
}

/// Publishes each freshly-persisted log line to `Topic::Logs`, wired into the
/// log tailer so `subscribe:logs` clients see lines as they're parsed.
fn make_log_entry_callback(hub: Arc<Hub>) -> crate::core::tailer::LogEntryCallback {
    Arc::new(move |entry| {
        hub.publish(Topic::Logs, &entry);
    })
}

fn compile_rules(specs: &[AlertRuleConfig]) -> AgentResult<Vec<AlertRule>> {
    specs
        .iter()
        .map(|c| {
            let actions = c
                .actions
                .iter()
                .map(|a| match a.as_str() {
                    "notify" => Ok(Action::Notify),
                    other => Err(AgentError::InvalidConfig(format!("rule {:?}: unknown action {other:?}", c.name))),
                })
                .collect::<AgentResult<Vec<_>>>()?;
            AlertRule::compile(RuleSpec {
                name: c.name.clone(),
                condition: c.condition.clone(),
                for_duration: c.for_duration,
                cooldown: c.cooldown,
                notify_cooldown: c.notify_cooldown,
                severity: c.severity,
                actions,
                match_pattern: c.match_pattern.clone(),
                match_is_regex: c.match_regex,
                window: c.window,
            })
        })
        .collect()
}

fn build_notifier(cfg: &NotifyConfig) -> AgentResult<Notifier> {
    let mut channels: Vec<Arc<dyn crate::core::notifier::NotifyChannel>> = Vec::new();

    if cfg.email.enabled {
        let smtp = SmtpChannel::new(&cfg.email.smtp_host, cfg.email.smtp_port, &cfg.email.from, &cfg.email.to)?;
        channels.push(Arc::new(smtp));
    }
    for webhook in &cfg.webhooks {
        if !webhook.enabled {
            continue;
        }
        let url = webhook
            .url
            .parse()
            .map_err(|e| AgentError::InvalidConfig(format!("invalid webhook url {:?}: {e}", webhook.url)))?;
        let chan = WebhookChannel::new(url, webhook.headers.clone(), webhook.template.clone())?;
        channels.push(Arc::new(chan));
    }

    Ok(Notifier::with_channels(NotifierConfig::default(), channels))
}

/// Applies `docker.include`/`docker.exclude` glob patterns plus explicit
/// per-container/per-project `tracking_state` overrides. Include/exclude
/// match against container name or compose project; an explicit tracking
/// override always wins over the glob result for that container.
fn filter_containers(containers: Vec<ContainerMetrics>, cfg: &DockerConfig, tracking: &TrackingState) -> Vec<ContainerMetrics> {
    let include: Vec<WildMatch> = cfg.include.iter().map(|p| WildMatch::new(p)).collect();
    let exclude: Vec<WildMatch> = cfg.exclude.iter().map(|p| WildMatch::new(p)).collect();

    containers
        .into_iter()
        .filter(|c| {
            if let Some(tracked) = tracking_override(tracking, c) {
                return tracked;
            }
            let matches_include = include.is_empty() || include.iter().any(|m| m.matches(&c.container_name) || m.matches(&c.project));
            let matches_exclude = exclude.iter().any(|m| m.matches(&c.container_name) || m.matches(&c.project));
            matches_include && !matches_exclude
        })
        .collect()
}

fn tracking_override(tracking: &TrackingState, c: &ContainerMetrics) -> Option<bool> {
    use crate::core::model::TrackingKind;
    for entry in &tracking.entries {
        match entry.kind {
            TrackingKind::Container if entry.name == c.container_id => return Some(entry.tracked),
            TrackingKind::Project if entry.name == c.project => return Some(entry.tracked),
            _ => {}
        }
    }
    None
}
