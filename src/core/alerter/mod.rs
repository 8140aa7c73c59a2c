// src/core/alerter/mod.rs

//! The alert engine: rule compilation, per-instance state machine,
//! deduplication/cooldowns/silences, persistence hooks and startup adoption
//! (spec §4.4 — "the hard core").
//!
//! Concurrency note: the spec calls for a single mutex guarding `instances`,
//! `rules`, `silenced_until`, `last_notified`, held across persistence and
//! callback dispatch. Firing/resolving a row is unavoidably an async SQLite
//! call (`Store` hops to `spawn_blocking`), so this implementation uses
//! `tokio::sync::Mutex` rather than `parking_lot`, which lets the guard be
//! held across `.await` points and keeps evaluate/evaluate_container_event
//! serialized exactly as the spec requires. State-change callbacks are
//! collected under the lock and invoked after release (the pragmatic
//! alternative documented in spec §9), to avoid re-entrancy hazards.

pub mod condition;
pub mod instance;
pub mod rule;

use self::condition::Condition;
use self::instance::{AlertInstance, InstanceState, instance_map_key};
use self::rule::AlertRule;
use crate::core::errors::{AgentError, AgentResult};
use crate::core::model::{
    AlertTransition, CollectionSnapshot, ContainerMetrics, DiskMetrics, HostMetrics, PersistedAlert,
};
use crate::core::notifier::{Notification, NotificationStatus, Notifier};
use crate::core::store::{LogFilter, Store};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Invoked on every real state transition (spec: "Firing emits a
/// state-change(\"firing\", alert) callback; resolving emits
/// (\"resolved\", alert)"). Per the cyclic-reference-avoidance design note,
/// the Alerter never holds a reference to the Hub itself; the Coordinator
/// wires this callback to publish there.
pub type StateChangeCallback = Arc<dyn Fn(AlertTransition, PersistedAlert) + Send + Sync>;

/// A coordinator-held, swappable handle to the live `Alerter`. Reload
/// rebuilds the alerter from scratch on any alert-config change; everything
/// that calls into it (the tick loop, the event watcher) reads through this
/// handle so the swap is visible to every caller without restarting them.
pub type SharedAlerter = Arc<parking_lot::RwLock<Arc<Alerter>>>;

struct AlerterState {
    rules: BTreeMap<String, AlertRule>,
    instances: HashMap<String, AlertInstance>,
    silenced_until: HashMap<String, DateTime<Utc>>,
    last_notified: HashMap<String, DateTime<Utc>>,
}

pub struct Alerter {
    store: Store,
    notifier: Arc<Notifier>,
    on_state_change: StateChangeCallback,
    state: tokio::sync::Mutex<AlerterState>,
}

fn chrono_dur(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

impl Alerter {
    pub fn new(store: Store, notifier: Arc<Notifier>, rules: Vec<AlertRule>, on_state_change: StateChangeCallback) -> Self {
        let rules = rules.into_iter().map(|r| (r.name.clone(), r)).collect();
        Alerter {
            store,
            notifier,
            on_state_change,
            state: tokio::sync::Mutex::new(AlerterState {
                rules,
                instances: HashMap::new(),
                silenced_until: HashMap::new(),
                last_notified: HashMap::new(),
            }),
        }
    }

    /// Current compiled rules, in lexicographic (by name) order — used to
    /// serve `query:alert_rules` and to iterate deterministically during
    /// evaluation.
    pub async fn rules(&self) -> Vec<AlertRule> {
        self.state.lock().await.rules.values().cloned().collect()
    }

    /// Startup adoption (spec §4.4): for every persisted unresolved row whose
    /// rule still exists, inject a Firing in-memory instance reusing the
    /// row's id; for rows whose rule no longer exists (or when no rules are
    /// configured at all), resolve them.
    pub async fn adopt(&self) -> AgentResult<()> {
        let now = Utc::now();
        let rows = self.store.query_firing_alerts().await?;

        let mut to_resolve = Vec::new();
        let no_rules_configured = {
            let mut state = self.state.lock().await;
            if state.rules.is_empty() {
                true
            } else {
                for row in &rows {
                    if state.rules.contains_key(&row.rule_name) {
                        let key = instance_map_key(&row.rule_name, &row.instance_key);
                        state.instances.insert(
                            key,
                            AlertInstance {
                                state: InstanceState::Firing,
                                pending_since: None,
                                db_id: Some(row.id),
                                last_evaluated: now,
                                seen: false,
                                last_fired_at: Some(row.fired_at),
                            },
                        );
                    } else {
                        to_resolve.push(row.id);
                    }
                }
                false
            }
        };

        if no_rules_configured {
            self.store.resolve_orphaned_alerts(now).await?;
        } else {
            for id in to_resolve {
                self.store.resolve_alert(id, now).await?;
            }
        }
        Ok(())
    }

    /// The per-cycle evaluation entry point. `None` in a snapshot family
    /// means collection failed for it this cycle (leave its instances
    /// unchanged); `Some(vec![])` means "succeeded, nothing present" and
    /// drives stale-instance resolution.
    pub async fn evaluate(&self, snapshot: &CollectionSnapshot) -> AgentResult<()> {
        let now = Utc::now();

        // Log-rule conditions require an async store query (CountLogs), so
        // they're resolved before taking the state lock for the main pass.
        let log_results = self.evaluate_log_conditions(snapshot, now).await?;

        let mut callbacks = Vec::new();
        let mut notify_queue = Vec::new();
        {
            let mut state = self.state.lock().await;
            let rule_names: Vec<String> = state.rules.keys().cloned().collect();

            if let Some(host) = &snapshot.host {
                let disks: &[DiskMetrics] = snapshot.disks.as_deref().unwrap_or(&[]);
                for name in &rule_names {
                    let rule = match state.rules.get(name) {
                        Some(r) if r.is_host_rule() => r.clone(),
                        _ => continue,
                    };
                    let cond_true = eval_host_condition(&rule.condition, host, disks);
                    self.apply_transition(&mut state, &rule, "", cond_true, now, &mut callbacks, &mut notify_queue)
                        .await?;
                }
            }

            if let Some(containers) = &snapshot.containers {
                for name in &rule_names {
                    let rule = match state.rules.get(name) {
                        Some(r) if !r.is_host_rule() => r.clone(),
                        _ => continue,
                    };
                    for c in containers {
                        let cond_true = if rule.is_log_rule() {
                            *log_results.get(&(rule.name.clone(), c.container_id.clone())).unwrap_or(&false)
                        } else {
                            eval_container_condition(&rule.condition, c)
                        };
                        self.apply_transition(
                            &mut state,
                            &rule,
                            &c.container_id,
                            cond_true,
                            now,
                            &mut callbacks,
                            &mut notify_queue,
                        )
                        .await?;
                    }
                }
            }

            self.gc_stale(&mut state, snapshot.host.is_some(), snapshot.containers.is_some(), now, &mut callbacks)
                .await?;
        }

        self.dispatch(callbacks, notify_queue).await;
        Ok(())
    }

    async fn evaluate_log_conditions(
        &self,
        snapshot: &CollectionSnapshot,
        now: DateTime<Utc>,
    ) -> AgentResult<HashMap<(String, String), bool>> {
        let mut results = HashMap::new();
        let Some(containers) = &snapshot.containers else {
            return Ok(results);
        };
        let log_rules: Vec<AlertRule> = {
            let state = self.state.lock().await;
            state.rules.values().filter(|r| r.is_log_rule()).cloned().collect()
        };
        for rule in &log_rules {
            let window = rule.window.unwrap_or(Duration::from_secs(60));
            for c in containers {
                let filter = LogFilter {
                    start: now - chrono_dur(window),
                    end: now,
                    container_id: Some(c.container_id.clone()),
                    search: rule.match_pattern.clone(),
                    search_regex: Some(rule.match_is_regex),
                    ..Default::default()
                };
                let count = self.store.count_logs(filter).await?;
                results.insert((rule.name.clone(), c.container_id.clone()), rule.condition.eval_numeric(count as f64));
            }
        }
        Ok(results)
    }

    /// Evaluated on lifecycle events: only container-scope string-field
    /// rules (`state`/`health`). Numeric rules are skipped (the event
    /// carries no metric data) and no stale-instance GC runs here — only the
    /// one container in question is touched.
    pub async fn evaluate_container_event(&self, cm: &ContainerMetrics) -> AgentResult<()> {
        let now = Utc::now();
        let mut callbacks = Vec::new();
        let mut notify_queue = Vec::new();
        {
            let mut state = self.state.lock().await;
            let rule_names: Vec<String> = state.rules.keys().cloned().collect();
            for name in &rule_names {
                let rule = match state.rules.get(name) {
                    Some(r) if r.is_container_rule() && matches!(r.condition.field.as_str(), "state" | "health") => {
                        r.clone()
                    }
                    _ => continue,
                };
                let actual = match rule.condition.field.as_str() {
                    "state" => cm.state.to_string(),
                    "health" => cm.health.clone(),
                    _ => continue,
                };
                let cond_true = rule.condition.eval_string(&actual);
                self.apply_transition(&mut state, &rule, &cm.container_id, cond_true, now, &mut callbacks, &mut notify_queue)
                    .await?;
            }
        }
        self.dispatch(callbacks, notify_queue).await;
        Ok(())
    }

    /// Sets an in-memory silence on `rule_name` until `now + duration`.
    /// While silenced, state transitions and DB rows are unaffected; only
    /// notification dispatch is suppressed, and `last_notified` is not
    /// touched (so an unsilenced fire notifies immediately).
    pub async fn silence(&self, rule_name: &str, duration: Duration) -> AgentResult<()> {
        let mut state = self.state.lock().await;
        if !state.rules.contains_key(rule_name) {
            return Err(AgentError::InvalidRequest(format!("unknown alert rule {rule_name:?}")));
        }
        let until = Utc::now() + chrono_dur(duration);
        state.silenced_until.insert(rule_name.to_string(), until);
        Ok(())
    }

    /// Resolves every currently-Firing instance. Called during agent
    /// shutdown so external observers see a clean "resolved" for everything.
    pub async fn resolve_all(&self) -> AgentResult<()> {
        let now = Utc::now();
        let mut callbacks = Vec::new();
        {
            let mut state = self.state.lock().await;
            let keys: Vec<String> = state
                .instances
                .iter()
                .filter(|(_, i)| i.state == InstanceState::Firing)
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                let db_id = state.instances.get(&key).and_then(|i| i.db_id);
                if let Some(db_id) = db_id {
                    self.store.resolve_alert(db_id, now).await?;
                    if let Some(alert) = self.store.get_alert(db_id).await? {
                        callbacks.push((AlertTransition::Resolved, alert));
                    }
                }
                if let Some(entry) = state.instances.get_mut(&key) {
                    entry.state = InstanceState::Inactive;
                    entry.db_id = None;
                }
            }
        }
        self.dispatch(callbacks, Vec::new()).await;
        Ok(())
    }

    async fn apply_transition(
        &self,
        state: &mut AlerterState,
        rule: &AlertRule,
        instance_key: &str,
        condition_true: bool,
        now: DateTime<Utc>,
        callbacks: &mut Vec<(AlertTransition, PersistedAlert)>,
        notify_queue: &mut Vec<(PersistedAlert, AlertTransition)>,
    ) -> AgentResult<()> {
        let map_key = instance_map_key(&rule.name, instance_key);
        state
            .instances
            .entry(map_key.clone())
            .or_insert_with(|| AlertInstance {
                state: InstanceState::Inactive,
                pending_since: None,
                db_id: None,
                last_evaluated: now,
                seen: false,
                last_fired_at: None,
            });
        {
            let entry = state.instances.get_mut(&map_key).expect("just inserted");
            entry.seen = true;
            entry.last_evaluated = now;
        }

        let current_state = state.instances[&map_key].state;
        match current_state {
            InstanceState::Inactive => {
                if condition_true {
                    if Self::suppressed_by_cooldown(rule, &state.instances[&map_key], now) {
                        return Ok(());
                    }
                    if rule.for_duration.is_zero() {
                        self.fire_instance(state, rule, &map_key, now, callbacks, notify_queue).await?;
                    } else {
                        let entry = state.instances.get_mut(&map_key).unwrap();
                        entry.state = InstanceState::Pending;
                        entry.pending_since = Some(now);
                    }
                }
            }
            InstanceState::Pending => {
                if condition_true {
                    let pending_since = state.instances[&map_key].pending_since.unwrap_or(now);
                    if now - pending_since >= chrono_dur(rule.for_duration) {
                        if Self::suppressed_by_cooldown(rule, &state.instances[&map_key], now) {
                            let entry = state.instances.get_mut(&map_key).unwrap();
                            entry.state = InstanceState::Inactive;
                            entry.pending_since = None;
                        } else {
                            self.fire_instance(state, rule, &map_key, now, callbacks, notify_queue).await?;
                        }
                    }
                } else {
                    let entry = state.instances.get_mut(&map_key).unwrap();
                    entry.state = InstanceState::Inactive;
                    entry.pending_since = None;
                }
            }
            InstanceState::Firing => {
                if !condition_true {
                    let db_id = state.instances[&map_key].db_id;
                    if let Some(db_id) = db_id {
                        self.store.resolve_alert(db_id, now).await?;
                        if let Some(alert) = self.store.get_alert(db_id).await? {
                            callbacks.push((AlertTransition::Resolved, alert));
                        }
                    }
                    let entry = state.instances.get_mut(&map_key).unwrap();
                    entry.state = InstanceState::Inactive;
                    entry.db_id = None;
                    entry.pending_since = None;
                }
            }
        }
        Ok(())
    }

    fn suppressed_by_cooldown(rule: &AlertRule, instance: &AlertInstance, now: DateTime<Utc>) -> bool {
        rule.cooldown > Duration::ZERO
            && instance.last_fired_at.is_some_and(|t| now - t < chrono_dur(rule.cooldown))
    }

    async fn fire_instance(
        &self,
        state: &mut AlerterState,
        rule: &AlertRule,
        map_key: &str,
        now: DateTime<Utc>,
        callbacks: &mut Vec<(AlertTransition, PersistedAlert)>,
        notify_queue: &mut Vec<(PersistedAlert, AlertTransition)>,
    ) -> AgentResult<()> {
        let instance_key = map_key.splitn(2, ':').nth(1).unwrap_or("").to_string();
        let condition_str = rule.condition.to_string();
        let message = format!("{}: {}", rule.name, condition_str);

        let db_id = self
            .store
            .insert_alert(rule.name.clone(), rule.severity, condition_str, instance_key, now, message)
            .await?;

        {
            let entry = state.instances.get_mut(map_key).unwrap();
            entry.state = InstanceState::Firing;
            entry.pending_since = None;
            entry.db_id = Some(db_id);
            entry.last_fired_at = Some(now);
        }

        let alert = self
            .store
            .get_alert(db_id)
            .await?
            .ok_or_else(|| AgentError::Internal("just-inserted alert row missing".to_string()))?;
        callbacks.push((AlertTransition::Firing, alert.clone()));

        let should_notify = rule.notifies() && {
            let silenced = state.silenced_until.get(&rule.name).is_some_and(|until| now < *until);
            if silenced {
                false
            } else if rule.notify_cooldown > Duration::ZERO {
                !state
                    .last_notified
                    .get(&rule.name)
                    .is_some_and(|last| now - *last < chrono_dur(rule.notify_cooldown))
            } else {
                true
            }
        };
        if should_notify {
            state.last_notified.insert(rule.name.clone(), now);
            notify_queue.push((alert, AlertTransition::Firing));
        }
        Ok(())
    }

    async fn gc_stale(
        &self,
        state: &mut AlerterState,
        host_active: bool,
        containers_active: bool,
        now: DateTime<Utc>,
        callbacks: &mut Vec<(AlertTransition, PersistedAlert)>,
    ) -> AgentResult<()> {
        let keys: Vec<String> = state.instances.keys().cloned().collect();
        let family_active = |state: &AlerterState, key: &str| -> bool {
            let rule_name = key.split(':').next().unwrap_or_default();
            match state.rules.get(rule_name) {
                Some(r) if r.is_host_rule() => host_active,
                Some(_) => containers_active,
                None => false,
            }
        };

        for key in &keys {
            if !family_active(state, key) {
                continue;
            }
            let (seen, is_firing) = match state.instances.get(key) {
                Some(i) => (i.seen, i.state == InstanceState::Firing),
                None => continue,
            };
            if seen || !is_firing {
                continue;
            }
            let db_id = state.instances.get(key).and_then(|i| i.db_id);
            if let Some(db_id) = db_id {
                self.store.resolve_alert(db_id, now).await?;
                if let Some(alert) = self.store.get_alert(db_id).await? {
                    callbacks.push((AlertTransition::Resolved, alert));
                }
            }
            if let Some(entry) = state.instances.get_mut(key) {
                entry.state = InstanceState::Inactive;
                entry.db_id = None;
            }
        }

        let to_remove: Vec<String> = keys
            .iter()
            .filter(|key| {
                family_active(state, key)
                    && state
                        .instances
                        .get(*key)
                        .is_some_and(|i| !i.seen && i.state == InstanceState::Inactive)
            })
            .cloned()
            .collect();
        for key in to_remove {
            state.instances.remove(&key);
        }

        for entry in state.instances.values_mut() {
            entry.seen = false;
        }
        Ok(())
    }

    async fn dispatch(&self, callbacks: Vec<(AlertTransition, PersistedAlert)>, notify_queue: Vec<(PersistedAlert, AlertTransition)>) {
        for (transition, alert) in callbacks {
            (self.on_state_change)(transition, alert);
        }
        for (alert, transition) in notify_queue {
            let status = match transition {
                AlertTransition::Firing => NotificationStatus::Firing,
                AlertTransition::Resolved => NotificationStatus::Resolved,
            };
            self.notifier.send(Notification {
                subject: format!("[{}] {}", alert.severity, alert.rule_name),
                body: alert.message.clone(),
                severity: alert.severity,
                status,
            });
        }
    }
}

fn eval_host_condition(condition: &Condition, host: &HostMetrics, disks: &[DiskMetrics]) -> bool {
    match condition.field.as_str() {
        "cpu_percent" => condition.eval_numeric(host.cpu_percent),
        "memory_percent" => condition.eval_numeric(host.memory_percent),
        "swap_percent" => condition.eval_numeric(host.swap_percent),
        "load1" => condition.eval_numeric(host.load1),
        "load5" => condition.eval_numeric(host.load5),
        "load15" => condition.eval_numeric(host.load15),
        // host.disk_percent has no direct home in the singleton host sample;
        // we resolve it against the root mountpoint of the same tick's disk
        // family, when present.
        "disk_percent" => disks
            .iter()
            .find(|d| d.mountpoint == "/")
            .is_some_and(|d| condition.eval_numeric(d.disk_percent)),
        _ => false,
    }
}

fn eval_container_condition(condition: &Condition, c: &ContainerMetrics) -> bool {
    match condition.field.as_str() {
        "cpu_percent" => condition.eval_numeric(c.cpu_percent),
        "memory_percent" => condition.eval_numeric(c.memory_percent),
        "restart_count" => condition.eval_numeric(c.restart_count as f64),
        "exit_code" => condition.eval_numeric(c.exit_code as f64),
        "state" => condition.eval_string(&c.state.to_string()),
        "health" => condition.eval_string(&c.health),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ContainerState, Severity};
    use crate::core::notifier::NotifierConfig;
    use rule::{Action, RuleSpec};

    async fn new_test_alerter(rules: Vec<AlertRule>) -> (Alerter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).await.unwrap();
        let notifier = Arc::new(Notifier::new(NotifierConfig::default()));
        let alerter = Alerter::new(store, notifier, rules, Arc::new(|_, _| {}));
        (alerter, dir)
    }

    fn exited_rule() -> AlertRule {
        AlertRule::compile(RuleSpec {
            name: "exited".to_string(),
            condition: "container.state == 'exited'".to_string(),
            for_duration: Duration::ZERO,
            cooldown: Duration::ZERO,
            notify_cooldown: Duration::ZERO,
            severity: Severity::Critical,
            actions: vec![Action::Notify],
            match_pattern: None,
            match_is_regex: false,
            window: None,
        })
        .unwrap()
    }

    fn container(id: &str, state: ContainerState) -> ContainerMetrics {
        ContainerMetrics {
            ts: Utc::now(),
            container_id: id.to_string(),
            container_name: id.to_string(),
            project: "proj".to_string(),
            service: "svc".to_string(),
            state,
            health: "".to_string(),
            cpu_percent: 0.0,
            memory_percent: 0.0,
            restart_count: 0,
            exit_code: 0,
        }
    }

    #[tokio::test]
    async fn event_fires_and_persists_one_row() {
        let (alerter, _dir) = new_test_alerter(vec![exited_rule()]).await;
        let cm = container("abc", ContainerState::Exited);
        alerter.evaluate_container_event(&cm).await.unwrap();

        let firing = alerter.store.query_firing_alerts().await.unwrap();
        assert_eq!(firing.len(), 1);
        assert_eq!(firing[0].rule_name, "exited");
        assert!(firing[0].resolved_at.is_none());
    }

    #[tokio::test]
    async fn event_resolves_existing_firing() {
        let (alerter, _dir) = new_test_alerter(vec![exited_rule()]).await;
        alerter.evaluate_container_event(&container("abc", ContainerState::Exited)).await.unwrap();
        alerter.evaluate_container_event(&container("abc", ContainerState::Running)).await.unwrap();

        let firing = alerter.store.query_firing_alerts().await.unwrap();
        assert_eq!(firing.len(), 0);
    }

    #[tokio::test]
    async fn nil_family_leaves_firing_instances_unchanged() {
        let high_cpu = AlertRule::compile(RuleSpec {
            name: "high_cpu".to_string(),
            condition: "container.cpu_percent > 80".to_string(),
            for_duration: Duration::ZERO,
            cooldown: Duration::ZERO,
            notify_cooldown: Duration::ZERO,
            severity: Severity::Warning,
            actions: vec![Action::Notify],
            match_pattern: None,
            match_is_regex: false,
            window: None,
        })
        .unwrap();
        let (alerter, _dir) = new_test_alerter(vec![high_cpu, exited_rule()]).await;

        let mut cm = container("abc", ContainerState::Running);
        cm.cpu_percent = 95.0;
        let snapshot = CollectionSnapshot {
            host: None,
            disks: None,
            containers: Some(vec![cm]),
        };
        alerter.evaluate(&snapshot).await.unwrap();
        alerter.evaluate_container_event(&container("abc", ContainerState::Exited)).await.unwrap();

        let firing = alerter.store.query_firing_alerts().await.unwrap();
        assert_eq!(firing.len(), 2);
    }

    #[tokio::test]
    async fn stale_instance_gc_resolves_and_removes() {
        let (alerter, _dir) = new_test_alerter(vec![exited_rule()]).await;
        let snapshot_with = CollectionSnapshot {
            host: None,
            disks: None,
            containers: Some(vec![container("abc", ContainerState::Exited)]),
        };
        alerter.evaluate(&snapshot_with).await.unwrap();
        assert_eq!(alerter.store.query_firing_alerts().await.unwrap().len(), 1);

        let snapshot_empty = CollectionSnapshot {
            host: None,
            disks: None,
            containers: Some(vec![]),
        };
        alerter.evaluate(&snapshot_empty).await.unwrap();
        assert_eq!(alerter.store.query_firing_alerts().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn silence_suppresses_notify_but_instance_still_fires_and_cooldown_resets_after_expiry() {
        let high_cpu = AlertRule::compile(RuleSpec {
            name: "high_cpu".to_string(),
            condition: "container.cpu_percent > 80".to_string(),
            for_duration: Duration::ZERO,
            cooldown: Duration::ZERO,
            notify_cooldown: Duration::from_secs(300),
            severity: Severity::Warning,
            actions: vec![Action::Notify],
            match_pattern: None,
            match_is_regex: false,
            window: None,
        })
        .unwrap();
        let (alerter, _dir) = new_test_alerter(vec![high_cpu]).await;

        alerter.silence("high_cpu", Duration::from_secs(60)).await.unwrap();

        let mut aaa = container("aaa", ContainerState::Running);
        aaa.cpu_percent = 95.0;
        alerter
            .evaluate(&CollectionSnapshot { host: None, disks: None, containers: Some(vec![aaa]) })
            .await
            .unwrap();

        assert_eq!(
            alerter.store.query_firing_alerts().await.unwrap().len(),
            1,
            "silence must not prevent the instance from persisting as firing"
        );
        {
            let state = alerter.state.lock().await;
            assert!(
                !state.last_notified.contains_key("high_cpu"),
                "a silenced rule must not update last_notified"
            );
        }

        // Simulate the silence window expiring (spec.md §8 scenario 6's
        // "advance 2m") without sleeping: push silenced_until into the past.
        {
            let mut state = alerter.state.lock().await;
            state.silenced_until.insert("high_cpu".to_string(), Utc::now() - chrono::Duration::minutes(1));
        }

        let mut bbb = container("bbb", ContainerState::Running);
        bbb.cpu_percent = 95.0;
        alerter
            .evaluate(&CollectionSnapshot { host: None, disks: None, containers: Some(vec![bbb]) })
            .await
            .unwrap();

        assert_eq!(alerter.store.query_firing_alerts().await.unwrap().len(), 2);
        {
            let state = alerter.state.lock().await;
            assert!(
                state.last_notified.contains_key("high_cpu"),
                "once silence expires with no prior last_notified, the rule must notify and record it"
            );
        }
    }
}
