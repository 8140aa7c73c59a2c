// src/server/connection.rs

//! Per-connection dispatch (spec §4.7, §6): decodes/encodes `Envelope`s over
//! one accepted Unix socket connection, tracks this connection's own topic
//! subscriptions, and answers queries/actions against the shared
//! Store/Alerter/runtime. One task per connection, plus one forwarding task
//! per active subscription — the "goroutine inventory" the spec describes
//! for the socket layer (§5).

use super::protocol::{Envelope, request, response};
use crate::config::MAX_SILENCE;
use crate::core::alerter::rule::AlertRule;
use crate::core::collector::ContainerRuntime;
use crate::core::coordinator::Coordinator;
use crate::core::errors::AgentError;
use crate::core::hub::{SubscriptionHandle, Topic};
use crate::core::model::{LogStream, TrackingEntry, TrackingKind, TrackingState};
use crate::core::store::{AlertFilter, ContainerMetricsFilter, LogFilter};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

type Writer = futures::stream::SplitSink<Framed<UnixStream, super::protocol::EnvelopeCodec>, Envelope>;

struct Subscription {
    handle: SubscriptionHandle,
    forward: tokio::task::JoinHandle<()>,
}

/// Drives one connection until the peer disconnects or a write fails, then
/// tears down every subscription it opened.
pub async fn handle(stream: UnixStream, coordinator: Arc<Coordinator>) -> Result<()> {
    let framed = Framed::new(stream, super::protocol::EnvelopeCodec);
    let (sink, mut reader) = framed.split();
    let writer: Arc<Mutex<Writer>> = Arc::new(Mutex::new(sink));
    let mut subs: HashMap<Topic, Subscription> = HashMap::new();

    while let Some(frame) = reader.next().await {
        let envelope = match frame {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(error = %err, "connection read error");
                break;
            }
        };
        if dispatch(envelope, &coordinator, &writer, &mut subs).await.is_err() {
            break;
        }
    }

    for (topic, sub) in subs.drain() {
        coordinator.hub().unsubscribe(topic, sub.handle);
        sub.forward.abort();
    }
    Ok(())
}

async fn send(writer: &Arc<Mutex<Writer>>, envelope: Envelope) -> Result<(), ()> {
    writer.lock().await.send(envelope).await.map_err(|_| ())
}

/// Translates an internal error into the opaque, implementation-detail-free
/// string the spec requires for `error` envelopes (§7), except
/// `InvalidRequest`, which is itself already a user-facing validation
/// message safe to surface verbatim.
fn opaque_error(context: &str, err: &AgentError) -> String {
    match err {
        AgentError::InvalidRequest(msg) => msg.clone(),
        AgentError::NotFound => format!("{context} failed: not found"),
        _ => format!("{context} failed"),
    }
}

async fn dispatch(
    envelope: Envelope,
    coordinator: &Arc<Coordinator>,
    writer: &Arc<Mutex<Writer>>,
    subs: &mut HashMap<Topic, Subscription>,
) -> Result<(), ()> {
    let id = envelope.id;

    macro_rules! parse_body {
        ($ty:ty) => {
            match serde_json::from_value::<$ty>(envelope.body.clone()) {
                Ok(v) => v,
                Err(e) => return send(writer, Envelope::error(id, format!("malformed request body: {e}"))).await,
            }
        };
    }

    match envelope.kind.as_str() {
        request::SUBSCRIBE_METRICS => subscribe(coordinator, writer, subs, id, Topic::Metrics, response::METRICS_UPDATE).await,
        request::SUBSCRIBE_LOGS => subscribe_logs(coordinator, writer, subs, id, envelope.body.clone()).await,
        request::SUBSCRIBE_CONTAINERS => subscribe(coordinator, writer, subs, id, Topic::Containers, response::CONTAINER_EVENT).await,
        request::SUBSCRIBE_ALERTS => subscribe_alerts(coordinator, writer, subs, id).await,

        request::UNSUBSCRIBE => {
            let body: UnsubscribeBody = parse_body!(UnsubscribeBody);
            match Topic::parse(&body.topic) {
                Some(topic) => match subs.remove(&topic) {
                    Some(sub) => {
                        coordinator.hub().unsubscribe(topic, sub.handle);
                        sub.forward.abort();
                        send(writer, Envelope::result(id, json!({"unsubscribed": body.topic}))).await
                    }
                    None => send(writer, Envelope::error(id, "not subscribed to that topic")).await,
                },
                None => send(writer, Envelope::error(id, format!("unknown topic {:?}", body.topic))).await,
            }
        }

        request::QUERY_METRICS => {
            let body: QueryMetricsBody = parse_body!(QueryMetricsBody);
            query_metrics(coordinator, writer, id, body).await
        }
        request::QUERY_LOGS => {
            let body: QueryLogsBody = parse_body!(QueryLogsBody);
            query_logs(coordinator, writer, id, body).await
        }
        request::QUERY_ALERTS => {
            let body: QueryAlertsBody = parse_body!(QueryAlertsBody);
            let filter = AlertFilter { start: body.start, end: body.end };
            match coordinator.store().query_alerts(filter).await {
                Ok(rows) => send(writer, Envelope::result(id, json!({ "alerts": rows }))).await,
                Err(err) => send(writer, Envelope::error(id, opaque_error("query", &err))).await,
            }
        }
        request::QUERY_CONTAINERS => match coordinator.runtime().list_containers().await {
            Ok(containers) => send(writer, Envelope::result(id, json!({ "containers": containers }))).await,
            Err(err) => send(writer, Envelope::error(id, opaque_error("query", &err))).await,
        },
        request::QUERY_ALERT_RULES => {
            let rules = coordinator.alerter().read().clone().rules().await;
            let views: Vec<AlertRuleView> = rules.iter().map(AlertRuleView::from).collect();
            send(writer, Envelope::result(id, json!({ "rules": views }))).await
        }
        request::QUERY_TRACKING => match coordinator.store().load_tracking_state().await {
            Ok(state) => send(writer, Envelope::result(id, json!({ "tracking": state.entries }))).await,
            Err(err) => send(writer, Envelope::error(id, opaque_error("query", &err))).await,
        },

        request::ACTION_ACK => {
            let body: AckBody = parse_body!(AckBody);
            match coordinator.store().ack_alert(body.id).await {
                Ok(()) => send(writer, Envelope::result(id, json!({ "acknowledged": body.id }))).await,
                Err(err) => send(writer, Envelope::error(id, opaque_error("alert not found", &err))).await,
            }
        }
        request::ACTION_SILENCE => {
            let body: SilenceBody = parse_body!(SilenceBody);
            if body.duration_seconds <= 0.0 || body.duration_seconds > MAX_SILENCE.as_secs_f64() {
                return send(writer, Envelope::error(id, "duration_seconds must be in (0, MAX_SILENCE]")).await;
            }
            let alerter = coordinator.alerter().read().clone();
            match alerter.silence(&body.rule_name, Duration::from_secs_f64(body.duration_seconds)).await {
                Ok(()) => send(writer, Envelope::result(id, json!({ "silenced": body.rule_name }))).await,
                Err(err) => send(writer, Envelope::error(id, opaque_error("silence", &err))).await,
            }
        }
        request::ACTION_RESTART => {
            let body: RestartBody = parse_body!(RestartBody);
            restart_container(coordinator, writer, id, body).await
        }
        request::ACTION_SET_TRACKING => {
            let body: SetTrackingBody = parse_body!(SetTrackingBody);
            set_tracking(coordinator, writer, id, body).await
        }

        other => send(writer, Envelope::error(id, format!("unknown message type {other:?}"))).await,
    }
}

async fn subscribe(
    coordinator: &Arc<Coordinator>,
    writer: &Arc<Mutex<Writer>>,
    subs: &mut HashMap<Topic, Subscription>,
    id: u32,
    topic: Topic,
    event_kind: &'static str,
) -> Result<(), ()> {
    if let Some(old) = subs.remove(&topic) {
        coordinator.hub().unsubscribe(topic, old.handle);
        old.forward.abort();
    }

    let subscriber = coordinator.hub().subscribe(topic);
    let handle = subscriber.handle;
    let forward = spawn_forwarder(writer.clone(), subscriber.rx, event_kind);
    subs.insert(topic, Subscription { handle, forward });

    send(writer, Envelope::result(id, json!({ "subscribed": topic_name(topic) }))).await
}

/// `subscribe:alerts` additionally requires snapshot-then-stream (spec §6,
/// §8 scenario 5): subscribe to the hub first so no live event between the
/// snapshot query and the subscribe call is lost, write every currently
/// firing alert synchronously, and only then start the forwarding pump.
async fn subscribe_alerts(
    coordinator: &Arc<Coordinator>,
    writer: &Arc<Mutex<Writer>>,
    subs: &mut HashMap<Topic, Subscription>,
    id: u32,
) -> Result<(), ()> {
    if let Some(old) = subs.remove(&Topic::Alerts) {
        coordinator.hub().unsubscribe(Topic::Alerts, old.handle);
        old.forward.abort();
    }

    let subscriber = coordinator.hub().subscribe(Topic::Alerts);
    let handle = subscriber.handle;

    let snapshot = match coordinator.store().query_firing_alerts().await {
        Ok(rows) => rows,
        Err(err) => {
            coordinator.hub().unsubscribe(Topic::Alerts, handle);
            return send(writer, Envelope::error(id, opaque_error("subscribe", &err))).await;
        }
    };

    send(writer, Envelope::result(id, json!({ "subscribed": "alerts" }))).await?;
    for alert in snapshot {
        let body = json!({ "state": "firing", "alert": alert });
        send(writer, Envelope::event(response::ALERT_EVENT, body)).await?;
    }

    let forward = spawn_forwarder(writer.clone(), subscriber.rx, response::ALERT_EVENT);
    subs.insert(Topic::Alerts, Subscription { handle, forward });
    Ok(())
}

/// `subscribe:logs` carries an optional filter (spec §6): `container_id`,
/// `project`, `stream`, `search`. Unlike `subscribe`'s other topics, log
/// entries need per-message filtering before they're forwarded, so this
/// gets its own subscribe/forward pair instead of the generic one.
#[derive(Debug, Deserialize, Default)]
struct LogSubscribeFilter {
    #[serde(default)]
    container_id: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    search: Option<String>,
}

async fn subscribe_logs(
    coordinator: &Arc<Coordinator>,
    writer: &Arc<Mutex<Writer>>,
    subs: &mut HashMap<Topic, Subscription>,
    id: u32,
    body: Value,
) -> Result<(), ()> {
    let filter: LogSubscribeFilter = match serde_json::from_value(body) {
        Ok(f) => f,
        Err(e) => return send(writer, Envelope::error(id, format!("malformed request body: {e}"))).await,
    };

    if let Some(old) = subs.remove(&Topic::Logs) {
        coordinator.hub().unsubscribe(Topic::Logs, old.handle);
        old.forward.abort();
    }

    let subscriber = coordinator.hub().subscribe(Topic::Logs);
    let handle = subscriber.handle;
    let forward = spawn_log_forwarder(writer.clone(), subscriber.rx, filter, coordinator.runtime());
    subs.insert(Topic::Logs, Subscription { handle, forward });

    send(writer, Envelope::result(id, json!({ "subscribed": "logs" }))).await
}

fn spawn_log_forwarder(
    writer: Arc<Mutex<Writer>>,
    mut rx: tokio::sync::mpsc::Receiver<crate::core::hub::HubMessage>,
    filter: LogSubscribeFilter,
    runtime: Arc<dyn ContainerRuntime>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if !log_entry_matches(&msg, &filter, &runtime).await {
                continue;
            }
            let envelope = Envelope::event(response::LOG_ENTRY, (*msg).clone());
            if writer.lock().await.send(envelope).await.is_err() {
                break;
            }
        }
    })
}

/// Applies a `subscribe:logs` filter to one already-persisted `LogEntry`
/// (carried as JSON on the hub). `project` resolution is dynamic: it
/// consults the container client's current listing rather than trusting the
/// entry's own `project` field, so a container relaunched into the same
/// project is still matched (spec §6).
async fn log_entry_matches(msg: &Value, filter: &LogSubscribeFilter, runtime: &Arc<dyn ContainerRuntime>) -> bool {
    if filter.container_id.is_none() && filter.project.is_none() && filter.stream.is_none() && filter.search.is_none() {
        return true;
    }

    let container_id = msg.get("container_id").and_then(Value::as_str).unwrap_or_default();

    if let Some(want) = &filter.container_id
        && container_id != want
    {
        return false;
    }

    if let Some(want_stream) = &filter.stream {
        let stream = msg.get("stream").and_then(Value::as_str).unwrap_or_default();
        if !stream.eq_ignore_ascii_case(want_stream) {
            return false;
        }
    }

    if let Some(needle) = &filter.search {
        let raw = msg.get("raw").and_then(Value::as_str).unwrap_or_default();
        let message = msg.get("message").and_then(Value::as_str).unwrap_or_default();
        if !raw.contains(needle.as_str()) && !message.contains(needle.as_str()) {
            return false;
        }
    }

    if let Some(project) = &filter.project {
        let containers = match runtime.list_containers().await {
            Ok(containers) => containers,
            Err(_) => return false,
        };
        let matches = containers.iter().any(|c| &c.project == project && c.container_id == container_id);
        if !matches {
            return false;
        }
    }

    true
}

fn spawn_forwarder(
    writer: Arc<Mutex<Writer>>,
    mut rx: tokio::sync::mpsc::Receiver<crate::core::hub::HubMessage>,
    event_kind: &'static str,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let envelope = Envelope::event(event_kind, (*msg).clone());
            if writer.lock().await.send(envelope).await.is_err() {
                break;
            }
        }
    })
}

fn topic_name(topic: Topic) -> &'static str {
    match topic {
        Topic::Metrics => "metrics",
        Topic::Logs => "logs",
        Topic::Alerts => "alerts",
        Topic::Containers => "containers",
    }
}

#[derive(Debug, Deserialize)]
struct UnsubscribeBody {
    topic: String,
}

#[derive(Debug, Deserialize)]
struct QueryMetricsBody {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    points: Option<u32>,
}

async fn query_metrics(coordinator: &Arc<Coordinator>, writer: &Arc<Mutex<Writer>>, id: u32, body: QueryMetricsBody) -> Result<(), ()> {
    if body.start > body.end {
        return send(writer, Envelope::error(id, "start must not be after end")).await;
    }
    let store = coordinator.store();

    let host = match store.query_host_metrics(body.start, body.end).await {
        Ok(rows) => rows,
        Err(err) => return send(writer, Envelope::error(id, opaque_error("query", &err))).await,
    };
    let containers = match store.query_container_metrics(body.start, body.end, ContainerMetricsFilter::default()).await {
        Ok(rows) => rows,
        Err(err) => return send(writer, Envelope::error(id, opaque_error("query", &err))).await,
    };

    let points = body.points.filter(|&p| p > 0).map(|p| p as usize);
    let (host, disks, networks) = match points {
        Some(points) => (downsample(host, points), Vec::new(), Vec::new()),
        None => {
            let disks = match store.query_disk_metrics(body.start, body.end).await {
                Ok(rows) => rows,
                Err(err) => return send(writer, Envelope::error(id, opaque_error("query", &err))).await,
            };
            let networks = match store.query_net_metrics(body.start, body.end).await {
                Ok(rows) => rows,
                Err(err) => return send(writer, Envelope::error(id, opaque_error("query", &err))).await,
            };
            (host, disks, networks)
        }
    };

    send(
        writer,
        Envelope::result(
            id,
            json!({
                "host": host,
                "disks": disks,
                "networks": networks,
                "containers": containers,
            }),
        ),
    )
    .await
}

/// Groups `rows` into `points` roughly-equal buckets and keeps the last
/// sample of each — a max-per-bucket downsample, not an average.
fn downsample<T: Clone>(rows: Vec<T>, points: usize) -> Vec<T> {
    if points == 0 || rows.len() <= points {
        return rows;
    }
    let chunk = rows.len().div_ceil(points);
    rows.chunks(chunk).filter_map(|c| c.last().cloned()).collect()
}

#[derive(Debug, Deserialize)]
struct QueryLogsBody {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    container_id: Option<String>,
    #[serde(default)]
    container_ids: Vec<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn query_logs(coordinator: &Arc<Coordinator>, writer: &Arc<Mutex<Writer>>, id: u32, body: QueryLogsBody) -> Result<(), ()> {
    if body.start > body.end {
        return send(writer, Envelope::error(id, "start must not be after end")).await;
    }
    let stream = match body.stream.as_deref() {
        Some("stdout") => Some(LogStream::Stdout),
        Some("stderr") => Some(LogStream::Stderr),
        Some(other) => return send(writer, Envelope::error(id, format!("unknown stream {other:?}"))).await,
        None => None,
    };
    let filter = LogFilter {
        start: body.start,
        end: body.end,
        container_id: body.container_id,
        container_ids: body.container_ids,
        project: body.project,
        service: body.service,
        stream,
        search: body.search,
        level: body.level,
        limit: body.limit,
        search_regex: None,
    };
    match coordinator.store().query_logs(filter).await {
        Ok(rows) => send(writer, Envelope::result(id, json!({ "logs": rows }))).await,
        Err(err) => send(writer, Envelope::error(id, opaque_error("query", &err))).await,
    }
}

#[derive(Debug, Deserialize)]
struct QueryAlertsBody {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AckBody {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SilenceBody {
    rule_name: String,
    duration_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct RestartBody {
    container_id: String,
}

async fn restart_container(coordinator: &Arc<Coordinator>, writer: &Arc<Mutex<Writer>>, id: u32, body: RestartBody) -> Result<(), ()> {
    let monitored = match coordinator.runtime().list_containers().await {
        Ok(rows) => rows,
        Err(err) => return send(writer, Envelope::error(id, opaque_error("restart", &err))).await,
    };
    if !monitored.iter().any(|c| c.container_id == body.container_id) {
        return send(writer, Envelope::error(id, "container is not currently monitored")).await;
    }
    match coordinator.runtime().restart(&body.container_id).await {
        Ok(()) => send(writer, Envelope::result(id, json!({ "restarted": body.container_id }))).await,
        Err(err) => send(writer, Envelope::error(id, opaque_error("restart", &err))).await,
    }
}

#[derive(Debug, Deserialize)]
struct SetTrackingBody {
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    project: Option<String>,
    tracked: bool,
}

async fn set_tracking(coordinator: &Arc<Coordinator>, writer: &Arc<Mutex<Writer>>, id: u32, body: SetTrackingBody) -> Result<(), ()> {
    let (kind, name) = match (body.container, body.project) {
        (Some(c), None) => (TrackingKind::Container, c),
        (None, Some(p)) => (TrackingKind::Project, p),
        _ => return send(writer, Envelope::error(id, "exactly one of container/project is required")).await,
    };

    let store = coordinator.store();
    let mut state: TrackingState = match store.load_tracking_state().await {
        Ok(s) => s,
        Err(err) => return send(writer, Envelope::error(id, opaque_error("set_tracking", &err))).await,
    };
    state.entries.retain(|e| !(e.kind == kind && e.name == name));
    state.entries.insert(TrackingEntry { kind, name: name.clone(), tracked: body.tracked });

    match store.save_tracking_state(state).await {
        Ok(()) => send(writer, Envelope::result(id, json!({ "tracking_updated": name }))).await,
        Err(err) => send(writer, Envelope::error(id, opaque_error("set_tracking", &err))).await,
    }
}

/// A wire-friendly view of a compiled `AlertRule`; `AlertRule` itself isn't
/// `Serialize` since `Condition` carries no JSON-friendly form.
#[derive(Debug, serde::Serialize)]
struct AlertRuleView {
    name: String,
    condition: String,
    for_seconds: f64,
    cooldown_seconds: f64,
    notify_cooldown_seconds: f64,
    severity: crate::core::model::Severity,
    actions: Vec<&'static str>,
    #[serde(rename = "match")]
    match_pattern: Option<String>,
    match_regex: bool,
    window_seconds: Option<f64>,
}

impl From<&AlertRule> for AlertRuleView {
    fn from(rule: &AlertRule) -> Self {
        AlertRuleView {
            name: rule.name.clone(),
            condition: rule.condition.to_string(),
            for_seconds: rule.for_duration.as_secs_f64(),
            cooldown_seconds: rule.cooldown.as_secs_f64(),
            notify_cooldown_seconds: rule.notify_cooldown.as_secs_f64(),
            severity: rule.severity,
            actions: rule.actions.iter().map(|_| "notify").collect(),
            match_pattern: rule.match_pattern.clone(),
            match_regex: rule.match_is_regex,
            window_seconds: rule.window.map(|w| w.as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerter::condition::Condition;
    use crate::core::alerter::rule::Action;
    use crate::core::model::Severity;

    #[test]
    fn downsample_keeps_last_sample_per_bucket() {
        let rows: Vec<i32> = (0..10).collect();
        let out = downsample(rows, 3);
        // 10 rows / 3 buckets -> chunks of 4: [0..4), [4..8), [8..10)
        assert_eq!(out, vec![3, 7, 9]);
    }

    #[test]
    fn downsample_is_a_no_op_when_rows_fit() {
        let rows = vec![1, 2, 3];
        assert_eq!(downsample(rows.clone(), 10), rows);
    }

    #[test]
    fn downsample_zero_points_returns_rows_unchanged() {
        let rows = vec![1, 2, 3, 4];
        assert_eq!(downsample(rows.clone(), 0), rows);
    }

    #[test]
    fn alert_rule_view_surfaces_condition_as_display_string() {
        let rule = AlertRule {
            name: "high-cpu".to_string(),
            condition: Condition::parse("host.cpu_percent > 90").unwrap(),
            for_duration: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            notify_cooldown: Duration::from_secs(60),
            severity: Severity::Warning,
            actions: vec![Action::Notify],
            match_pattern: Some("web-*".to_string()),
            match_is_regex: false,
            window: None,
        };
        let view = AlertRuleView::from(&rule);
        assert_eq!(view.name, "high-cpu");
        assert_eq!(view.condition, "host.cpu_percent > 90");
        assert_eq!(view.for_seconds, 30.0);
        assert_eq!(view.actions, vec!["notify"]);
        assert_eq!(view.match_pattern.as_deref(), Some("web-*"));
        assert!(!view.match_regex);
    }

    #[test]
    fn opaque_error_surfaces_invalid_request_verbatim_but_hides_other_detail() {
        let invalid = AgentError::InvalidRequest("duration_seconds must be positive".to_string());
        assert_eq!(opaque_error("silence", &invalid), "duration_seconds must be positive");

        let internal = AgentError::Store("sqlite busy".to_string());
        let msg = opaque_error("query", &internal);
        assert_eq!(msg, "query failed");
        assert!(!msg.contains("sqlite"));
    }
}
