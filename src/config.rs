// src/config.rs

//! Loads and validates the agent's TOML configuration (spec §6): a
//! `RawConfig` → `Config` load-then-resolve-then-validate pipeline, the same
//! shape the teacher uses for its own config (`RawConfig` with
//! `#[serde(default = "...")]` per field, resolved into a plain `Config`,
//! then a `validate()` pass returning `anyhow::Error`).

use crate::core::model::Severity;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Ceiling on `action:silence`'s requested duration (spec §6).
pub const MAX_SILENCE: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    14
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { path: default_storage_path(), retention_days: default_retention_days() }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/odin-agent/agent.db")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketConfig {
    pub path: PathBuf,
    #[serde(default = "default_socket_mode")]
    pub mode: u32,
}

fn default_socket_mode() -> u32 {
    0o660
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig { path: PathBuf::from("/run/odin-agent/agent.sock"), mode: default_socket_mode() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_proc")]
    pub proc: PathBuf,
    #[serde(default = "default_sys")]
    pub sys: PathBuf,
}

fn default_proc() -> PathBuf {
    PathBuf::from("/proc")
}
fn default_sys() -> PathBuf {
    PathBuf::from("/sys")
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig { proc: default_proc(), sys: default_sys() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_socket")]
    pub socket: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig { socket: default_docker_socket(), include: Vec::new(), exclude: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(with = "humantime_serde", default = "default_collect_interval")]
    pub interval: Duration,
}

fn default_collect_interval() -> Duration {
    Duration::from_secs(10)
}

impl Default for CollectConfig {
    fn default() -> Self {
        CollectConfig { interval: default_collect_interval() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    pub name: String,
    pub condition: String,
    #[serde(rename = "for", with = "humantime_serde", default)]
    pub for_duration: Duration,
    #[serde(with = "humantime_serde", default)]
    pub cooldown: Duration,
    #[serde(with = "humantime_serde", default)]
    pub notify_cooldown: Duration,
    pub severity: Severity,
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,
    #[serde(rename = "match", default)]
    pub match_pattern: Option<String>,
    #[serde(default)]
    pub match_regex: bool,
    #[serde(with = "humantime_serde_opt", default)]
    pub window: Option<Duration>,
}

fn default_actions() -> Vec<String> {
    vec!["notify".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub template: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// The final, validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub storage: StorageConfig,
    pub socket: SocketConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub alerts: Vec<AlertRuleConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A raw representation of the config file before validation and
/// `alerts.<name>` table flattening.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    storage: StorageConfig,
    socket: SocketConfig,
    #[serde(default)]
    host: HostConfig,
    #[serde(default)]
    docker: DockerConfig,
    #[serde(default)]
    collect: CollectConfig,
    #[serde(default)]
    alerts: HashMap<String, RawAlertRule>,
    #[serde(default)]
    notify: NotifyConfig,
}

/// `alerts.<name>` table shape; `name` itself comes from the TOML key, not a
/// field inside the table.
#[derive(Deserialize)]
struct RawAlertRule {
    condition: String,
    #[serde(rename = "for", with = "humantime_serde", default)]
    for_duration: Duration,
    #[serde(with = "humantime_serde", default)]
    cooldown: Duration,
    #[serde(with = "humantime_serde", default)]
    notify_cooldown: Duration,
    severity: Severity,
    #[serde(default = "default_actions")]
    actions: Vec<String>,
    #[serde(rename = "match", default)]
    match_pattern: Option<String>,
    #[serde(default)]
    match_regex: bool,
    #[serde(with = "humantime_serde_opt", default)]
    window: Option<Duration>,
}

impl Config {
    /// Reads and parses `path`, flattens the `alerts.<name>` table into
    /// `Vec<AlertRuleConfig>` sorted by name (per spec §3's "iterated in
    /// lexicographic order"), then validates the result.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents).with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let mut alerts: Vec<AlertRuleConfig> = raw
            .alerts
            .into_iter()
            .map(|(name, r)| AlertRuleConfig {
                name,
                condition: r.condition,
                for_duration: r.for_duration,
                cooldown: r.cooldown,
                notify_cooldown: r.notify_cooldown,
                severity: r.severity,
                actions: r.actions,
                match_pattern: r.match_pattern,
                match_regex: r.match_regex,
                window: r.window,
            })
            .collect();
        alerts.sort_by(|a, b| a.name.cmp(&b.name));

        let config = Config {
            log_level: raw.log_level,
            storage: raw.storage,
            socket: raw.socket,
            host: raw.host,
            docker: raw.docker,
            collect: raw.collect,
            alerts,
            notify: raw.notify,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the closed set of TOML-shape concerns this file owns
    /// directly (durations, URL scheme, email completeness); per-condition
    /// and per-rule semantic validation (unknown field, string-op mismatch,
    /// log-only fields on non-log rules, missing match/window on log rules)
    /// happens inside `AlertRule::compile` and is re-surfaced by the
    /// coordinator at reload/startup time.
    fn validate(&self) -> Result<()> {
        if self.storage.retention_days < 0 {
            return Err(anyhow!("storage.retention_days cannot be negative"));
        }
        if self.collect.interval.is_zero() {
            return Err(anyhow!("collect.interval must be greater than zero"));
        }

        let mut seen = std::collections::HashSet::new();
        for rule in &self.alerts {
            if !seen.insert(rule.name.clone()) {
                return Err(anyhow!("duplicate alert rule name '{}'", rule.name));
            }
            if rule.cooldown.as_nanos() > 0 && rule.for_duration.as_nanos() > 0 && rule.cooldown < rule.for_duration {
                tracing::warn!(rule = %rule.name, "cooldown shorter than 'for' duration; re-firing may be near-immediate");
            }
            for action in &rule.actions {
                if action != "notify" {
                    return Err(anyhow!("alerts.{}: unknown action '{action}'", rule.name));
                }
            }
        }

        if self.notify.email.enabled
            && (self.notify.email.smtp_host.is_empty() || self.notify.email.from.is_empty() || self.notify.email.to.is_empty())
        {
            return Err(anyhow!("notify.email is enabled but smtp_host/from/to are incomplete"));
        }

        for webhook in &self.notify.webhooks {
            if !webhook.enabled {
                continue;
            }
            let url = url::Url::parse(&webhook.url).with_context(|| format!("notify.webhooks: invalid url '{}'", webhook.url))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(anyhow!("notify.webhooks: url '{}' must use http or https", webhook.url));
            }
            if let Some(template) = &webhook.template
                && !template.contains("{{Subject}}")
                && !template.contains("{{Body}}")
            {
                return Err(anyhow!("notify.webhooks: template for '{}' references neither {{{{Subject}}}} nor {{{{Body}}}}", webhook.url));
            }
        }

        Ok(())
    }
}

/// `humantime_serde` only ships an implementation for `Duration`, not
/// `Option<Duration>`; this thin wrapper adapts it for the log rules'
/// optional `window` field.
mod humantime_serde_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => humantime_serde::serialize(d, serializer),
            None => Option::<String>::None.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => humantime::parse_duration(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path.to_string_lossy().into_owned())
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let (_dir, path) = write_config(
            r#"
            [storage]
            path = "/tmp/odin/agent.db"

            [socket]
            path = "/tmp/odin/agent.sock"
            "#,
        );
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.storage.retention_days, 14);
        assert_eq!(config.collect.interval, Duration::from_secs(10));
        assert!(config.alerts.is_empty());
    }

    #[test]
    fn flattens_and_sorts_alert_tables() {
        let (_dir, path) = write_config(
            r#"
            [storage]
            path = "/tmp/odin/agent.db"
            [socket]
            path = "/tmp/odin/agent.sock"

            [alerts.zzz_rule]
            condition = "host.cpu_percent > 90"
            severity = "warning"

            [alerts.aaa_rule]
            condition = "host.cpu_percent > 80"
            severity = "warning"
            for = "2m"
            "#,
        );
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.alerts.len(), 2);
        assert_eq!(config.alerts[0].name, "aaa_rule");
        assert_eq!(config.alerts[1].name, "zzz_rule");
        assert_eq!(config.alerts[0].for_duration, Duration::from_secs(120));
    }

    #[test]
    fn rejects_negative_retention() {
        let (_dir, path) = write_config(
            r#"
            [storage]
            path = "/tmp/odin/agent.db"
            retention_days = -1
            [socket]
            path = "/tmp/odin/agent.sock"
            "#,
        );
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn rejects_webhook_with_bad_scheme() {
        let (_dir, path) = write_config(
            r#"
            [storage]
            path = "/tmp/odin/agent.db"
            [socket]
            path = "/tmp/odin/agent.sock"

            [[notify.webhooks]]
            url = "ftp://example.com/hook"
            "#,
        );
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn rejects_incomplete_email_config() {
        let (_dir, path) = write_config(
            r#"
            [storage]
            path = "/tmp/odin/agent.db"
            [socket]
            path = "/tmp/odin/agent.sock"

            [notify.email]
            enabled = true
            "#,
        );
        assert!(Config::from_file(&path).is_err());
    }
}
