// src/core/alerter/rule.rs

//! Compiled alert rules: validated shapes ready for the evaluator.

use super::condition::{Condition, Scope};
use crate::core::errors::AgentError;
use crate::core::model::Severity;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Notify,
}

/// A single compiled alert rule (spec §3, §4.4).
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub condition: Condition,
    pub for_duration: Duration,
    pub cooldown: Duration,
    pub notify_cooldown: Duration,
    pub severity: Severity,
    pub actions: Vec<Action>,
    pub match_pattern: Option<String>,
    pub match_is_regex: bool,
    pub window: Option<Duration>,
}

/// The raw, user-facing shape a rule is built from (deserialized out of
/// `[alerts.<name>]` in config, see `crate::config`).
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub name: String,
    pub condition: String,
    pub for_duration: Duration,
    pub cooldown: Duration,
    pub notify_cooldown: Duration,
    pub severity: Severity,
    pub actions: Vec<Action>,
    pub match_pattern: Option<String>,
    pub match_is_regex: bool,
    pub window: Option<Duration>,
}

impl AlertRule {
    /// Compiles and validates a raw rule spec: parses the condition, and
    /// enforces the log-only-field contract (`match`/`match_regex`/`window`
    /// required for log rules, forbidden otherwise) plus non-negative
    /// durations.
    pub fn compile(spec: RuleSpec) -> Result<Self, AgentError> {
        if spec.for_duration.as_secs_f64() < 0.0
            || spec.cooldown.as_secs_f64() < 0.0
            || spec.notify_cooldown.as_secs_f64() < 0.0
        {
            return Err(AgentError::InvalidConfig(format!(
                "rule {:?}: durations must be non-negative",
                spec.name
            )));
        }

        let condition = Condition::parse(&spec.condition)?;

        if condition.is_log() {
            if spec.match_pattern.is_none() {
                return Err(AgentError::InvalidConfig(format!(
                    "rule {:?}: log rules require 'match'",
                    spec.name
                )));
            }
            if spec.window.is_none() {
                return Err(AgentError::InvalidConfig(format!(
                    "rule {:?}: log rules require 'window'",
                    spec.name
                )));
            }
        } else {
            if spec.match_pattern.is_some() || spec.match_is_regex {
                return Err(AgentError::InvalidConfig(format!(
                    "rule {:?}: 'match'/'match_regex' are only valid on log rules",
                    spec.name
                )));
            }
            if spec.window.is_some() {
                return Err(AgentError::InvalidConfig(format!(
                    "rule {:?}: 'window' is only valid on log rules",
                    spec.name
                )));
            }
        }

        Ok(AlertRule {
            name: spec.name,
            condition,
            for_duration: spec.for_duration,
            cooldown: spec.cooldown,
            notify_cooldown: spec.notify_cooldown,
            severity: spec.severity,
            actions: spec.actions,
            match_pattern: spec.match_pattern,
            match_is_regex: spec.match_is_regex,
            window: spec.window,
        })
    }

    pub fn is_log_rule(&self) -> bool {
        self.condition.scope == Scope::Log
    }

    pub fn is_container_rule(&self) -> bool {
        self.condition.scope == Scope::Container
    }

    pub fn is_host_rule(&self) -> bool {
        self.condition.scope == Scope::Host
    }

    pub fn notifies(&self) -> bool {
        self.actions.contains(&Action::Notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, condition: &str) -> RuleSpec {
        RuleSpec {
            name: name.to_string(),
            condition: condition.to_string(),
            for_duration: Duration::ZERO,
            cooldown: Duration::ZERO,
            notify_cooldown: Duration::ZERO,
            severity: Severity::Warning,
            actions: vec![Action::Notify],
            match_pattern: None,
            match_is_regex: false,
            window: None,
        }
    }

    #[test]
    fn log_rule_requires_match_and_window() {
        assert!(AlertRule::compile(spec("needs_match", "log.count > 5")).is_err());
    }

    #[test]
    fn non_log_rule_rejects_match() {
        let mut s = spec("bad", "host.cpu_percent > 80");
        s.match_pattern = Some("x".to_string());
        assert!(AlertRule::compile(s).is_err());
    }

    #[test]
    fn valid_log_rule_compiles() {
        let mut s = spec("log_errors", "log.count > 5");
        s.match_pattern = Some("ERROR".to_string());
        s.window = Some(Duration::from_secs(60));
        assert!(AlertRule::compile(s).is_ok());
    }
}
