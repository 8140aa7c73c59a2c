// src/core/alerter/instance.rs

//! Per-`(rule, instance_key)` state and the three-state machine
//! (Inactive → Pending → Firing) described in spec §4.4.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Inactive,
    Pending,
    Firing,
}

/// In-memory state for one `"<rule_name>:<instance_key>"` pair.
#[derive(Debug, Clone)]
pub struct AlertInstance {
    pub state: InstanceState,
    pub pending_since: Option<DateTime<Utc>>,
    pub db_id: Option<i64>,
    pub last_evaluated: DateTime<Utc>,
    pub seen: bool,
    /// When this instance last transitioned into Firing, used to enforce
    /// `cooldown` (suppress re-firing shortly after a resolve).
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl AlertInstance {
    pub fn new_inactive(now: DateTime<Utc>) -> Self {
        AlertInstance {
            state: InstanceState::Inactive,
            pending_since: None,
            db_id: None,
            last_evaluated: now,
            seen: true,
            last_fired_at: None,
        }
    }
}

/// The key an alert instance is addressed by: empty for host rules, the
/// mountpoint for disk rules (not modeled as a scope here; see GLOSSARY --
/// this crate's condition scopes are host/container/log, so disk-scope
/// keys never arise in practice), the container id for container/log rules.
pub fn instance_map_key(rule_name: &str, instance_key: &str) -> String {
    format!("{rule_name}:{instance_key}")
}
