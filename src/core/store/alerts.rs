// src/core/store/alerts.rs

//! Alert row CRUD (insert/resolve/ack/query) and the tracking-state table.

use super::{MAX_ALERT_RESULTS, Store, i64_to_ts, ts_to_i64};
use crate::core::errors::{AgentError, AgentResult};
use crate::core::model::{PersistedAlert, Severity, TrackingEntry, TrackingKind, TrackingState};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrackingRow {
    pub kind: TrackingKind,
    pub name: String,
    pub tracked: bool,
}

fn parse_severity(s: &str) -> Severity {
    if s == "critical" { Severity::Critical } else { Severity::Warning }
}

fn row_to_alert(r: &rusqlite::Row) -> rusqlite::Result<PersistedAlert> {
    let severity: String = r.get(2)?;
    let resolved_at: Option<i64> = r.get(6)?;
    Ok(PersistedAlert {
        id: r.get(0)?,
        rule_name: r.get(1)?,
        severity: parse_severity(&severity),
        condition: r.get(3)?,
        instance_key: r.get(4)?,
        fired_at: i64_to_ts(r.get(5)?),
        resolved_at: resolved_at.map(i64_to_ts),
        message: r.get(7)?,
        acknowledged: r.get::<_, i64>(8)? != 0,
    })
}

const ALERT_COLUMNS: &str =
    "id, rule_name, severity, condition, instance_key, fired_at, resolved_at, message, acknowledged";

impl Store {
    /// Inserts a new alert row and returns its assigned id.
    pub async fn insert_alert(
        &self,
        rule_name: String,
        severity: Severity,
        condition: String,
        instance_key: String,
        fired_at: DateTime<Utc>,
        message: String,
    ) -> AgentResult<i64> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO alerts (rule_name, severity, condition, instance_key, fired_at, resolved_at, message, acknowledged)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 0)",
                params![rule_name, severity.to_string(), condition, instance_key, ts_to_i64(fired_at), message],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn resolve_alert(&self, id: i64, ts: DateTime<Utc>) -> AgentResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE alerts SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
                params![ts_to_i64(ts), id],
            )?;
            Ok(())
        })
        .await
    }

    /// Stamps every currently-unresolved row with `ts`. Used at startup when
    /// either a row's rule no longer exists, or no alert rules are configured
    /// at all.
    pub async fn resolve_orphaned_alerts(&self, ts: DateTime<Utc>) -> AgentResult<u64> {
        self.with_conn(move |conn| {
            let n = conn.execute(
                "UPDATE alerts SET resolved_at = ?1 WHERE resolved_at IS NULL",
                params![ts_to_i64(ts)],
            )?;
            Ok(n as u64)
        })
        .await
    }

    /// Marks alert `id` as acknowledged. Fails with `NotFound` if no row
    /// matches.
    pub async fn ack_alert(&self, id: i64) -> AgentResult<()> {
        self.with_conn(move |conn| {
            let n = conn.execute("UPDATE alerts SET acknowledged = 1 WHERE id = ?1", params![id])?;
            if n == 0 {
                return Err(AgentError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Returns alerts fired within `[start, end]`, newest first, capped at
    /// [`MAX_ALERT_RESULTS`].
    pub async fn query_alerts(&self, filter: AlertFilter) -> AgentResult<Vec<PersistedAlert>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alerts WHERE fired_at >= ?1 AND fired_at <= ?2 ORDER BY fired_at DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![ts_to_i64(filter.start), ts_to_i64(filter.end), MAX_ALERT_RESULTS as i64],
                    row_to_alert,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Returns every unresolved alert row (`resolved_at IS NULL`).
    pub async fn query_firing_alerts(&self) -> AgentResult<Vec<PersistedAlert>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE resolved_at IS NULL ORDER BY fired_at ASC"))?;
            let rows = stmt.query_map([], row_to_alert)?.collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn get_alert(&self, id: i64) -> AgentResult<Option<PersistedAlert>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"), params![id], row_to_alert)
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Replaces the entire tracking-state table with `state` in one
    /// transaction (the whole set is snapshotted on every change, per spec §3).
    pub async fn save_tracking_state(&self, state: TrackingState) -> AgentResult<()> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM tracking_state", [])?;
            {
                let mut stmt =
                    tx.prepare_cached("INSERT INTO tracking_state (kind, name, tracked) VALUES (?1, ?2, ?3)")?;
                for entry in &state.entries {
                    let kind = match entry.kind {
                        TrackingKind::Container => "container",
                        TrackingKind::Project => "project",
                    };
                    stmt.execute(params![kind, entry.name, entry.tracked as i64])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn load_tracking_state(&self) -> AgentResult<TrackingState> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT kind, name, tracked FROM tracking_state")?;
            let entries = stmt
                .query_map([], |r| {
                    let kind_str: String = r.get(0)?;
                    Ok(TrackingEntry {
                        kind: if kind_str == "project" { TrackingKind::Project } else { TrackingKind::Container },
                        name: r.get(1)?,
                        tracked: r.get::<_, i64>(2)? != 0,
                    })
                })?
                .collect::<Result<std::collections::BTreeSet<_>, _>>()?;
            Ok(TrackingState { entries })
        })
        .await
    }
}
