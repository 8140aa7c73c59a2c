// src/core/store/schema.rs

//! Schema versioning and migration. Versions are applied in order, each
//! inside its own transaction, driven off the `user_version` pragma.

use crate::core::errors::AgentResult;
use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const MIGRATIONS: &[&str] = &[
    // v1: initial schema.
    r#"
    CREATE TABLE host_metrics (
        ts INTEGER NOT NULL,
        cpu_percent REAL NOT NULL,
        memory_percent REAL NOT NULL,
        memory_used_bytes INTEGER NOT NULL,
        memory_total_bytes INTEGER NOT NULL,
        swap_percent REAL NOT NULL,
        load1 REAL NOT NULL,
        load5 REAL NOT NULL,
        load15 REAL NOT NULL
    );
    CREATE INDEX idx_host_metrics_ts ON host_metrics(ts);

    CREATE TABLE disk_metrics (
        ts INTEGER NOT NULL,
        mountpoint TEXT NOT NULL,
        disk_percent REAL NOT NULL,
        used_bytes INTEGER NOT NULL,
        total_bytes INTEGER NOT NULL
    );
    CREATE INDEX idx_disk_metrics_ts ON disk_metrics(ts);

    CREATE TABLE net_metrics (
        ts INTEGER NOT NULL,
        interface TEXT NOT NULL,
        rx_bytes INTEGER NOT NULL,
        tx_bytes INTEGER NOT NULL
    );
    CREATE INDEX idx_net_metrics_ts ON net_metrics(ts);

    CREATE TABLE container_metrics (
        ts INTEGER NOT NULL,
        container_id TEXT NOT NULL,
        container_name TEXT NOT NULL,
        project TEXT NOT NULL,
        service TEXT NOT NULL,
        state TEXT NOT NULL,
        health TEXT NOT NULL,
        cpu_percent REAL NOT NULL,
        memory_percent REAL NOT NULL,
        restart_count INTEGER NOT NULL,
        exit_code INTEGER NOT NULL
    );
    CREATE INDEX idx_container_metrics_ts ON container_metrics(ts);
    CREATE INDEX idx_container_metrics_project_service ON container_metrics(project, service);

    CREATE TABLE logs (
        ts INTEGER NOT NULL,
        container_id TEXT NOT NULL,
        container_name TEXT NOT NULL,
        project TEXT NOT NULL,
        service TEXT NOT NULL,
        stream TEXT NOT NULL,
        raw TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL
    );
    CREATE INDEX idx_logs_ts ON logs(ts);
    CREATE INDEX idx_logs_container_id ON logs(container_id);

    CREATE TABLE alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_name TEXT NOT NULL,
        severity TEXT NOT NULL,
        condition TEXT NOT NULL,
        instance_key TEXT NOT NULL,
        fired_at INTEGER NOT NULL,
        resolved_at INTEGER,
        message TEXT NOT NULL,
        acknowledged INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX idx_alerts_fired_at ON alerts(fired_at);
    CREATE INDEX idx_alerts_resolved_at ON alerts(resolved_at);

    CREATE TABLE tracking_state (
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        tracked INTEGER NOT NULL,
        PRIMARY KEY (kind, name)
    );
    "#,
];

/// Applies every migration step between the database's current
/// `user_version` and [`CURRENT_SCHEMA_VERSION`], each inside its own
/// transaction. A fresh database (version 0) runs every step; an
/// already-current database runs none.
pub fn migrate(conn: &Connection) -> AgentResult<()> {
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current > CURRENT_SCHEMA_VERSION {
        return Err(crate::core::errors::AgentError::Store(format!(
            "database schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
        )));
    }

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!("applied store migration to schema version {version}");
    }

    Ok(())
}
