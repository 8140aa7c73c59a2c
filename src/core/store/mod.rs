// src/core/store/mod.rs

//! The embedded relational store: schema + migration, typed inserts, range
//! queries and batched pruning (spec §4.1).
//!
//! Backed by `rusqlite` (bundled SQLite) behind an `r2d2` connection pool.
//! Blocking SQLite calls are pushed onto `tokio::task::spawn_blocking`, the
//! same boundary-crossing pattern the teacher uses for its own blocking file
//! I/O in persistence.

mod alerts;
mod logs;
mod metrics;
mod schema;

pub use alerts::{AlertFilter, TrackingRow};
pub use logs::LogFilter;
pub use metrics::ContainerMetricsFilter;

use crate::core::errors::{AgentError, AgentResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

/// Number of rows deleted per `DELETE` statement during a prune pass, to
/// avoid long exclusive transactions on a hot WAL file.
pub const PRUNE_BATCH: usize = 5000;

/// Hard cap on rows returned by `QueryAlerts`.
pub const MAX_ALERT_RESULTS: usize = 1000;

pub(crate) type Pooled = r2d2::PooledConnection<SqliteConnectionManager>;

/// A handle to the embedded store. Cheap to clone: internally it's just an
/// `Arc`-backed connection pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Opens (creating if absent) the database at `path` with WAL enabled and
    /// incremental auto-vacuum on, then applies any pending migrations inside
    /// a single transaction per step. Fresh databases are created directly at
    /// the latest schema version. Re-opening an up-to-date database applies
    /// no steps (idempotent).
    pub async fn open(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(&path))
            .await
            .map_err(|e| AgentError::Internal(format!("store open task panicked: {e}")))?
    }

    fn open_blocking(path: &Path) -> AgentResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA auto_vacuum = INCREMENTAL;
                 PRAGMA foreign_keys = ON;",
            )?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| AgentError::Store(format!("failed to build connection pool: {e}")))?;

        let conn = pool
            .get()
            .map_err(|e| AgentError::Store(format!("failed to get connection: {e}")))?;
        schema::migrate(&conn)?;

        Ok(Store { pool })
    }

    pub(crate) fn conn(&self) -> AgentResult<Pooled> {
        self.pool
            .get()
            .map_err(|e| AgentError::Store(format!("failed to acquire connection: {e}")))
    }

    /// Runs `f` against a pooled connection on a blocking thread. Every typed
    /// query/insert method in this module goes through this helper.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> AgentResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> AgentResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| AgentError::Store(format!("failed to acquire connection: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| AgentError::Internal(format!("store task panicked: {e}")))?
    }

    /// Deletes rows older than `now - retention_days` from every
    /// time-stamped table, in batches of [`PRUNE_BATCH`], then issues a
    /// passive WAL checkpoint. The database file is not shrunk; incremental
    /// auto-vacuum lets space be reclaimed on demand.
    pub async fn prune(&self, retention_days: i64, now: chrono::DateTime<chrono::Utc>) -> AgentResult<u64> {
        let cutoff = now - chrono::Duration::days(retention_days);
        let cutoff_ts = ts_to_i64(cutoff);
        self.with_conn(move |conn| {
            let mut total_deleted = 0u64;
            for table in [
                "host_metrics",
                "disk_metrics",
                "net_metrics",
                "container_metrics",
                "logs",
            ] {
                loop {
                    let deleted = conn.execute(
                        &format!(
                            "DELETE FROM {table} WHERE rowid IN (SELECT rowid FROM {table} WHERE ts < ?1 LIMIT ?2)"
                        ),
                        rusqlite::params![cutoff_ts, PRUNE_BATCH as i64],
                    )?;
                    total_deleted += deleted as u64;
                    if deleted < PRUNE_BATCH {
                        break;
                    }
                }
            }
            conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
            Ok(total_deleted)
        })
        .await
    }
}

pub(crate) fn ts_to_i64(ts: chrono::DateTime<chrono::Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn i64_to_ts(v: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_micros(v).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_fresh_db_at_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("agent.db")).await.unwrap();
        let version: i64 = store
            .with_conn(|c| Ok(c.pragma_query_value(None, "user_version", |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");
        let _ = Store::open(&path).await.unwrap();
        let store2 = Store::open(&path).await.unwrap();
        let version: i64 = store2
            .with_conn(|c| Ok(c.pragma_query_value(None, "user_version", |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(version, schema::CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn prune_deletes_only_rows_older_than_the_cutoff() {
        use crate::core::model::HostMetrics;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("agent.db")).await.unwrap();

        let now = chrono::Utc::now();
        let retention_days = 7;
        let old_ts = now - chrono::Duration::days(retention_days + 1);
        let recent_ts = now - chrono::Duration::days(1);

        let sample = |ts| HostMetrics {
            ts,
            cpu_percent: 1.0,
            memory_percent: 1.0,
            memory_used_bytes: 0,
            memory_total_bytes: 0,
            swap_percent: 0.0,
            load1: 0.0,
            load5: 0.0,
            load15: 0.0,
        };
        store.insert_host_metrics(sample(old_ts)).await.unwrap();
        store.insert_host_metrics(sample(recent_ts)).await.unwrap();

        let deleted = store.prune(retention_days, now).await.unwrap();
        assert_eq!(deleted, 1, "only the row older than the retention window should be deleted");

        let remaining = store.query_host_metrics(now - chrono::Duration::days(30), now).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!((remaining[0].ts - recent_ts).num_milliseconds().abs() < 1000);
    }

    #[tokio::test]
    async fn prune_is_idempotent() {
        use crate::core::model::HostMetrics;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("agent.db")).await.unwrap();

        let now = chrono::Utc::now();
        let old_ts = now - chrono::Duration::days(10);
        store
            .insert_host_metrics(HostMetrics {
                ts: old_ts,
                cpu_percent: 1.0,
                memory_percent: 1.0,
                memory_used_bytes: 0,
                memory_total_bytes: 0,
                swap_percent: 0.0,
                load1: 0.0,
                load5: 0.0,
                load15: 0.0,
            })
            .await
            .unwrap();

        let first = store.prune(7, now).await.unwrap();
        let second = store.prune(7, now).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0, "a second prune pass over the same cutoff must delete nothing further");
    }
}
