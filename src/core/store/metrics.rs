// src/core/store/metrics.rs

//! Insert and range-query methods for the host/disk/net/container metric
//! families.

use super::{Store, i64_to_ts, ts_to_i64};
use crate::core::errors::AgentResult;
use crate::core::model::{ContainerMetrics, ContainerState, DiskMetrics, HostMetrics, NetMetrics};
use chrono::{DateTime, Utc};
use rusqlite::params;

/// Optional project/service narrowing for `QueryContainerMetrics`.
#[derive(Debug, Clone, Default)]
pub struct ContainerMetricsFilter {
    pub project: Option<String>,
    pub service: Option<String>,
}

impl Store {
    /// Inserts a single host metric sample. A no-op that returns
    /// immediately is not meaningful here since host is always a singleton;
    /// still runs in its own transaction per the "single transaction per
    /// call" contract.
    pub async fn insert_host_metrics(&self, m: HostMetrics) -> AgentResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO host_metrics
                 (ts, cpu_percent, memory_percent, memory_used_bytes, memory_total_bytes, swap_percent, load1, load5, load15)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    ts_to_i64(m.ts),
                    m.cpu_percent,
                    m.memory_percent,
                    m.memory_used_bytes as i64,
                    m.memory_total_bytes as i64,
                    m.swap_percent,
                    m.load1,
                    m.load5,
                    m.load15,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Inserts a batch of disk samples for one tick in a single transaction.
    /// Empty input returns success without touching the store.
    pub async fn insert_disk_metrics(&self, rows: Vec<DiskMetrics>) -> AgentResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO disk_metrics (ts, mountpoint, disk_percent, used_bytes, total_bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for m in &rows {
                    stmt.execute(params![
                        ts_to_i64(m.ts),
                        m.mountpoint,
                        m.disk_percent,
                        m.used_bytes as i64,
                        m.total_bytes as i64,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Inserts a batch of network interface samples for one tick.
    pub async fn insert_net_metrics(&self, rows: Vec<NetMetrics>) -> AgentResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO net_metrics (ts, interface, rx_bytes, tx_bytes) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for m in &rows {
                    stmt.execute(params![ts_to_i64(m.ts), m.interface, m.rx_bytes as i64, m.tx_bytes as i64])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Inserts a batch of per-container samples for one tick.
    pub async fn insert_container_metrics(&self, rows: Vec<ContainerMetrics>) -> AgentResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO container_metrics
                     (ts, container_id, container_name, project, service, state, health, cpu_percent, memory_percent, restart_count, exit_code)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for m in &rows {
                    stmt.execute(params![
                        ts_to_i64(m.ts),
                        m.container_id,
                        m.container_name,
                        m.project,
                        m.service,
                        m.state.to_string(),
                        m.health,
                        m.cpu_percent,
                        m.memory_percent,
                        m.restart_count,
                        m.exit_code,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn query_host_metrics(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AgentResult<Vec<HostMetrics>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ts, cpu_percent, memory_percent, memory_used_bytes, memory_total_bytes, swap_percent, load1, load5, load15
                 FROM host_metrics WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC",
            )?;
            let rows = stmt
                .query_map(params![ts_to_i64(start), ts_to_i64(end)], |r| {
                    Ok(HostMetrics {
                        ts: i64_to_ts(r.get(0)?),
                        cpu_percent: r.get(1)?,
                        memory_percent: r.get(2)?,
                        memory_used_bytes: r.get::<_, i64>(3)? as u64,
                        memory_total_bytes: r.get::<_, i64>(4)? as u64,
                        swap_percent: r.get(5)?,
                        load1: r.get(6)?,
                        load5: r.get(7)?,
                        load15: r.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn query_disk_metrics(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AgentResult<Vec<DiskMetrics>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ts, mountpoint, disk_percent, used_bytes, total_bytes
                 FROM disk_metrics WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC",
            )?;
            let rows = stmt
                .query_map(params![ts_to_i64(start), ts_to_i64(end)], |r| {
                    Ok(DiskMetrics {
                        ts: i64_to_ts(r.get(0)?),
                        mountpoint: r.get(1)?,
                        disk_percent: r.get(2)?,
                        used_bytes: r.get::<_, i64>(3)? as u64,
                        total_bytes: r.get::<_, i64>(4)? as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn query_net_metrics(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> AgentResult<Vec<NetMetrics>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ts, interface, rx_bytes, tx_bytes FROM net_metrics WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC",
            )?;
            let rows = stmt
                .query_map(params![ts_to_i64(start), ts_to_i64(end)], |r| {
                    Ok(NetMetrics {
                        ts: i64_to_ts(r.get(0)?),
                        interface: r.get(1)?,
                        rx_bytes: r.get::<_, i64>(2)? as u64,
                        tx_bytes: r.get::<_, i64>(3)? as u64,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn query_container_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: ContainerMetricsFilter,
    ) -> AgentResult<Vec<ContainerMetrics>> {
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT ts, container_id, container_name, project, service, state, health, cpu_percent, memory_percent, restart_count, exit_code
                 FROM container_metrics WHERE ts >= ?1 AND ts <= ?2",
            );
            let mut bound: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(ts_to_i64(start)), Box::new(ts_to_i64(end))];
            if let Some(project) = &filter.project {
                sql.push_str(" AND project = ?3");
                bound.push(Box::new(project.clone()));
            }
            if let Some(service) = &filter.service {
                sql.push_str(&format!(" AND service = ?{}", bound.len() + 1));
                bound.push(Box::new(service.clone()));
            }
            sql.push_str(" ORDER BY ts ASC");

            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params_ref.as_slice(), |r| {
                    let state_str: String = r.get(5)?;
                    Ok(ContainerMetrics {
                        ts: i64_to_ts(r.get(0)?),
                        container_id: r.get(1)?,
                        container_name: r.get(2)?,
                        project: r.get(3)?,
                        service: r.get(4)?,
                        state: parse_container_state(&state_str),
                        health: r.get(6)?,
                        cpu_percent: r.get(7)?,
                        memory_percent: r.get(8)?,
                        restart_count: r.get(9)?,
                        exit_code: r.get(10)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn parse_container_state(s: &str) -> ContainerState {
    match s {
        "created" => ContainerState::Created,
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "restarting" => ContainerState::Restarting,
        "exited" => ContainerState::Exited,
        "destroyed" => ContainerState::Destroyed,
        _ => ContainerState::Unknown,
    }
}
