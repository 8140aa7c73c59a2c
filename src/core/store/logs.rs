// src/core/store/logs.rs

//! Log insertion, `QueryLogs`/`CountLogs`, and the search-string policy:
//! regex when the string parses as one, else an escaped LIKE substring match.

use super::{Store, i64_to_ts, ts_to_i64};
use crate::core::errors::AgentResult;
use crate::core::model::{LogEntry, LogStream};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use rusqlite::params;

/// Filter accepted by `QueryLogs`/`CountLogs` (spec §6 `query:logs`).
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub container_id: Option<String>,
    pub container_ids: Vec<String>,
    pub project: Option<String>,
    pub service: Option<String>,
    pub stream: Option<LogStream>,
    pub search: Option<String>,
    pub level: Option<String>,
    pub limit: Option<i64>,
    /// Overrides the regex-vs-literal auto-detect below. `None` (the
    /// `query:logs`/`count:logs` default) keeps the auto-detect policy;
    /// alert rule evaluation passes `Some(rule.match_is_regex)` so a rule
    /// author's explicit choice isn't second-guessed by the heuristic.
    pub search_regex: Option<bool>,
}

/// Escapes `\`, `%`, `_` for a `LIKE ... ESCAPE '\'` substring match.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == '%' || c == '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Tries to compile `s` as a case-insensitive regex. Returns `None` if it
/// isn't a valid pattern, in which case the caller falls back to a literal
/// substring match.
fn try_as_regex(s: &str) -> Option<Regex> {
    RegexBuilder::new(s).case_insensitive(true).build().ok()
}

/// Resolves whether `search` should be matched as a regex, honoring a
/// filter's explicit `search_regex` override before falling back to
/// `try_as_regex`'s auto-detect. `Some(false)` always means literal, even if
/// `search` happens to parse as a valid pattern.
fn search_as_regex(search: &str, force: Option<bool>) -> Option<Regex> {
    match force {
        Some(true) => RegexBuilder::new(search).case_insensitive(true).build().ok(),
        Some(false) => None,
        None => try_as_regex(search),
    }
}

impl Store {
    pub async fn insert_log_entries(&self, entries: Vec<LogEntry>) -> AgentResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO logs (ts, container_id, container_name, project, service, stream, raw, level, message)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for e in &entries {
                    stmt.execute(params![
                        ts_to_i64(e.ts),
                        e.container_id,
                        e.container_name,
                        e.project,
                        e.service,
                        e.stream.to_string(),
                        e.raw,
                        e.level,
                        e.message,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn query_logs(&self, filter: LogFilter) -> AgentResult<Vec<LogEntry>> {
        self.with_conn(move |conn| {
            let (sql, bound) = build_log_query(&filter, false);
            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows: Vec<LogEntry> = stmt
                .query_map(params_ref.as_slice(), |r| {
                    let stream_str: String = r.get(5)?;
                    Ok(LogEntry {
                        ts: i64_to_ts(r.get(0)?),
                        container_id: r.get(1)?,
                        container_name: r.get(2)?,
                        project: r.get(3)?,
                        service: r.get(4)?,
                        stream: if stream_str == "stderr" { LogStream::Stderr } else { LogStream::Stdout },
                        raw: r.get(6)?,
                        level: r.get(7)?,
                        message: r.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            // The regex path can't be pushed into SQL (SQLite has no native
            // regex function without a loadable extension), so when the
            // search string parses as a regex we filter in Rust instead of
            // relying on the LIKE clause already applied by build_log_query.
            if let Some(search) = &filter.search
                && let Some(re) = search_as_regex(search, filter.search_regex)
            {
                return Ok(rows.into_iter().filter(|e| re.is_match(&e.message)).collect());
            }
            Ok(rows)
        })
        .await
    }

    pub async fn count_logs(&self, filter: LogFilter) -> AgentResult<u64> {
        self.with_conn(move |conn| {
            if let Some(search) = filter.search.clone()
                && let Some(re) = search_as_regex(&search, filter.search_regex)
            {
                // Fall back to loading + regex counting in Rust; log volumes
                // within one retention window are bounded enough for this.
                let mut unfiltered = filter.clone();
                unfiltered.search = None;
                let (sql, bound) = build_log_query(&unfiltered, false);
                let mut stmt = conn.prepare(&sql)?;
                let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                let count = stmt
                    .query_map(params_ref.as_slice(), |r| r.get::<_, String>(8))?
                    .filter_map(|m| m.ok())
                    .filter(|msg| re.is_match(msg))
                    .count();
                return Ok(count as u64);
            }

            let (sql, bound) = build_log_query(&filter, true);
            let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let count: i64 = conn.query_row(&sql, params_ref.as_slice(), |r| r.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

fn build_log_query(filter: &LogFilter, count_only: bool) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut sql = if count_only {
        String::from("SELECT COUNT(*) FROM logs WHERE ts >= ?1 AND ts <= ?2")
    } else {
        String::from(
            "SELECT ts, container_id, container_name, project, service, stream, raw, level, message
             FROM logs WHERE ts >= ?1 AND ts <= ?2",
        )
    };
    let mut bound: Vec<Box<dyn rusqlite::ToSql>> =
        vec![Box::new(ts_to_i64(filter.start)), Box::new(ts_to_i64(filter.end))];

    if let Some(id) = &filter.container_id {
        bound.push(Box::new(id.clone()));
        sql.push_str(&format!(" AND container_id = ?{}", bound.len()));
    }
    if !filter.container_ids.is_empty() {
        let placeholders: Vec<String> = filter
            .container_ids
            .iter()
            .map(|id| {
                bound.push(Box::new(id.clone()));
                format!("?{}", bound.len())
            })
            .collect();
        sql.push_str(&format!(" AND container_id IN ({})", placeholders.join(", ")));
    }
    if let Some(project) = &filter.project {
        bound.push(Box::new(project.clone()));
        sql.push_str(&format!(" AND project = ?{}", bound.len()));
    }
    if let Some(service) = &filter.service {
        bound.push(Box::new(service.clone()));
        sql.push_str(&format!(" AND service = ?{}", bound.len()));
    }
    if let Some(stream) = &filter.stream {
        bound.push(Box::new(stream.to_string()));
        sql.push_str(&format!(" AND stream = ?{}", bound.len()));
    }
    if let Some(level) = &filter.level {
        bound.push(Box::new(level.clone()));
        sql.push_str(&format!(" AND level = ?{}", bound.len()));
    }
    // Only add the SQL-side LIKE clause when the search string does NOT
    // parse as a regex; regex matching happens in Rust after the fetch.
    if let Some(search) = &filter.search
        && search_as_regex(search, filter.search_regex).is_none()
    {
        bound.push(Box::new(format!("%{}%", escape_like(search))));
        sql.push_str(&format!(" AND message LIKE ?{} ESCAPE '\\'", bound.len()));
    }

    if !count_only {
        sql.push_str(" ORDER BY ts ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
    }

    (sql, bound)
}
