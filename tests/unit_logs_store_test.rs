// tests/unit_logs_store_test.rs

//! `query:logs`/`count:logs` keep the regex-vs-literal auto-detect, but a
//! caller (alert rule evaluation) can force either mode via `search_regex`.

use odin_agent::core::model::{LogEntry, LogStream};
use odin_agent::core::store::{LogFilter, Store};
use std::time::Duration as StdDuration;

async fn store_with(messages: &[&str]) -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("agent.db")).await.unwrap();
    let now = chrono::Utc::now();
    let entries = messages
        .iter()
        .map(|m| LogEntry {
            ts: now,
            container_id: "c1".to_string(),
            container_name: "web".to_string(),
            project: "demo".to_string(),
            service: "web".to_string(),
            stream: LogStream::Stdout,
            raw: (*m).to_string(),
            level: "info".to_string(),
            message: (*m).to_string(),
        })
        .collect();
    store.insert_log_entries(entries).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    (store, dir)
}

fn filter(search: &str, search_regex: Option<bool>) -> LogFilter {
    LogFilter {
        start: chrono::Utc::now() - chrono::Duration::minutes(1),
        end: chrono::Utc::now() + chrono::Duration::minutes(1),
        search: Some(search.to_string()),
        search_regex,
        ..Default::default()
    }
}

#[tokio::test]
async fn auto_detect_treats_a_valid_pattern_as_regex_by_default() {
    let (store, _dir) = store_with(&["connection timeout after 30s", "literal oom-killer string"]).await;

    let count = store.count_logs(filter(r"time\w+", None)).await.unwrap();
    assert_eq!(count, 1, "auto-detect must use regex semantics when the search string parses as one");
}

#[tokio::test]
async fn forcing_literal_mode_treats_a_valid_pattern_as_a_plain_substring() {
    let (store, _dir) = store_with(&["connection timeout after 30s", "literal oom-killer string"]).await;

    // `time\w+` parses as a regex, but with search_regex: Some(false) it must
    // be matched as a literal substring (which does not appear in either log).
    let count = store.count_logs(filter(r"time\w+", Some(false))).await.unwrap();
    assert_eq!(count, 0, "search_regex: Some(false) must force literal matching even for a regex-shaped string");
}

#[tokio::test]
async fn forcing_regex_mode_matches_patterns_that_would_otherwise_be_literal() {
    let (store, _dir) = store_with(&["panic: index out of bounds", "all good here"]).await;

    let count = store.count_logs(filter("panic|fatal", Some(true))).await.unwrap();
    assert_eq!(count, 1, "search_regex: Some(true) must compile the search string as a regex");
}
