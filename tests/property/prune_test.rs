// tests/property/prune_test.rs

//! `Store::prune` invariants from spec.md §8: rows strictly older than the
//! retention cutoff are removed, rows at or after it are untouched, and a
//! second prune pass over the same cutoff is a no-op.

use chrono::Duration as ChronoDuration;
use odin_agent::core::model::HostMetrics;
use odin_agent::core::store::Store;
use proptest::prelude::*;

fn sample(ts: chrono::DateTime<chrono::Utc>) -> HostMetrics {
    HostMetrics {
        ts,
        cpu_percent: 0.0,
        memory_percent: 0.0,
        memory_used_bytes: 0,
        memory_total_bytes: 0,
        swap_percent: 0.0,
        load1: 0.0,
        load5: 0.0,
        load15: 0.0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 20, ..ProptestConfig::default() })]

    #[test]
    fn prune_removes_exactly_the_rows_older_than_cutoff(
        retention_days in 1i64..30,
        offsets_days in prop::collection::vec(-60i64..60, 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::open(dir.path().join("agent.db")).await.unwrap();
            let now = chrono::Utc::now();

            let mut expected_remaining = 0usize;
            for offset in &offsets_days {
                let ts = now - ChronoDuration::days(*offset);
                store.insert_host_metrics(sample(ts)).await.unwrap();
                if *offset <= retention_days {
                    expected_remaining += 1;
                }
            }

            store.prune(retention_days, now).await.unwrap();
            let remaining = store.query_host_metrics(now - ChronoDuration::days(3650), now + ChronoDuration::days(1)).await.unwrap();
            assert_eq!(remaining.len(), expected_remaining);

            let second_pass_deleted = store.prune(retention_days, now).await.unwrap();
            assert_eq!(second_pass_deleted, 0, "a repeated prune over the same cutoff must delete nothing further");
        });
    }
}
