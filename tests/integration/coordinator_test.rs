// tests/integration/coordinator_test.rs

//! Coordinator tick-cycle coverage: `Coordinator::start` performs one
//! immediate tick before returning, so a fresh coordinator already reflects
//! its first collection pass.

use super::test_helpers::TestAgent;
use chrono::{Duration as ChronoDuration, Utc};
use odin_agent::core::store::ContainerMetricsFilter;

#[tokio::test]
async fn startup_tick_persists_host_metrics_even_without_a_docker_daemon() {
    let agent = TestAgent::start().await;

    let now = Utc::now();
    let rows = agent
        .coordinator
        .store()
        .query_host_metrics(now - ChronoDuration::minutes(5), now + ChronoDuration::minutes(1))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "the startup tick must persist exactly one host metrics sample");

    agent.shutdown().await;
}

#[tokio::test]
async fn startup_tick_survives_unreachable_docker_socket() {
    // Coordinator::start's own call to tick() already exercises the
    // container-collection failure path (docker.socket points nowhere);
    // the fact that start() returned Ok at all is the assertion.
    let agent = TestAgent::start().await;
    let now = Utc::now();
    let containers = agent
        .coordinator
        .store()
        .query_container_metrics(now - ChronoDuration::minutes(5), now + ChronoDuration::minutes(1), ContainerMetricsFilter::default())
        .await
        .unwrap();
    assert!(containers.is_empty(), "no container rows should be inserted when collection fails");
    agent.shutdown().await;
}
