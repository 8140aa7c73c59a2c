// tests/integration/socket_test.rs

//! Exercises the real Unix-socket wire protocol end to end: connect, send a
//! query envelope, read back a framed response.

use super::test_helpers::TestAgent;
use futures::{SinkExt, StreamExt};
use odin_agent::server::protocol::{Envelope, request, response};
use serde_json::json;

#[tokio::test]
async fn query_alert_rules_round_trips_over_the_socket() {
    let agent = TestAgent::start().await;
    let mut conn = agent.connect().await;

    conn.send(Envelope { kind: request::QUERY_ALERT_RULES.to_string(), id: 1, body: serde_json::Value::Null })
        .await
        .unwrap();

    let reply = conn.next().await.unwrap().unwrap();
    assert_eq!(reply.kind, response::RESULT);
    assert_eq!(reply.id, 1);
    assert!(reply.body.get("rules").is_some(), "result body must carry a rules array");
    assert_eq!(reply.body["rules"], json!([]), "no alert rules were configured");

    agent.shutdown().await;
}

#[tokio::test]
async fn unknown_message_type_gets_an_error_envelope() {
    let agent = TestAgent::start().await;
    let mut conn = agent.connect().await;

    conn.send(Envelope { kind: "bogus:request".to_string(), id: 9, body: serde_json::Value::Null })
        .await
        .unwrap();

    let reply = conn.next().await.unwrap().unwrap();
    assert_eq!(reply.kind, response::ERROR);
    assert_eq!(reply.id, 9);

    agent.shutdown().await;
}
