// tests/unit_protocol_test.rs

//! `EnvelopeCodec` exercised over a mocked duplex stream instead of a real
//! socket, so decoding across partial reads can be driven deterministically.

use futures::StreamExt;
use odin_agent::server::protocol::{Envelope, EnvelopeCodec};
use tokio_util::codec::Framed;

#[tokio::test]
async fn decodes_one_envelope_delivered_across_two_reads() {
    let mut codec = EnvelopeCodec;
    let mut encoded = bytes::BytesMut::new();
    tokio_util::codec::Encoder::encode(
        &mut codec,
        Envelope { kind: "result".to_string(), id: 42, body: serde_json::json!({"ok": true}) },
        &mut encoded,
    )
    .unwrap();
    let encoded = encoded.freeze();
    let split = encoded.len() / 2;

    let mock = tokio_test::io::Builder::new().read(&encoded[..split]).read(&encoded[split..]).build();

    let mut framed = Framed::new(mock, EnvelopeCodec);
    let envelope = framed.next().await.unwrap().unwrap();
    assert_eq!(envelope.kind, "result");
    assert_eq!(envelope.id, 42);
    assert_eq!(envelope.body["ok"], true);
}

#[tokio::test]
async fn decodes_two_envelopes_back_to_back_in_one_read() {
    let mut codec = EnvelopeCodec;
    let mut encoded = bytes::BytesMut::new();
    tokio_util::codec::Encoder::encode(&mut codec, Envelope { kind: "result".to_string(), id: 1, body: serde_json::Value::Null }, &mut encoded)
        .unwrap();
    tokio_util::codec::Encoder::encode(&mut codec, Envelope { kind: "result".to_string(), id: 2, body: serde_json::Value::Null }, &mut encoded)
        .unwrap();

    let mock = tokio_test::io::Builder::new().read(&encoded).build();
    let mut framed = Framed::new(mock, EnvelopeCodec);

    let first = framed.next().await.unwrap().unwrap();
    let second = framed.next().await.unwrap().unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
}
