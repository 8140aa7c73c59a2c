// src/server/protocol.rs

//! Wire envelope (spec §6): length-prefixed `{type, id, body}` records.
//! Grounded on the teacher's frame codec shape — a `tokio_util::codec`
//! `Encoder`/`Decoder` pair reading a length prefix before decoding the
//! payload — adapted from a RESP/AOF frame to a single JSON envelope type,
//! since this protocol has no notion of a multi-bulk command.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

/// Hard ceiling on one envelope's encoded size, to bound a malicious or
/// buggy peer's memory footprint.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Request tags (spec §6).
pub mod request {
    pub const SUBSCRIBE_METRICS: &str = "subscribe:metrics";
    pub const SUBSCRIBE_LOGS: &str = "subscribe:logs";
    pub const SUBSCRIBE_ALERTS: &str = "subscribe:alerts";
    pub const SUBSCRIBE_CONTAINERS: &str = "subscribe:containers";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const QUERY_METRICS: &str = "query:metrics";
    pub const QUERY_LOGS: &str = "query:logs";
    pub const QUERY_ALERTS: &str = "query:alerts";
    pub const QUERY_CONTAINERS: &str = "query:containers";
    pub const QUERY_ALERT_RULES: &str = "query:alert_rules";
    pub const QUERY_TRACKING: &str = "query:tracking";
    pub const ACTION_ACK: &str = "action:ack";
    pub const ACTION_SILENCE: &str = "action:silence";
    pub const ACTION_RESTART: &str = "action:restart";
    pub const ACTION_SET_TRACKING: &str = "action:set_tracking";
}

/// Response/event tags (spec §6).
pub mod response {
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const METRICS_UPDATE: &str = "metrics:update";
    pub const LOG_ENTRY: &str = "log:entry";
    pub const ALERT_EVENT: &str = "alert:event";
    pub const CONTAINER_EVENT: &str = "container:event";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: u32,
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    pub fn result(id: u32, body: Value) -> Self {
        Envelope { kind: response::RESULT.to_string(), id, body }
    }

    pub fn error(id: u32, message: impl Into<String>) -> Self {
        Envelope { kind: response::ERROR.to_string(), id, body: serde_json::json!({ "error": message.into() }) }
    }

    /// Server-initiated event; `id` is always 0 per spec §6.
    pub fn event(kind: &str, body: Value) -> Self {
        Envelope { kind: kind.to_string(), id: 0, body }
    }
}

#[derive(Default)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds max {MAX_FRAME_LEN}"),
            ));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let frame = src.split_to(len);
        let envelope: Envelope = serde_json::from_slice(&frame)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("malformed envelope: {e}")))?;
        Ok(Some(envelope))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        if body.len() > MAX_FRAME_LEN {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "encoded envelope exceeds max frame length"));
        }
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_one_envelope() {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::new();
        let original = Envelope { kind: "result".to_string(), id: 7, body: serde_json::json!({"ok": true}) };
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.kind, original.kind);
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.body, original.body);
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::new();
        codec.encode(Envelope { kind: "result".to_string(), id: 1, body: Value::Null }, &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }
}
