use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 24-hex-character identifier pairing requests with later responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub [u8; 12]);

impl MessageId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Derive a stable partition key for the Kafka output from this id.
    pub fn partition_key(&self) -> u32 {
        self.0
            .iter()
            .fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u32))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for MessageId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 {
            return Err("message id must be 24 hex characters");
        }
        let mut bytes = [0u8; 12];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| "invalid hex digit")?;
        }
        Ok(Self(bytes))
    }
}

/// The three kinds of Message that flow through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
    ReplayedResponse,
}

impl MessageKind {
    pub fn as_byte(self) -> u8 {
        match self {
            MessageKind::Request => b'1',
            MessageKind::Response => b'2',
            MessageKind::ReplayedResponse => b'3',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'1' => Some(MessageKind::Request),
            b'2' => Some(MessageKind::Response),
            b'3' => Some(MessageKind::ReplayedResponse),
            _ => None,
        }
    }
}

/// The unit that flows through the pipeline: kind, id, timing and raw wire bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub id: MessageId,
    /// Nanoseconds since epoch, captured at ingestion.
    pub timestamp: i64,
    /// Nanoseconds; present only for responses.
    pub latency: Option<i64>,
    /// Raw HTTP/1.x wire bytes: request-line or status-line, headers, CRLFCRLF, body.
    pub payload: Bytes,
}

impl Message {
    pub fn new_request(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: now_nanos(),
            latency: None,
            payload: payload.into(),
        }
    }

    pub fn new_response(id: MessageId, request_ts: i64, payload: impl Into<Bytes>) -> Self {
        let now = now_nanos();
        Self {
            kind: MessageKind::Response,
            id,
            timestamp: now,
            latency: Some(now - request_ts),
            payload: payload.into(),
        }
    }
}

pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_round_trips_through_display_and_from_str() {
        let id = MessageId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 24);
        let parsed: MessageId = text.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn partition_key_is_deterministic() {
        let id = MessageId::generate();
        assert_eq!(id.partition_key(), id.partition_key());
    }
}
