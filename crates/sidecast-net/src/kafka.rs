//! Kafka producer/consumer boundary: a serialization adapter only, per
//! spec section 1 ("the Kafka producer/consumer: a serialization
//! boundary only"). See spec section 6 for the JSON envelope and
//! `kafka.go`'s `Dump()` for the binary fallback this mirrors.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use sidecast_core::{codec, http, Input, Message, MessageId, MessageKind, Output, PluginError};

use crate::error::DispatchError;

/// JSON envelope sent/received when `UseJSON` is set, matching
/// `kafka.go`'s `KafkaMessage` field names exactly.
#[derive(Debug, Serialize, Deserialize)]
pub struct KafkaEnvelope {
    #[serde(rename = "Req_Type")]
    pub req_type: String,
    #[serde(rename = "Req_ID")]
    pub req_id: String,
    #[serde(rename = "Req_Ts")]
    pub req_ts: String,
    #[serde(rename = "Req_Method")]
    pub req_method: String,
    #[serde(rename = "Req_URL")]
    pub req_url: String,
    #[serde(rename = "Req_Headers")]
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub req_headers: std::collections::HashMap<String, String>,
    #[serde(rename = "Req_Body")]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub req_body: String,
}

impl KafkaEnvelope {
    fn from_message(msg: &Message) -> Self {
        let method = http::method(&msg.payload)
            .map(|m| String::from_utf8_lossy(m).into_owned())
            .unwrap_or_default();
        let url = http::path(&msg.payload)
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default();
        let headers = http::headers(&msg.payload).into_iter().collect();
        let body = String::from_utf8_lossy(http::body(&msg.payload)).into_owned();

        Self {
            req_type: match msg.kind {
                MessageKind::Request => "1".to_string(),
                MessageKind::Response => "2".to_string(),
                MessageKind::ReplayedResponse => "3".to_string(),
            },
            req_id: msg.id.to_string(),
            req_ts: msg.timestamp.to_string(),
            req_method: method,
            req_url: url,
            req_headers: headers,
            req_body: body,
        }
    }

    fn into_message(self) -> Result<Message, DispatchError> {
        let kind = match self.req_type.as_str() {
            "1" => MessageKind::Request,
            "2" => MessageKind::Response,
            "3" => MessageKind::ReplayedResponse,
            other => return Err(DispatchError::Parse(format!("unknown Req_Type {other:?}"))),
        };
        let id: MessageId = self
            .req_id
            .parse()
            .map_err(|_| DispatchError::Parse(format!("invalid Req_ID {:?}", self.req_id)))?;
        let timestamp: i64 = self
            .req_ts
            .parse()
            .map_err(|_| DispatchError::Parse(format!("invalid Req_Ts {:?}", self.req_ts)))?;

        let mut payload = format!("{} {} HTTP/1.1\r\n", self.req_method, self.req_url);
        for (name, value) in &self.req_headers {
            payload.push_str(&format!("{name}: {value}\r\n"));
        }
        payload.push_str("\r\n");
        payload.push_str(&self.req_body);

        Ok(Message {
            kind,
            id,
            timestamp,
            latency: None,
            payload: bytes::Bytes::from(payload.into_bytes()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KafkaFormat {
    Json,
    /// Raw encoded frame bytes, matching `Dump()`'s fallback path.
    Binary,
}

pub struct KafkaOutputConfig {
    pub brokers: String,
    pub topic: String,
    pub format: KafkaFormat,
}

pub struct KafkaOutput {
    producer: FutureProducer,
    topic: String,
    format: KafkaFormat,
}

impl KafkaOutput {
    pub fn new(config: KafkaOutputConfig) -> Result<Self, PluginError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| PluginError::StartFailed(e.to_string()))?;
        Ok(Self {
            producer,
            topic: config.topic,
            format: config.format,
        })
    }
}

#[async_trait]
impl Output for KafkaOutput {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        let payload = match self.format {
            KafkaFormat::Json => serde_json::to_vec(&KafkaEnvelope::from_message(msg))
                .map_err(|e| PluginError::Other(e.to_string()))?,
            KafkaFormat::Binary => codec::encode(msg).to_vec(),
        };
        let key = msg.id.to_string();
        let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);
        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(e, _)| PluginError::Other(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn name(&self) -> String {
        format!("kafka({})", self.topic)
    }
}

pub struct KafkaInputConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub format: KafkaFormat,
}

pub struct KafkaInput {
    consumer: StreamConsumer,
    format: KafkaFormat,
}

impl KafkaInput {
    pub fn new(config: KafkaInputConfig) -> Result<Self, PluginError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| PluginError::StartFailed(e.to_string()))?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| PluginError::StartFailed(e.to_string()))?;
        Ok(Self { consumer, format: config.format })
    }
}

#[async_trait]
impl Input for KafkaInput {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        use rdkafka::message::Message as _;
        let borrowed = self
            .consumer
            .recv()
            .await
            .map_err(|e| PluginError::Other(e.to_string()))?;
        let Some(payload) = borrowed.payload() else {
            return Ok(None);
        };

        let msg = match self.format {
            KafkaFormat::Json => {
                let envelope: KafkaEnvelope =
                    serde_json::from_slice(payload).map_err(|e| PluginError::Other(e.to_string()))?;
                envelope.into_message().map_err(|e| PluginError::Other(e.to_string()))?
            }
            KafkaFormat::Binary => codec::decode(payload).map_err(PluginError::from)?,
        };
        Ok(Some(msg))
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn name(&self) -> String {
        "kafka".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = Message {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: 123,
            latency: None,
            payload: Bytes::from_static(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n"),
        };
        let envelope = KafkaEnvelope::from_message(&msg);
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: KafkaEnvelope = serde_json::from_str(&json).unwrap();
        let back = parsed.into_message().unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.timestamp, msg.timestamp);
        assert_eq!(http::path(&back.payload), Some(b"/x".as_ref()));
    }
}
