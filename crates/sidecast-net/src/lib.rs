//! HTTP output dispatch, elastic worker pool, and the Kafka
//! producer/consumer serialization boundary. See spec section 4.8.

pub mod error;
pub mod http_output;
pub mod kafka;
pub mod reporter;
pub mod worker_pool;

pub use error::DispatchError;
pub use http_output::{HttpOutput, HttpOutputConfig, HttpOutputHandle};
pub use kafka::{KafkaEnvelope, KafkaFormat, KafkaInput, KafkaInputConfig, KafkaOutput, KafkaOutputConfig};
pub use reporter::ResponseReporter;
pub use worker_pool::WorkerCount;
