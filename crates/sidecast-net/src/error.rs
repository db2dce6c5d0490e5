use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection error: {0}")]
    Connect(String),
    #[error("malformed frame payload: {0}")]
    Parse(String),
    #[error("kafka error: {0}")]
    Kafka(String),
}
