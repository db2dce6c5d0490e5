use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start capture: {0}")]
    StartFailed(String),
    #[error("failed to stop capture: {0}")]
    StopFailed(String),
    #[error("capture error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame header missing fields: {0:?}")]
    MalformedHeader(String),
    #[error("frame header has invalid kind byte: {0}")]
    InvalidKind(u8),
    #[error("frame header has non-integer timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("unexpected end of stream while reading frame")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum ModifierError {
    #[error("invalid regex in modifier rule: {0}")]
    Regex(String),
    #[error("invalid rewrite template: {0}")]
    Template(String),
}

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid limiter spec {0:?}, expected `<N>` or `<N>%`")]
    InvalidSpec(String),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to start plugin: {0}")]
    StartFailed(String),
    #[error("failed to stop plugin: {0}")]
    StopFailed(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("plugin error: {0}")]
    Other(String),
}
