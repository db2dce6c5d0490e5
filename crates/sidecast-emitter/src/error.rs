use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("failed to spawn middleware {0:?}: {1}")]
    MiddlewareSpawn(String, String),
    #[error("middleware stdin/stdout not piped")]
    MiddlewarePipes,
}
