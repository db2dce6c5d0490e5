use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no files match pattern {0:?}")]
    NoMatchingFiles(String),
    #[error("failed to open {0:?}: {1}")]
    Open(String, String),
    #[error("failed to read {0:?}: {1}")]
    Read(String, String),
    #[error("failed to write {0:?}: {1}")]
    Write(String, String),
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("invalid s3 path {0:?}, expected s3://bucket/key")]
    InvalidS3Path(String),
}
