//! S3-backed listing and fetch for `s3://bucket/prefix` file input globs.
//! See spec section 4.4 and SPEC_FULL section 4's Open Question
//! resolution (full pagination).

use async_trait::async_trait;

use crate::error::StorageError;

/// Abstracts object listing/fetch so `FileInput` doesn't need an AWS SDK
/// dependency to be unit-tested; only the binary wires in [`S3ObjectStore`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Split `s3://bucket/key/prefix` into `(bucket, key)`.
pub fn parse_s3_url(path: &str) -> Result<(String, String), StorageError> {
    let rest = path
        .strip_prefix("s3://")
        .ok_or_else(|| StorageError::InvalidS3Path(path.to_string()))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| StorageError::InvalidS3Path(path.to_string()))?;
    if bucket.is_empty() {
        return Err(StorageError::InvalidS3Path(path.to_string()));
    }
    Ok((bucket.to_string(), key.to_string()))
}

#[cfg(feature = "s3")]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

#[cfg(feature = "s3")]
impl S3ObjectStore {
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
        }
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation_token.take() {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| StorageError::ObjectStore(e.to_string()))?;

            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    keys.push(key.to_string());
                }
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation_token = resp.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;

        Ok(data.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_key() {
        let (bucket, key) = parse_s3_url("s3://my-bucket/path/to/file.gor").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "path/to/file.gor");
    }

    #[test]
    fn rejects_non_s3_path() {
        assert!(parse_s3_url("/local/path").is_err());
    }
}
