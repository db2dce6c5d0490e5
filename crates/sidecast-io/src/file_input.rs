//! File input: glob/S3 expansion, transparent gzip, merge-by-timestamp
//! replay. See spec section 4.4.

use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use sidecast_core::codec;
use sidecast_core::{Input, Message, PluginError};

use crate::error::StorageError;
use crate::object_store::{parse_s3_url, ObjectStore};

/// One open source file, pre-fetching its next frame the way the
/// original implementation's `parseNext` does: `take()` returns the
/// currently buffered message and immediately primes the next one.
struct Reader {
    source: Box<dyn Read + Send>,
    buf: Vec<u8>,
    pending: Option<Message>,
    path: String,
}

impl Reader {
    fn new(path: String, source: Box<dyn Read + Send>) -> Result<Self, StorageError> {
        let mut r = Self {
            source,
            buf: Vec::new(),
            pending: None,
            path,
        };
        r.advance()?;
        Ok(r)
    }

    fn advance(&mut self) -> Result<(), StorageError> {
        loop {
            match codec::try_decode(&self.buf) {
                Ok(Some((msg, consumed))) => {
                    self.buf.drain(..consumed);
                    self.pending = Some(msg);
                    return Ok(());
                }
                Ok(None) => {
                    let mut chunk = [0u8; 16 * 1024];
                    let n = self
                        .source
                        .read(&mut chunk)
                        .map_err(|e| StorageError::Read(self.path.clone(), e.to_string()))?;
                    if n == 0 {
                        self.pending = None;
                        return Ok(());
                    }
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(StorageError::Read(self.path.clone(), e.to_string())),
            }
        }
    }

    fn timestamp(&self) -> Option<i64> {
        self.pending.as_ref().map(|m| m.timestamp)
    }

    fn take(&mut self) -> Result<Option<Message>, StorageError> {
        let msg = self.pending.take();
        self.advance()?;
        Ok(msg)
    }
}

fn open_local(path: &str) -> Result<Box<dyn Read + Send>, StorageError> {
    let file = File::open(path).map_err(|e| StorageError::Open(path.to_string(), e.to_string()))?;
    if path.ends_with(".gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(std::io::BufReader::new(file)))
    }
}

fn open_bytes(path: &str, data: Vec<u8>) -> Box<dyn Read + Send> {
    let cursor = std::io::Cursor::new(data);
    if path.ends_with(".gz") {
        Box::new(GzDecoder::new(cursor))
    } else {
        Box::new(cursor)
    }
}

#[derive(Debug, Clone)]
pub struct FileInputConfig {
    pub pattern: String,
    pub looped: bool,
    pub speed_factor: f64,
}

/// Replays frames from one or more `.gor` files (or gzipped variants,
/// local or `s3://`), merged in timestamp order. Implements [`Input`].
pub struct FileInput {
    config: FileInputConfig,
    object_store: Option<Arc<dyn ObjectStore>>,
    readers: Vec<Reader>,
    last_ts: Option<i64>,
    exhausted: bool,
}

impl FileInput {
    pub async fn open(
        config: FileInputConfig,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, StorageError> {
        let mut input = Self {
            config,
            object_store,
            readers: Vec::new(),
            last_ts: None,
            exhausted: false,
        };
        input.reopen().await?;
        Ok(input)
    }

    async fn reopen(&mut self) -> Result<(), StorageError> {
        let matches = self.expand().await?;
        if matches.is_empty() {
            return Err(StorageError::NoMatchingFiles(self.config.pattern.clone()));
        }

        let mut readers = Vec::with_capacity(matches.len());
        for path in matches {
            let source = if path.starts_with("s3://") {
                let (bucket, key) = parse_s3_url(&path)?;
                let store = self.object_store.as_ref().ok_or_else(|| {
                    StorageError::ObjectStore("s3:// pattern given without an object store configured".into())
                })?;
                let data = store.get(&bucket, &key).await?;
                open_bytes(&path, data)
            } else {
                open_local(&path)?
            };
            readers.push(Reader::new(path, source)?);
        }

        self.readers = readers;
        Ok(())
    }

    async fn expand(&self) -> Result<Vec<String>, StorageError> {
        if self.config.pattern.starts_with("s3://") {
            let (bucket, prefix) = parse_s3_url(&self.config.pattern)?;
            let store = self.object_store.as_ref().ok_or_else(|| {
                StorageError::ObjectStore("s3:// pattern given without an object store configured".into())
            })?;
            let keys = store.list(&bucket, &prefix).await?;
            Ok(keys.into_iter().map(|k| format!("s3://{bucket}/{k}")).collect())
        } else {
            let matches: Vec<String> = glob::glob(&self.config.pattern)
                .map_err(|e| StorageError::NoMatchingFiles(e.to_string()))?
                .filter_map(Result::ok)
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            Ok(matches)
        }
    }

    /// Reader holding the smallest pending timestamp, tie-broken by file order.
    fn next_reader_index(&self) -> Option<usize> {
        self.readers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.pending.is_some())
            .min_by_key(|(idx, r)| (r.timestamp().unwrap(), *idx))
            .map(|(idx, _)| idx)
    }
}

#[async_trait]
impl Input for FileInput {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        loop {
            let Some(idx) = self.next_reader_index() else {
                if self.config.looped {
                    self.reopen().await.map_err(|e| PluginError::Other(e.to_string()))?;
                    self.last_ts = None;
                    continue;
                }
                if self.exhausted {
                    return Ok(None);
                }
                self.exhausted = true;
                tokio::time::sleep(Duration::from_secs(1)).await;
                return Ok(None);
            };

            let ts = self.readers[idx].timestamp().unwrap();
            if let Some(last) = self.last_ts {
                let mut diff = ts - last;
                if self.config.speed_factor != 1.0 {
                    diff = (diff as f64 / self.config.speed_factor) as i64;
                }
                if diff > 0 {
                    tokio::time::sleep(Duration::from_nanos(diff as u64)).await;
                }
            }
            self.last_ts = Some(ts);

            let msg = self.readers[idx].take().map_err(|e| PluginError::Other(e.to_string()))?;
            self.readers.retain(|r| r.pending.is_some());
            if let Some(msg) = msg {
                return Ok(Some(msg));
            }
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.readers.clear();
        Ok(())
    }

    fn name(&self) -> String {
        format!("file({})", self.config.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecast_core::{Message, MessageId, MessageKind};
    use std::io::Write as _;

    fn frame(kind: MessageKind, ts: i64) -> bytes::Bytes {
        codec::encode(&Message {
            kind,
            id: MessageId::generate(),
            timestamp: ts,
            latency: None,
            payload: bytes::Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"),
        })
    }

    #[tokio::test]
    async fn replays_frames_from_a_single_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.gor");
        let mut file = File::create(&path).unwrap();
        file.write_all(&frame(MessageKind::Request, 100)).unwrap();
        file.write_all(&frame(MessageKind::Request, 200)).unwrap();

        let mut input = FileInput::open(
            FileInputConfig {
                pattern: path.to_string_lossy().to_string(),
                looped: false,
                speed_factor: 1_000_000_000.0,
            },
            None,
        )
        .await
        .unwrap();

        let first = input.read().await.unwrap().unwrap();
        assert_eq!(first.timestamp, 100);
        let second = input.read().await.unwrap().unwrap();
        assert_eq!(second.timestamp, 200);
        assert!(input.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn merges_two_files_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.gor");
        let b = dir.path().join("b.gor");
        File::create(&a).unwrap().write_all(&frame(MessageKind::Request, 200)).unwrap();
        File::create(&b).unwrap().write_all(&frame(MessageKind::Request, 100)).unwrap();

        let pattern = dir.path().join("*.gor").to_string_lossy().to_string();
        let mut input = FileInput::open(
            FileInputConfig {
                pattern,
                looped: false,
                speed_factor: 1_000_000_000.0,
            },
            None,
        )
        .await
        .unwrap();

        let first = input.read().await.unwrap().unwrap();
        assert_eq!(first.timestamp, 100);
        let second = input.read().await.unwrap().unwrap();
        assert_eq!(second.timestamp, 200);
    }

    #[tokio::test]
    async fn missing_pattern_errors_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("nope-*.gor").to_string_lossy().to_string();
        let err = FileInput::open(
            FileInputConfig {
                pattern,
                looped: false,
                speed_factor: 1.0,
            },
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::NoMatchingFiles(_)));
    }
}
