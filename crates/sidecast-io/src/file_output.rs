//! File output: path templating, per-second rotation, gzip, buffered
//! writes with periodic flush. See spec section 4.5.
//!
//! All actual disk I/O (rotate/write/flush) runs on a dedicated
//! background task via `spawn_blocking`, never inline on the caller's
//! async task. `write()` just encodes the frame and hands it to that
//! task over a bounded channel (default 256 pending writes); once full,
//! `send` blocks, which is the backpressure the emitter feels.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Local, Timelike};
use flate2::write::GzEncoder;
use flate2::Compression;
use sidecast_core::codec;
use sidecast_core::{Message, Output, PluginError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StorageError;

const PENDING_WRITES_CAPACITY: usize = 256;

enum Writer {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<File>),
}

impl Writer {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Writer::Plain(w) => w.write_all(buf),
            Writer::Gzip(w) => w.write_all(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Writer::Plain(w) => w.flush(),
            Writer::Gzip(w) => w.flush(),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Writer::Plain(mut w) => w.flush(),
            Writer::Gzip(w) => w.finish().map(|_| ()),
        }
    }
}

/// Replace the `%Y %m %d %H %M %S %NS` placeholders with the current
/// local time, recomputed by the caller once per second.
fn render_path(template: &str) -> String {
    let now = Local::now();
    template
        .replace("%NS", &now.nanosecond().to_string())
        .replace("%Y", &now.format("%Y").to_string())
        .replace("%m", &now.format("%m").to_string())
        .replace("%d", &now.format("%d").to_string())
        .replace("%H", &now.format("%H").to_string())
        .replace("%M", &now.format("%M").to_string())
        .replace("%S", &now.format("%S").to_string())
}

/// Owns the blocking file-I/O state; lives entirely inside the
/// background worker task, moved in and out of `spawn_blocking` calls.
struct WorkerState {
    path_template: String,
    current_path: Option<PathBuf>,
    writer: Option<Writer>,
    flush_interval: Duration,
    last_flush: Instant,
    last_name_refresh: Instant,
}

impl WorkerState {
    fn refresh_name_if_due(&mut self) -> PathBuf {
        if self.current_path.is_none() || self.last_name_refresh.elapsed() >= Duration::from_secs(1) {
            self.last_name_refresh = Instant::now();
            PathBuf::from(render_path(&self.path_template))
        } else {
            self.current_path.clone().unwrap()
        }
    }

    fn rotate_if_needed(&mut self, wanted: &PathBuf) -> Result<(), StorageError> {
        if self.current_path.as_ref() == Some(wanted) {
            return Ok(());
        }

        if let Some(writer) = self.writer.take() {
            writer
                .finish()
                .map_err(|e| StorageError::Write(self.current_path.as_ref().unwrap().display().to_string(), e.to_string()))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(wanted)
            .map_err(|e| StorageError::Open(wanted.display().to_string(), e.to_string()))?;

        let writer = if wanted.extension().map(|e| e == "gz").unwrap_or(false) {
            Writer::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Writer::Plain(BufWriter::new(file))
        };

        debug!(path = %wanted.display(), "file output rotated");
        self.writer = Some(writer);
        self.current_path = Some(wanted.clone());
        Ok(())
    }

    fn flush_if_due(&mut self) -> Result<(), StorageError> {
        if self.last_flush.elapsed() >= self.flush_interval {
            self.last_flush = Instant::now();
            if let Some(writer) = self.writer.as_mut() {
                writer
                    .flush()
                    .map_err(|e| StorageError::Write(self.current_path.as_ref().unwrap().display().to_string(), e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Renders the current path, rotates if it changed, writes one
    /// frame, and flushes on schedule, all inline since this runs inside
    /// `spawn_blocking` already. Errors are logged here rather than
    /// surfaced to the caller, which has long since moved on.
    fn handle_frame(mut self, frame: Vec<u8>) -> Self {
        let wanted = self.refresh_name_if_due();
        if let Err(e) = self.rotate_if_needed(&wanted) {
            warn!(path = %wanted.display(), error = %e, "file output rotation failed, dropping frame");
            return self;
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write_all(&frame) {
                warn!(path = %wanted.display(), error = %e, "file output write failed");
            }
        }
        if let Err(e) = self.flush_if_due() {
            warn!(path = %wanted.display(), error = %e, "file output flush failed");
        }
        self
    }

    fn shut_down(self) {
        if let Some(writer) = self.writer {
            if let Err(e) = writer.finish() {
                warn!(error = %e, "file output failed to finish cleanly at close");
            }
        }
    }
}

async fn run_worker(mut state: WorkerState, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        state = match tokio::task::spawn_blocking(move || state.handle_frame(frame)).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "file output worker task panicked, stopping this output");
                return;
            }
        };
    }
    let _ = tokio::task::spawn_blocking(move || state.shut_down()).await;
}

pub struct FileOutput {
    path_template: String,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

impl FileOutput {
    pub fn new(path_template: String, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(PENDING_WRITES_CAPACITY);
        let state = WorkerState {
            path_template: path_template.clone(),
            current_path: None,
            writer: None,
            flush_interval,
            last_flush: Instant::now(),
            last_name_refresh: Instant::now() - Duration::from_secs(1),
        };
        let worker = tokio::spawn(run_worker(state, rx));
        Self { path_template, tx: Some(tx), worker: Some(worker) }
    }
}

#[async_trait]
impl Output for FileOutput {
    /// Encodes the frame and hands it to the background writer.
    /// Blocks here, not on disk I/O, once 256 writes are already
    /// pending — the backpressure spec section 4.5 calls for.
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        let tx = self.tx.as_ref().ok_or_else(|| PluginError::Other("file output already closed".to_string()))?;
        tx.send(codec::encode(msg)).await.map_err(|e| PluginError::Other(format!("file output worker gone: {e}")))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.tx.take(); // drops the sender, letting the worker drain and finish the writer
        if let Some(worker) = self.worker.take() {
            worker.await.map_err(|e| PluginError::Other(format!("file output worker panicked at close: {e}")))?;
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("file({})", self.path_template)
    }
}
