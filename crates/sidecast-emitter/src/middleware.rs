//! External middleware subprocess piping. See spec section 4.9 and §6
//! ("Middleware protocol"): each line on the child's stdin/stdout is a
//! hex-encoded frame; the child may emit zero or more lines per line it
//! receives, so the write side and read side run as independent tasks
//! rather than a synchronous call/response.

use std::process::Stdio;

use sidecast_core::{codec, Message};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::EmitterError;

pub struct Middleware {
    child: Child,
}

impl Middleware {
    /// Spawns `command` (via the platform shell, matching the teacher's
    /// child-process spawning convention) with piped stdin/stdout;
    /// stderr is inherited so the child's diagnostics land on the
    /// parent's stderr, per spec section 6.
    pub fn spawn(command: &str) -> Result<Self, EmitterError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EmitterError::MiddlewareSpawn(command.to_string(), e.to_string()))?;
        Ok(Self { child })
    }

    /// Splits into a writer task (feeds `input_rx` to the child's
    /// stdin, hex-encoded) and a reader task (decodes the child's
    /// stdout into `out_tx`). A third task waits on the child and exits
    /// the whole process with its status once it dies, matching "child
    /// lifetime equals the pipeline's".
    pub fn into_tasks(self, mut input_rx: mpsc::Receiver<Message>, out_tx: mpsc::Sender<Message>) -> Result<(), EmitterError> {
        let Middleware { mut child } = self;
        let mut stdin = child.stdin.take().ok_or(EmitterError::MiddlewarePipes)?;
        let stdout = child.stdout.take().ok_or(EmitterError::MiddlewarePipes)?;

        tokio::spawn(async move {
            while let Some(msg) = input_rx.recv().await {
                let frame = codec::encode(&msg);
                let line = hex::encode(frame);
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
            }
            // Dropping `stdin` here signals EOF to the child.
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match hex::decode(line) {
                            Ok(bytes) => match codec::decode(&bytes) {
                                Ok(msg) => {
                                    if out_tx.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "middleware emitted an undecodable frame"),
                            },
                            Err(e) => warn!(error = %e, "middleware emitted a non-hex line"),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "middleware stdout read error");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    error!(code = ?status.code(), "middleware process exited, shutting down");
                    std::process::exit(status.code().unwrap_or(1));
                }
                Err(e) => {
                    error!(error = %e, "failed to wait on middleware process");
                    std::process::exit(1);
                }
            }
        });

        Ok(())
    }
}
