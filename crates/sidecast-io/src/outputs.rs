//! Simple sink outputs: stdout, null, and raw TCP.

use async_trait::async_trait;
use sidecast_core::codec;
use sidecast_core::{Message, Output, PluginError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Writes encoded frames to stdout. Useful for piping into other tools.
#[derive(Default)]
pub struct StdoutOutput;

#[async_trait]
impl Output for StdoutOutput {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        let frame = codec::encode(msg);
        tokio::io::stdout()
            .write_all(&frame)
            .await
            .map_err(|e| PluginError::Other(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn name(&self) -> String {
        "stdout".to_string()
    }
}

/// Discards every message. Useful for load-testing the upstream stages
/// without paying for a real sink.
#[derive(Default)]
pub struct NullOutput;

#[async_trait]
impl Output for NullOutput {
    async fn write(&mut self, _msg: &Message) -> Result<(), PluginError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn name(&self) -> String {
        "null".to_string()
    }
}

/// Streams encoded frames to a persistent TCP connection, reconnecting
/// lazily on the next write after a disconnect.
pub struct TcpOutput {
    addr: String,
    conn: Option<TcpStream>,
}

impl TcpOutput {
    pub fn new(addr: String) -> Self {
        Self { addr, conn: None }
    }

    async fn connection(&mut self) -> Result<&mut TcpStream, PluginError> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| PluginError::StartFailed(e.to_string()))?;
            self.conn = Some(stream);
        }
        Ok(self.conn.as_mut().unwrap())
    }
}

#[async_trait]
impl Output for TcpOutput {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        let frame = codec::encode(msg);
        let addr = self.addr.clone();
        let conn = self.connection().await?;
        if conn.write_all(&frame).await.is_err() {
            self.conn = None;
            return Err(PluginError::Other(format!("connection to {addr} dropped")));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.shutdown().await;
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("tcp({})", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecast_core::{MessageId, MessageKind};
    use tokio::io::AsyncReadExt;

    fn msg() -> Message {
        Message {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: 1,
            latency: None,
            payload: bytes::Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"),
        }
    }

    #[tokio::test]
    async fn null_output_accepts_and_discards() {
        let mut out = NullOutput;
        out.write(&msg()).await.unwrap();
        out.close().await.unwrap();
    }

    #[tokio::test]
    async fn tcp_output_roundtrips_a_frame() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let mut output = TcpOutput::new(addr.to_string());
        let sent = msg();
        output.write(&sent).await.unwrap();
        output.close().await.unwrap();

        let received = server.await.unwrap();
        let decoded = codec::decode(&received).unwrap();
        assert_eq!(decoded.id, sent.id);
    }
}
