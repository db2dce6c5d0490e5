//! TCP input: a listener that accepts framed (codec-encoded) messages,
//! the symmetric counterpart to [`crate::outputs::TcpOutput`]. See
//! spec section 6 (`--input-tcp`).

use std::net::SocketAddr;

use async_trait::async_trait;
use sidecast_core::codec;
use sidecast_core::{Input, Message, PluginError};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct TcpInput {
    rx: mpsc::Receiver<Message>,
    pub local_addr: SocketAddr,
}

impl TcpInput {
    pub async fn bind(addr: SocketAddr, channel_capacity: usize) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(channel_capacity);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(socket, tx).await {
                                debug!(%peer, error = %e, "tcp input connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("tcp input accept error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self { rx, local_addr })
    }
}

async fn handle_connection(mut socket: TcpStream, tx: mpsc::Sender<Message>) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];

    loop {
        loop {
            match codec::try_decode(&buf) {
                Ok(Some((msg, consumed))) => {
                    buf.drain(..consumed);
                    if tx.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            }
        }

        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[async_trait]
impl Input for TcpInput {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.rx.close();
        Ok(())
    }

    fn name(&self) -> String {
        "tcp".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidecast_core::{MessageId, MessageKind};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn decodes_a_framed_message_written_by_a_client() {
        let mut input = TcpInput::bind("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
        let addr = input.local_addr;

        let msg = Message {
            kind: MessageKind::Request,
            id: MessageId::generate(),
            timestamp: 1,
            latency: None,
            payload: bytes::Bytes::from_static(b"GET / HTTP/1.1\r\n\r\n"),
        };
        let frame = codec::encode(&msg);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&frame).await.unwrap();

        let received = input.read().await.unwrap().unwrap();
        assert_eq!(received.id, msg.id);
    }
}
