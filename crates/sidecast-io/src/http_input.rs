//! HTTP input: a plain TCP listener that reads each request verbatim
//! and answers with an empty 200 OK. Strictly a capture surface, never
//! a proxy. See spec section 4.7.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use sidecast_core::{http, Input, Message, PluginError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct HttpInput {
    rx: mpsc::Receiver<Message>,
    pub local_addr: SocketAddr,
}

impl HttpInput {
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
                                debug!(%peer, error = %e, "http input connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("http input accept error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self { rx, local_addr })
    }
}

async fn handle_connection(mut socket: TcpStream, tx: mpsc::Sender<Message>) -> std::io::Result<()> {
    loop {
        let Some(payload) = read_request(&mut socket).await? else {
            return Ok(());
        };

        let msg = Message::new_request(Bytes::from(payload));
        if tx.send(msg).await.is_err() {
            return Ok(());
        }

        socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await?;
    }
}

/// Read one full request (headers + declared body, if any) off `socket`.
async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(header_end) = memchr::memmem::find(&buf, b"\r\n\r\n") {
            let content_length = http::header(&buf, "Content-Length")
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_so_far = buf.len() - (header_end + 4);
            if body_so_far >= content_length {
                return Ok(Some(buf));
            }
        }

        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if buf.is_empty() { None } else { Some(buf) });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[async_trait]
impl Input for HttpInput {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.rx.close();
        Ok(())
    }

    fn name(&self) -> String {
        "http".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_a_request_and_answers_empty_200() {
        let mut input = HttpInput::bind("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
        let addr = input.local_addr;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET /x HTTP/1.1\r\n\r\n").await.unwrap();

        let msg = input.read().await.unwrap().unwrap();
        assert_eq!(sidecast_core::http::path(&msg.payload), Some(b"/x".as_ref()));

        let mut response = [0u8; 64];
        let n = client.read(&mut response).await.unwrap();
        assert!(response[..n].starts_with(b"HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn read_request_returns_full_buffered_request_with_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"POST /x HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody")
            .await
            .unwrap();

        let received = server.await.unwrap().unwrap();
        assert_eq!(received, b"POST /x HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody");
    }
}
