//! `sidecast file-server <addr>`: a minimal static file server over the
//! working directory, for exercising `--output-http` against a local
//! target without standing up a real backend. Logs each served path at
//! debug level; not part of the capture/replay pipeline itself.

use std::path::{Component, Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

pub async fn run(addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    eprintln!("sidecast: file-server listening on {addr}, serving {}", std::env::current_dir()?.display());

    loop {
        let (socket, peer) = listener.accept().await?;
        tokio::spawn(async move {
            if let Err(e) = handle(socket).await {
                debug!(%peer, error = %e, "file-server connection ended");
            }
        });
    }
}

async fn handle(mut socket: TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if memchr::memmem::find(&buf, b"\r\n\r\n").is_some() {
            break;
        }
    }

    let request_line = buf.split(|&b| b == b'\n').next().unwrap_or(b"");
    let path = request_line
        .split(|&b| b == b' ')
        .nth(1)
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .unwrap_or_default();
    debug!(%path, "file-server request");

    let response = match resolve(&path) {
        Some(resolved) => match tokio::fs::read(&resolved).await {
            Ok(body) => {
                let header = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
                [header.into_bytes(), body].concat()
            }
            Err(_) => not_found(),
        },
        None => not_found(),
    };

    socket.write_all(&response).await
}

fn not_found() -> Vec<u8> {
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()
}

/// Resolves a request path against the current directory, rejecting
/// `..` components so a request can't escape it.
fn resolve(request_path: &str) -> Option<PathBuf> {
    let relative = request_path.split('?').next().unwrap_or(request_path).trim_start_matches('/');
    let relative = if relative.is_empty() { "index.html" } else { relative };
    let candidate = Path::new(relative);
    if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    Some(std::env::current_dir().ok()?.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_joins_request_path_onto_cwd() {
        let resolved = resolve("/foo/bar.txt").unwrap();
        assert_eq!(resolved, std::env::current_dir().unwrap().join("foo/bar.txt"));
    }

    #[test]
    fn resolve_defaults_empty_path_to_index_html() {
        let resolved = resolve("/").unwrap();
        assert_eq!(resolved, std::env::current_dir().unwrap().join("index.html"));
    }

    #[test]
    fn resolve_strips_query_string() {
        let resolved = resolve("/foo.txt?x=1").unwrap();
        assert_eq!(resolved, std::env::current_dir().unwrap().join("foo.txt"));
    }

    #[test]
    fn resolve_rejects_parent_dir_escape() {
        assert!(resolve("/../../etc/passwd").is_none());
    }
}
