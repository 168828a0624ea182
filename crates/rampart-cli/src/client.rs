//! Control-socket client.
//!
//! Sends one length-prefixed request frame per call and reads back the
//! framed response.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rampart_protocol::{Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Default control socket path, matching the daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/run/rampart.sock";

/// Client for the engine's control socket.
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    /// Creates a client; `socket` overrides the default path.
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self {
            socket_path: socket.unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
        }
    }

    /// The socket this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Performs one request/response exchange.
    pub async fn call(&self, request: &Request) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "failed to connect to {} (is rampartd running?)",
                    self.socket_path.display()
                )
            })?;

        let mut frame = Vec::new();
        request.encode(&mut frame)?;
        stream
            .write_all(&(frame.len() as u32).to_le_bytes())
            .await?;
        stream.write_all(&frame).await?;

        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .context("daemon closed the connection without answering")?;
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await?;
        Response::decode(&mut body.as_slice()).context("failed to parse daemon response")
    }
}
