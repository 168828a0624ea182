//! The control-plane server loop.
//!
//! Serves length-prefixed request/response frames over a Unix socket.
//! Each frame carries one fixed-size request; malformed frames are
//! dropped with a warning, unknown request types are answered with a
//! text status, exactly like every other administrator error.

use std::io::ErrorKind;
use std::sync::Arc;

use anyhow::Result;
use rampart_engine::Engine;
use rampart_protocol::{ProtocolError, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Upper bound on a control frame, mirroring the largest response the
/// engine can produce (a full connection-table snapshot).
const MAX_FRAME: usize = 256 * 1024;

/// Accepts control connections until the task is aborted.
pub async fn serve(engine: Arc<Engine>, listener: UnixListener) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(&engine, stream).await {
                debug!(%err, "control connection ended");
            }
        });
    }
}

async fn handle_connection(engine: &Engine, mut stream: UnixStream) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME {
            warn!(len, "oversized control frame, closing connection");
            return Ok(());
        }
        let mut frame = vec![0u8; len];
        stream.read_exact(&mut frame).await?;

        let response = match Request::decode(&mut frame.as_slice()) {
            Ok(request) => engine.dispatch(&request),
            Err(ProtocolError::UnknownRequest(tp)) => {
                warn!(tp, "unknown control request type");
                Response::Msg("No such req.".into())
            }
            Err(err) => {
                warn!(%err, "malformed control request dropped");
                continue;
            }
        };

        let mut out = Vec::new();
        response.encode(&mut out);
        stream.write_all(&(out.len() as u32).to_le_bytes()).await?;
        stream.write_all(&out).await?;
    }
}
