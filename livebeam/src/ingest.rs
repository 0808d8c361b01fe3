//! Ingest handoff server.
//!
//! The wire-level ingestion protocol (RTMP or similar) terminates in an
//! external server; that server hands each accepted publish session to us
//! over a plain TCP connection: one line naming the session, then the raw
//! stream bytes until EOF. The remainder of the connection is fed straight
//! into the session's encoder.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_NAME_LEN: usize = 64;

pub struct IngestServer {
    pipeline: Arc<Pipeline>,
}

impl IngestServer {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Accept handoff connections until cancelled.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
        info!(addr = ?listener.local_addr(), "ingest handoff listening");
        loop {
            let (conn, peer) = tokio::select! {
                () = cancel.cancelled() => {
                    info!("ingest handoff stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };
            debug!(%peer, "ingest connection accepted");
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                handle_connection(pipeline, conn).await;
            });
        }
    }
}

async fn handle_connection(pipeline: Arc<Pipeline>, conn: TcpStream) {
    let mut reader = BufReader::new(conn);

    let publish_name =
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_publish_name(&mut reader)).await {
            Ok(Ok(name)) => name,
            Ok(Err(reason)) => {
                warn!("rejecting session: {reason}");
                return;
            }
            Err(_) => {
                warn!("ingest handshake timed out");
                return;
            }
        };

    // everything after the name line is the raw stream
    pipeline.run_session(&publish_name, reader).await;
}

/// Read and validate the session name line.
///
/// The read is capped at one name's worth of bytes, so a peer cannot make
/// us buffer an arbitrarily long handshake; an over-long name simply fails
/// validation.
async fn read_publish_name<R>(reader: &mut R) -> Result<String, String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let mut limited = (&mut *reader).take(MAX_NAME_LEN as u64 + 2);
    match limited.read_line(&mut line).await {
        Ok(0) => return Err("connection closed before naming a session".to_string()),
        Ok(_) => {}
        Err(e) => return Err(format!("handshake read failed: {e}")),
    }

    let name = line.trim();
    validate_publish_name(name).map_err(str::to_string)?;
    Ok(name.to_string())
}

/// Session names become directory names under the HLS roots, so anything
/// that could escape them is rejected. All-numeric names are refused too:
/// they would collide with the tier directory layout beneath each session.
fn validate_publish_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name.len() > MAX_NAME_LEN {
        return Err("name too long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("name contains invalid characters");
    }
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err("name must not be purely numeric");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_session_names() {
        assert!(validate_publish_name("alice").is_ok());
        assert!(validate_publish_name("stream_42-hd").is_ok());
    }

    #[test]
    fn rejects_names_that_could_escape_the_hls_root() {
        assert!(validate_publish_name("").is_err());
        assert!(validate_publish_name("..").is_err());
        assert!(validate_publish_name("a/b").is_err());
        assert!(validate_publish_name("a\\b").is_err());
        assert!(validate_publish_name("alice bob").is_err());
        assert!(validate_publish_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn rejects_names_that_look_like_tier_directories() {
        assert!(validate_publish_name("0").is_err());
        assert!(validate_publish_name("42").is_err());
        assert!(validate_publish_name("stream42").is_ok());
    }

    #[tokio::test]
    async fn handshake_yields_the_name_and_leaves_the_stream_bytes() {
        let mut reader = BufReader::new(&b"alice\nraw stream bytes"[..]);
        let name = read_publish_name(&mut reader).await.unwrap();
        assert_eq!(name, "alice");

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "raw stream bytes");
    }

    #[tokio::test]
    async fn handshake_read_is_bounded() {
        // a name line far beyond the cap, never newline-terminated
        let payload = vec![b'x'; 1024 * 1024];
        let mut reader = BufReader::new(payload.as_slice());

        let err = read_publish_name(&mut reader).await.unwrap_err();
        assert!(err.contains("name too long"));
    }

    #[tokio::test]
    async fn handshake_rejects_a_closed_connection() {
        let mut reader = BufReader::new(&b""[..]);
        let err = read_publish_name(&mut reader).await.unwrap_err();
        assert!(err.contains("closed"));
    }
}
