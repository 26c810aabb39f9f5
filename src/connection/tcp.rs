//! Raw TCP transport.
//!
//! A strictly simpler protocol than the web transport, meant for
//! lightweight and test clients: every message is one line of text.
//! Outbound messages are written as-is with no added framing; inbound lines
//! lose their trailing whitespace and are decoded one byte per character.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use super::{Connection, ConnectionError, ConnectionManager, OnConnect};
use crate::config::TcpConfig;
use crate::error::GatewayError;

/// A [`Connection`] over one accepted TCP stream.
pub struct TcpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: Option<SocketAddr>,
    max_line_bytes: usize,
}

impl TcpConnection {
    /// Wraps an accepted stream. Lines longer than `max_line_bytes` are
    /// rejected by [`Connection::receive`].
    #[must_use]
    pub fn new(stream: TcpStream, max_line_bytes: usize) -> Self {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            peer,
            max_line_bytes,
        }
    }

    /// Returns the remote address, if the socket reported one.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("peer", &self.peer)
            .field("max_line_bytes", &self.max_line_bytes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, message: &str) -> Result<(), ConnectionError> {
        self.writer
            .write_all(message.as_bytes())
            .await
            .map_err(map_io_error)?;
        self.writer.flush().await.map_err(map_io_error)
    }

    async fn receive(&mut self) -> Result<String, ConnectionError> {
        let limit = self.max_line_bytes;
        let mut line = Vec::new();
        // One byte past the limit tells an over-long line from one that
        // exactly fits.
        let read = (&mut self.reader)
            .take(limit.saturating_add(1) as u64)
            .read_until(b'\n', &mut line)
            .await
            .map_err(map_io_error)?;

        if read == 0 {
            return Err(ConnectionError::Closed);
        }
        if line.len() > limit {
            tracing::warn!(peer = ?self.peer, limit, "rejecting over-long line");
            return Err(ConnectionError::MessageTooLarge { limit });
        }

        Ok(decode_line(&line))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.writer.shutdown().await.map_err(map_io_error)
    }
}

/// Maps each byte to the character with the same code point, then strips
/// trailing whitespace.
fn decode_line(line: &[u8]) -> String {
    let decoded: String = line.iter().map(|&b| char::from(b)).collect();
    decoded.trim_end_matches(is_trailing_space).to_string()
}

/// Unicode whitespace plus the ASCII separators `\x1c`..=`\x1f`, which
/// line-oriented peers treat as blank as well.
fn is_trailing_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// First delay after a failed `accept`.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest delay between `accept` retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before retrying after `failures` consecutive `accept` errors:
/// doubles from [`ACCEPT_BACKOFF_MIN`] up to [`ACCEPT_BACKOFF_MAX`].
fn accept_backoff(failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN.saturating_mul(factor).min(ACCEPT_BACKOFF_MAX)
}

/// Folds the I/O errors that mean "the peer went away" into
/// [`ConnectionError::Closed`].
fn map_io_error(err: std::io::Error) -> ConnectionError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof
        | ErrorKind::NotConnected => ConnectionError::Closed,
        _ => ConnectionError::Io(err),
    }
}

/// [`ConnectionManager`] that accepts line-protocol peers on a TCP port.
pub struct TcpConnectionManager {
    on_connect: OnConnect,
    config: TcpConfig,
}

impl TcpConnectionManager {
    /// Creates a manager that hands every accepted peer to `on_connect`.
    #[must_use]
    pub fn new(on_connect: OnConnect, config: TcpConfig) -> Self {
        Self { on_connect, config }
    }

    /// Accepts peers on an already-bound listener forever.
    ///
    /// Each peer is handled in its own task, so a long-running session never
    /// delays the next `accept`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] if the listener's address cannot be read.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "tcp transport listening");

        let mut failures = 0u32;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => {
                    failures = 0;
                    accepted
                }
                Err(e) => {
                    // Accept failures (e.g. fd exhaustion) must not bring the
                    // listener down; back off until they clear.
                    failures = failures.saturating_add(1);
                    let delay = accept_backoff(failures);
                    tracing::warn!(error = %e, failures, delay = ?delay, "tcp accept failed");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            tracing::debug!(peer = %peer, "tcp peer accepted");

            let conn = TcpConnection::new(stream, self.config.max_line_bytes);
            let on_connect = Arc::clone(&self.on_connect);
            tokio::spawn(async move {
                on_connect(Box::new(conn)).await;
                tracing::debug!(peer = %peer, "tcp session finished");
            });
        }
    }
}

impl fmt::Debug for TcpConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnectionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionManager for TcpConnectionManager {
    async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }
}
