//! Connection layer: the transport-agnostic message channel and the
//! acceptors that produce it.
//!
//! A [`Connection`] is a bidirectional, ordered text-message channel to one
//! client. A [`ConnectionManager`] owns a listener for one transport, wraps
//! every accepted peer in a `Connection`, and hands it to the registered
//! [`OnConnect`] callback. Two transports exist:
//!
//! - [`web::WebConnectionManager`]: HTTP page server + WebSocket sessions.
//! - [`tcp::TcpConnectionManager`]: newline-delimited text over raw TCP.
//!
//! Every transport reports peer disconnects as [`ConnectionError::Closed`]
//! so session logic never sees a transport-specific error for the normal
//! end of a session.

pub mod tcp;
pub mod web;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::GatewayError;

/// Errors raised at the connection boundary.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The peer closed the connection. This is the expected way for a
    /// session to end.
    #[error("connection closed by peer")]
    Closed,

    /// An inbound message exceeded the transport's size limit.
    #[error("message exceeds {limit} bytes")]
    MessageTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The peer sent a frame the transport cannot turn into text.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// Underlying I/O failure other than a clean disconnect.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// Returns `true` for the normal end-of-session signal.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A bidirectional text-message channel to one client.
///
/// Owned exclusively by the session it is handed to, so `send` calls reach
/// the peer in the order they were issued and `receive` returns messages in
/// arrival order.
#[async_trait]
pub trait Connection: Send + fmt::Debug {
    /// Sends one text message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] if the peer is gone, or another
    /// [`ConnectionError`] on transport failure.
    async fn send(&mut self, message: &str) -> Result<(), ConnectionError>;

    /// Waits for the next complete message from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] once the peer disconnects. Never
    /// returns an empty or partial message in place of a disconnect.
    async fn receive(&mut self) -> Result<String, ConnectionError>;

    /// Closes the connection from the server side.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if the close could not be delivered.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Callback invoked with every newly accepted connection.
///
/// The returned future owns the connection for the whole session and is
/// run in its own task.
pub type OnConnect = Arc<dyn Fn(Box<dyn Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into an [`OnConnect`] callback.
pub fn on_connect<F, Fut>(f: F) -> OnConnect
where
    F: Fn(Box<dyn Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn| Box::pin(f(conn)))
}

/// A transport acceptor.
///
/// Implementations bind their configured address and accept peers until
/// the process ends, spawning one task per accepted connection.
#[async_trait]
pub trait ConnectionManager: Send + Sync + fmt::Debug {
    /// Binds the listener and serves forever.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] if the listener cannot be bound or the
    /// accept loop fails.
    async fn run(&self) -> Result<(), GatewayError>;
}
