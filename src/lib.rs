//! # weave-gateway
//!
//! Connection layer for the Weave reactive web framework.
//!
//! This crate serves an application's page over HTTP and carries each
//! client's session messages over either a WebSocket or a raw TCP socket.
//! Both transports hand sessions the same [`connection::Connection`]
//! abstraction, so session logic never sees which one is in use.
//!
//! ## Architecture
//!
//! ```text
//! Clients (browser, TCP peer)
//!     │
//!     ├── WebConnectionManager (connection/web)
//!     │     ├── GET /                 page render (ui/)
//!     │     ├── /session/{*path}      SessionRegistry routing
//!     │     ├── /websocket/           WebConnection
//!     │     └── fallback              mounted HtmlDependency dirs
//!     ├── TcpConnectionManager (connection/tcp)
//!     │     └── one TcpConnection per accepted socket
//!     │
//!     ├── App (app)                   picks the transport, wires callbacks
//!     │
//!     └── Session (session/)          JSON protocol, inputs, outputs,
//!                                     downloads and uploads
//! ```

pub mod app;
pub mod config;
pub mod connection;
pub mod error;
pub mod session;
pub mod ui;
