//! Application wiring: UI, session logic, and transport selection.
//!
//! [`App`] owns the session registry and builds the
//! [`ConnectionManager`] for the configured [`Transport`], plugging in the
//! callbacks that turn every accepted connection into a running
//! [`Session`].

use std::fmt;
use std::sync::Arc;

use crate::config::{GatewayConfig, Transport};
use crate::connection::tcp::TcpConnectionManager;
use crate::connection::web::{OnSessionRequest, WebConnectionManager, on_session_request};
use crate::connection::{ConnectionManager, OnConnect, on_connect};
use crate::error::GatewayError;
use crate::session::{Session, SessionRegistry};
use crate::ui::{DependencyRegistry, UiSource};

/// Per-session setup, run once for every new session before it starts
/// reading messages.
pub type ServerFn = Arc<dyn Fn(&mut Session) + Send + Sync>;

/// A reactive application: its page UI plus its per-session server logic.
pub struct App {
    ui: UiSource,
    server: ServerFn,
    sessions: Arc<SessionRegistry>,
    packages: Vec<(String, std::path::PathBuf)>,
    config: GatewayConfig,
}

impl App {
    /// Creates an application.
    pub fn new<F>(ui: impl Into<UiSource>, server: F, config: GatewayConfig) -> Self
    where
        F: Fn(&mut Session) + Send + Sync + 'static,
    {
        Self {
            ui: ui.into(),
            server: Arc::new(server),
            sessions: Arc::new(SessionRegistry::new()),
            packages: Vec::new(),
            config,
        }
    }

    /// Registers a package directory that page dependencies may be
    /// relative to.
    #[must_use]
    pub fn with_package(mut self, name: impl Into<String>, dir: impl Into<std::path::PathBuf>) -> Self {
        self.packages.push((name.into(), dir.into()));
        self
    }

    /// Returns the live session registry.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Builds the callback that runs a session for every new connection.
    #[must_use]
    pub fn on_connect(&self) -> OnConnect {
        let sessions = Arc::clone(&self.sessions);
        let server = Arc::clone(&self.server);
        let debug = self.config.debug;
        on_connect(move |conn| {
            let sessions = Arc::clone(&sessions);
            let server = Arc::clone(&server);
            async move {
                let mut session = Session::start(conn, sessions, debug).await;
                server(&mut session);
                let id = session.id().to_string();
                if let Err(e) = session.run().await {
                    tracing::warn!(session = %id, error = %e, "session ended with error");
                }
            }
        })
    }

    /// Builds the callback that routes `/session/...` requests.
    #[must_use]
    pub fn on_session_request(&self) -> OnSessionRequest {
        let sessions = Arc::clone(&self.sessions);
        on_session_request(move |request| {
            let sessions = Arc::clone(&sessions);
            async move { sessions.handle_request(request).await }
        })
    }

    /// Builds the manager for the configured transport.
    #[must_use]
    pub fn connection_manager(&self) -> Box<dyn ConnectionManager> {
        match self.config.transport {
            Transport::WebSocket => {
                let dependencies = self
                    .packages
                    .iter()
                    .fold(DependencyRegistry::new(), |registry, (name, dir)| {
                        registry.with_package(name.clone(), dir.clone())
                    });
                Box::new(WebConnectionManager::with_dependencies(
                    self.ui.clone(),
                    self.on_connect(),
                    self.on_session_request(),
                    self.config.web.clone(),
                    dependencies,
                ))
            }
            Transport::Tcp => Box::new(TcpConnectionManager::new(
                self.on_connect(),
                self.config.tcp.clone(),
            )),
        }
    }

    /// Serves the application until the process ends.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] if the transport cannot bind or fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        tracing::info!(transport = ?self.config.transport, "starting application");
        self.connection_manager().run().await
    }

    /// Asks every live session to close.
    pub async fn stop(&self) {
        self.sessions.close_all().await;
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("ui", &self.ui)
            .field("sessions", &self.sessions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::TcpConfig;
    use crate::session::Download;
    use crate::ui::HtmlDocument;
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::{TcpListener, TcpStream};

    fn app(transport: Transport) -> App {
        let config = GatewayConfig {
            transport,
            ..GatewayConfig::default()
        };
        App::new(
            HtmlDocument::new("<p>app</p>"),
            |session: &mut Session| {
                session.set_output("hello", json!("world"));
                session.register_download("readme", Download::new("read me").with_filename("README.txt"));
            },
            config,
        )
    }

    #[test]
    fn manager_follows_transport() {
        let web = format!("{:?}", app(Transport::WebSocket).connection_manager());
        assert!(web.starts_with("WebConnectionManager"));
        let tcp = format!("{:?}", app(Transport::Tcp).connection_manager());
        assert!(tcp.starts_with("TcpConnectionManager"));
    }

    #[tokio::test]
    async fn tcp_session_end_to_end() {
        let app = app(Transport::Tcp);
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        let manager = TcpConnectionManager::new(app.on_connect(), TcpConfig::default());
        tokio::spawn(async move { manager.serve(listener).await });

        let Ok(stream) = TcpStream::connect(addr).await else {
            panic!("connect failed");
        };
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let config = next_json(&mut lines).await;
        let Some(id) = config["config"]["sessionId"].as_str().map(str::to_string) else {
            panic!("no session id in {config}");
        };
        assert_eq!(app.sessions().len().await, 1);

        // The session's download is reachable through /session routing.
        let Ok(request) = Request::builder()
            .uri(format!("/session/{id}/download/readme"))
            .body(Body::empty())
        else {
            panic!("bad request");
        };
        let response = (app.on_session_request())(request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let Ok(()) = write.write_all(b"{\"method\":\"init\",\"data\":{\"x\":1}}\n").await else {
            panic!("write failed");
        };
        let flush = next_json(&mut lines).await;
        assert_eq!(
            flush["values"],
            json!({"hello": "world", "readme": format!("session/{id}/download/readme?w=")})
        );

        drop(write);
        drop(lines);
        for _ in 0..100 {
            if app.sessions().is_empty().await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("session was not removed after disconnect");
    }

    async fn next_json(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Value {
        let Ok(Some(line)) = lines.next_line().await else {
            panic!("stream ended before a message");
        };
        let Ok(value) = serde_json::from_str(&line) else {
            panic!("invalid JSON from session: {line}");
        };
        value
    }
}
