//! HTTP + WebSocket transport.
//!
//! Serves the application page on `GET /`, passes `/session/...` requests
//! through to the session layer, upgrades `/websocket/` to a
//! [`WebConnection`], and serves mounted dependency directories for
//! everything else.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use futures_util::future::BoxFuture;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::{Connection, ConnectionError, ConnectionManager, OnConnect};
use crate::config::WebConfig;
use crate::error::GatewayError;
use crate::ui::dependency::serve_dependency;
use crate::ui::{DependencyRegistry, Ui, UiSource, runtime_dependencies};

/// Body of the 500 page served when the UI resolves to neither a document
/// nor a response.
pub const INVALID_UI_BODY: &str = "Invalid UI object";

/// Callback handling `GET|POST /session/{*path}`.
pub type OnSessionRequest = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wraps an async closure into an [`OnSessionRequest`] callback.
pub fn on_session_request<F, Fut>(f: F) -> OnSessionRequest
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// A [`Connection`] over an accepted WebSocket.
pub struct WebConnection {
    socket: WebSocket,
}

impl fmt::Debug for WebConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebConnection")
            .field("protocol", &self.socket.protocol())
            .finish_non_exhaustive()
    }
}

impl WebConnection {
    /// Wraps a socket whose handshake has completed.
    #[must_use]
    pub const fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Connection for WebConnection {
    async fn send(&mut self, message: &str) -> Result<(), ConnectionError> {
        self.socket.send(Message::text(message.to_owned())).await.map_err(|e| {
            tracing::debug!(error = %e, "ws send failed");
            ConnectionError::Closed
        })
    }

    async fn receive(&mut self) -> Result<String, ConnectionError> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Binary(_))) => {
                    return Err(ConnectionError::UnexpectedFrame("binary frame".to_string()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                Some(Err(e)) => {
                    // axum does not expose the error kind; a failing stream
                    // is a peer that went away without a close frame.
                    tracing::debug!(error = %e, "ws receive failed");
                    return Err(ConnectionError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.socket
            .send(Message::Close(None))
            .await
            .map_err(|_| ConnectionError::Closed)
    }
}

/// State shared by every route of one manager.
struct WebShared {
    ui: UiSource,
    on_connect: OnConnect,
    on_session_request: OnSessionRequest,
    dependencies: DependencyRegistry,
    runtime_dir: PathBuf,
}

/// [`ConnectionManager`] serving the application page and WebSocket
/// sessions over HTTP.
pub struct WebConnectionManager {
    shared: Arc<WebShared>,
    config: WebConfig,
}

impl WebConnectionManager {
    /// Creates a manager with an empty dependency registry.
    #[must_use]
    pub fn new(
        ui: impl Into<UiSource>,
        on_connect: OnConnect,
        on_session_request: OnSessionRequest,
        config: WebConfig,
    ) -> Self {
        Self::with_dependencies(ui, on_connect, on_session_request, config, DependencyRegistry::new())
    }

    /// Creates a manager using `dependencies` for mounts, e.g. one with
    /// package directories registered.
    #[must_use]
    pub fn with_dependencies(
        ui: impl Into<UiSource>,
        on_connect: OnConnect,
        on_session_request: OnSessionRequest,
        config: WebConfig,
        dependencies: DependencyRegistry,
    ) -> Self {
        let shared = WebShared {
            ui: ui.into(),
            on_connect,
            on_session_request,
            dependencies,
            runtime_dir: config.runtime_dir.clone(),
        };
        Self {
            shared: Arc::new(shared),
            config,
        }
    }

    /// Returns the registry of mounted dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &DependencyRegistry {
        &self.shared.dependencies
    }

    /// Builds the router for this manager.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(page_handler))
            .route("/session/{*path}", get(session_handler).post(session_handler))
            .route("/websocket/", get(websocket_handler))
            .fallback(dependency_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.shared))
    }

    /// Serves on an already-bound listener until the process ends.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] if the server fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "web transport listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

impl fmt::Debug for WebConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebConnectionManager")
            .field("ui", &self.shared.ui)
            .field("dependencies", &self.shared.dependencies)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionManager for WebConnectionManager {
    async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }
}

/// `GET /` — resolve and render the application page.
async fn page_handler(State(shared): State<Arc<WebShared>>, request: Request) -> Response {
    let ui = shared.ui.resolve(&request);
    match ui {
        Ui::Response(response) => response,
        Ui::Document(mut doc) => {
            doc.append_dependencies(runtime_dependencies(&shared.runtime_dir));
            match doc.render(&shared.dependencies).await {
                Ok(rendered) => Html(rendered.html).into_response(),
                Err(e) => e.into_response(),
            }
        }
        Ui::Invalid(what) => {
            tracing::error!(ui = %what, "page UI is neither a document nor a response");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(INVALID_UI_BODY)).into_response()
        }
    }
}

/// `GET|POST /session/{*path}` — passed through unchanged.
async fn session_handler(State(shared): State<Arc<WebShared>>, request: Request) -> Response {
    (shared.on_session_request)(request).await
}

/// `GET /websocket/` — upgrade and hand the socket to the session layer.
async fn websocket_handler(State(shared): State<Arc<WebShared>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        tracing::debug!("websocket accepted");
        (shared.on_connect)(Box::new(WebConnection::new(socket))).await;
        tracing::debug!("websocket session finished");
    })
}

async fn dependency_handler(State(shared): State<Arc<WebShared>>, request: Request) -> Response {
    serve_dependency(&shared.dependencies, request).await
}
