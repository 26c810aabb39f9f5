//! Live session storage.
//!
//! [`SessionRegistry`] maps session ids to their [`SessionHandle`]s so
//! `/session/{id}/...` requests can find the session they address.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::RwLock;

use super::SessionHandle;

/// All sessions currently running in this process.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, replacing any handle with the same id.
    pub async fn insert(&self, handle: Arc<SessionHandle>) {
        let id = handle.id().to_string();
        self.sessions.write().await.insert(id, handle);
    }

    /// Returns the handle for `id`.
    pub async fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removes a session, returning its handle.
    pub async fn remove(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(id)
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no session is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Asks every live session to close its connection.
    pub async fn close_all(&self) {
        // Snapshot first: sessions remove themselves as they end.
        let handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            handle.request_close();
        }
    }

    /// Routes `/session/{id}/{action}[/{subpath}]` to the addressed session.
    ///
    /// Malformed paths and unknown ids get a JSON 404.
    pub async fn handle_request(&self, request: Request) -> Response {
        let path = request.uri().path().to_owned();
        let Some((id, action, subpath)) = parse_session_path(&path) else {
            return not_found_json();
        };
        let Some(handle) = self.get(id).await else {
            return not_found_json();
        };
        handle.respond(request, action, subpath).await
    }
}

/// Splits `/session/{hex id}/{action}[/{subpath}]`.
fn parse_session_path(path: &str) -> Option<(&str, &str, Option<&str>)> {
    let rest = path.strip_prefix("/session/")?;
    let (id, rest) = rest.split_once('/')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    Some(match rest.split_once('/') {
        Some((action, subpath)) => (id, action, Some(subpath)),
        None => (id, rest, None),
    })
}

fn not_found_json() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"detail": "Not Found"})),
    )
        .into_response()
}
