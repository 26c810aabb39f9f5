//! The part of a session that HTTP handlers can reach.
//!
//! A running [`super::Session`] is owned by its connection task. Requests
//! under `/session/{id}/...` arrive on other tasks, so everything they need
//! lives in a [`SessionHandle`] shared through the
//! [`super::SessionRegistry`]: downloads, upload jobs, and the close signal.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use parking_lot::RwLock;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::sync::Notify;

use super::upload::{UploadError, UploadManager};

/// Characters left unescaped in session URLs and `filename*=` values.
pub(crate) const URL_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// A file the session offers at `/session/{id}/download/{key}`.
#[derive(Debug, Clone)]
pub struct Download {
    /// Suggested filename; the download key is used when absent.
    pub filename: Option<String>,
    /// MIME type; guessed from the filename when absent.
    pub content_type: Option<String>,
    /// File contents.
    pub contents: Bytes,
}

impl Download {
    /// Creates a download with inferred filename and content type.
    pub fn new(contents: impl Into<Bytes>) -> Self {
        Self {
            filename: None,
            content_type: None,
            contents: contents.into(),
        }
    }

    /// Sets the filename.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Shared state of one live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    downloads: RwLock<HashMap<String, Download>>,
    uploads: UploadManager,
    close: Notify,
}

impl SessionHandle {
    /// Creates a handle for session `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            downloads: RwLock::new(HashMap::new()),
            uploads: UploadManager::new(),
            close: Notify::new(),
        }
    }

    /// Returns the session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Offers `download` under `key`, replacing any previous one.
    pub fn add_download(&self, key: impl Into<String>, download: Download) {
        self.downloads.write().insert(key.into(), download);
    }

    /// Returns the download registered under `key`.
    #[must_use]
    pub fn download(&self, key: &str) -> Option<Download> {
        self.downloads.read().get(key).cloned()
    }

    /// Returns the session's upload jobs.
    #[must_use]
    pub fn uploads(&self) -> &UploadManager {
        &self.uploads
    }

    /// Asks the session to close its connection.
    pub fn request_close(&self) {
        self.close.notify_one();
    }

    /// Completes once [`Self::request_close`] has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }

    /// Answers `/session/{id}/{action}/{subpath}`.
    ///
    /// `POST upload/{job_id}` stores the body as the job's next file;
    /// `GET download/{key}` serves a registered download. Anything else is
    /// a 404.
    pub async fn respond(&self, request: Request, action: &str, subpath: Option<&str>) -> Response {
        let subpath = subpath.filter(|s| !s.is_empty());
        let method = request.method();
        if action == "upload" && *method == Method::POST {
            let Some(job_id) = subpath else {
                return bad_request_html();
            };
            return self.receive_upload(job_id, request).await;
        }
        if action == "download" && *method == Method::GET {
            if let Some(key) = subpath {
                if let Some(download) = self.download(key) {
                    return download_response(key, download);
                }
            }
        }
        not_found_html()
    }

    async fn receive_upload(&self, job_id: &str, request: Request) -> Response {
        let result = match self.uploads.get(job_id) {
            Some(operation) => operation.write_file(request.into_body()).await,
            None => Err(UploadError::UnknownJob(job_id.to_string())),
        };
        match result {
            Ok(()) => "OK".into_response(),
            Err(e @ UploadError::Io(_)) => {
                tracing::error!(session = %self.id, job = job_id, error = %e, "upload failed");
                (StatusCode::INTERNAL_SERVER_ERROR, Html("<h1>Internal Server Error</h1>")).into_response()
            }
            Err(e) => {
                tracing::warn!(session = %self.id, job = job_id, error = %e, "rejected upload");
                bad_request_html()
            }
        }
    }
}

fn download_response(key: &str, download: Download) -> Response {
    let filename = download.filename.unwrap_or_else(|| {
        tracing::warn!(download = key, "no filename for download; using its key");
        key.to_string()
    });
    let content_type = download.content_type.unwrap_or_else(|| {
        mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string()
    });

    let encoded = utf8_percent_encode(&filename, URL_SAFE).to_string();
    let disposition = if encoded == filename {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!("attachment; filename*=utf-8''{encoded}")
    };

    let mut response = download.contents.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn bad_request_html() -> Response {
    (StatusCode::BAD_REQUEST, Html("<h1>Bad Request</h1>")).into_response()
}

fn not_found_html() -> Response {
    (StatusCode::NOT_FOUND, Html("<h1>Not Found</h1>")).into_response()
}
