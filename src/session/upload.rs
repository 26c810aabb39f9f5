//! File uploads.
//!
//! A client announces files with an `uploadInit` call, which creates an
//! [`UploadOperation`] and answers with its job id and upload URL. Each file
//! is then POSTed, in order, to `/session/{id}/upload/{job_id}`. An
//! `uploadEnd` call finishes the job and the file list, with local paths
//! filled in, becomes the value of an input.
//!
//! Files are written under one temporary directory per session, created on
//! the first upload and removed when the session ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Errors raised while receiving an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No operation with this job id.
    #[error("unknown upload job: {0}")]
    UnknownJob(String),

    /// More files were POSTed than the job announced.
    #[error("upload job {0} has no more files to receive")]
    NoMoreFiles(String),

    /// The request body failed mid-stream.
    #[error("upload body error: {0}")]
    Body(String),

    /// Writing the file failed.
    #[error("upload io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One file of an upload, as announced by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Original filename on the client.
    pub name: String,
    /// Size in bytes, as reported by the client.
    #[serde(default)]
    pub size: u64,
    /// MIME type; guessed from `name` when the client sends none.
    #[serde(rename = "type", default)]
    pub content_type: String,
    /// Where the received file was written. Set once it has arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datapath: Option<String>,
}

#[derive(Debug)]
struct UploadState {
    files: Vec<FileInfo>,
    next: usize,
}

/// A pending upload job.
#[derive(Debug)]
pub struct UploadOperation {
    id: String,
    dir: PathBuf,
    state: tokio::sync::Mutex<UploadState>,
}

impl UploadOperation {
    /// Returns the job id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Streams `body` into the next announced file.
    ///
    /// Holds the job lock for the whole body, so concurrent POSTs to one
    /// job are written one file after the other.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::NoMoreFiles`] once every announced file has
    /// been received, and [`UploadError::Body`] or [`UploadError::Io`] if
    /// the body cannot be read or written.
    pub async fn write_file(&self, body: Body) -> Result<(), UploadError> {
        let mut state = self.state.lock().await;
        let index = state.next;
        let Some(info) = state.files.get(index) else {
            return Err(UploadError::NoMoreFiles(self.id.clone()));
        };
        let path = self.dir.join(stored_name(index, &info.name));

        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| UploadError::Body(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::debug!(job = %self.id, file = index, path = %path.display(), "upload file received");
        if let Some(info) = state.files.get_mut(index) {
            info.datapath = Some(path.display().to_string());
        }
        state.next += 1;
        Ok(())
    }

    async fn files(&self) -> Vec<FileInfo> {
        self.state.lock().await.files.clone()
    }
}

/// `{index}{.ext}`: the client's name never becomes part of a local path.
fn stored_name(index: usize, name: &str) -> String {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{index}.{ext}"),
        None => index.to_string(),
    }
}

/// Upload jobs of one session.
#[derive(Debug, Default)]
pub struct UploadManager {
    dir: Mutex<Option<tempfile::TempDir>>,
    operations: Mutex<HashMap<String, Arc<UploadOperation>>>,
}

impl UploadManager {
    /// Creates a manager; no directory is created until the first job.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a job for `files`, filling in missing content types.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Io`] if the upload directory cannot be
    /// created.
    pub fn create(&self, mut files: Vec<FileInfo>) -> Result<Arc<UploadOperation>, UploadError> {
        for info in &mut files {
            if info.content_type.is_empty() {
                info.content_type = mime_guess::from_path(&info.name)
                    .first_or_octet_stream()
                    .to_string();
            }
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let dir = {
            let mut guard = self.dir.lock();
            let base = match guard.take() {
                Some(existing) => existing,
                None => tempfile::Builder::new().prefix("weave-upload-").tempdir()?,
            };
            let dir = base.path().join(&id);
            *guard = Some(base);
            dir
        };
        std::fs::create_dir(&dir)?;

        let operation = Arc::new(UploadOperation {
            id: id.clone(),
            dir,
            state: tokio::sync::Mutex::new(UploadState { files, next: 0 }),
        });
        self.operations.lock().insert(id, Arc::clone(&operation));
        Ok(operation)
    }

    /// Returns the job `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<UploadOperation>> {
        self.operations.lock().get(id).cloned()
    }

    /// Ends job `id`, returning its files with their local paths.
    pub async fn finish(&self, id: &str) -> Option<Vec<FileInfo>> {
        let operation = self.operations.lock().remove(id)?;
        Some(operation.files().await)
    }

    /// Returns the session's upload directory, if one was created.
    #[must_use]
    pub fn dir(&self) -> Option<PathBuf> {
        self.dir.lock().as_ref().map(|d| d.path().to_path_buf())
    }

    /// Drops every job and deletes the upload directory.
    pub fn remove_dir(&self) {
        self.operations.lock().clear();
        let dir = self.dir.lock().take();
        if let Some(dir) = dir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(dir = %path.display(), error = %e, "failed to remove upload directory");
            }
        }
    }
}
