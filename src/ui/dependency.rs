//! Render-time static dependency mounting.
//!
//! Every dependency a rendered page references is made reachable under
//! `/{name}-{version}/`. Mounts are recorded in a per-manager
//! [`DependencyRegistry`] and served by [`serve_dependency`], which the web
//! router installs as its fallback.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tokio::sync::RwLock;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use super::HtmlDependency;
use crate::error::GatewayError;

/// Mounted dependency directories, keyed by `name-version`.
///
/// # Concurrency
///
/// Checking whether a prefix is mounted and mounting it happen under one
/// write lock, so concurrent renders of the same page mount each prefix
/// exactly once.
#[derive(Debug, Default)]
pub struct DependencyRegistry {
    packages: HashMap<String, PathBuf>,
    mounts: RwLock<HashMap<String, PathBuf>>,
}

impl DependencyRegistry {
    /// Creates an empty registry with no known packages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the directory of a package that dependencies may name as
    /// their owner.
    #[must_use]
    pub fn with_package(mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.packages.insert(name.into(), dir.into());
        self
    }

    /// Makes `dep` servable and points its `href` at the mount prefix.
    ///
    /// Dependencies that already carry an `href` are left unmounted. When
    /// `scrub_file` is set the local path is removed afterwards so it never
    /// reaches the page.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UnknownPackage`] if `dep` names an unregistered
    ///   package.
    /// - [`GatewayError::InvalidDependency`] if `dep` has neither an `href`
    ///   nor a `file`, or the directory does not exist.
    pub async fn register(&self, dep: &mut HtmlDependency, scrub_file: bool) -> Result<(), GatewayError> {
        if dep.source.href.is_none() {
            let prefix = dep.prefix();
            let dir = self.resolve_dir(dep)?;

            let mut mounts = self.mounts.write().await;
            if !mounts.contains_key(&prefix) {
                let is_dir = tokio::fs::metadata(&dir)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    return Err(GatewayError::InvalidDependency {
                        name: prefix,
                        reason: format!("directory {} does not exist", dir.display()),
                    });
                }
                tracing::debug!(prefix = %prefix, dir = %dir.display(), "mounting dependency");
                mounts.insert(prefix.clone(), dir);
            }
            drop(mounts);

            dep.source.href = Some(prefix);
        }

        if scrub_file {
            dep.source.file = None;
        }
        Ok(())
    }

    /// Returns the directory mounted under `prefix`.
    pub async fn resolve(&self, prefix: &str) -> Option<PathBuf> {
        self.mounts.read().await.get(prefix).cloned()
    }

    /// Returns the number of mounted prefixes.
    pub async fn mounted_count(&self) -> usize {
        self.mounts.read().await.len()
    }

    fn resolve_dir(&self, dep: &HtmlDependency) -> Result<PathBuf, GatewayError> {
        let file = dep
            .source
            .file
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidDependency {
                name: dep.prefix(),
                reason: "neither href nor file is set".to_string(),
            })?;

        match dep.source.package.as_deref() {
            Some(package) => self
                .packages
                .get(package)
                .map(|root| root.join(file))
                .ok_or_else(|| GatewayError::UnknownPackage(package.to_string())),
            None => Ok(file.clone()),
        }
    }
}

/// Serves `/{prefix}/{path}` from the directory mounted under `prefix`.
///
/// Unknown prefixes yield 404.
pub async fn serve_dependency(registry: &DependencyRegistry, request: Request) -> Response {
    let (prefix, rewritten) = {
        let uri = request.uri();
        let path = uri.path().trim_start_matches('/');
        let (prefix, rest) = path.split_once('/').unwrap_or((path, ""));
        let rewritten = match uri.query() {
            Some(query) => format!("/{rest}?{query}"),
            None => format!("/{rest}"),
        };
        (prefix.to_string(), rewritten)
    };

    let Some(dir) = registry.resolve(&prefix).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(uri) = rewritten.parse::<Uri>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let (mut parts, body) = request.into_parts();
    parts.uri = uri;
    let request = Request::from_parts(parts, body);

    match ServeDir::new(dir).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}
