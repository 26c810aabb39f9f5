//! UI values served on `GET /`.
//!
//! The page handler resolves a [`UiSource`] into a [`Ui`]: either a
//! renderable [`HtmlDocument`], a ready-made [`Response`] that bypasses
//! rendering, or an invalid value that produces a fixed 500 page.

pub mod dependency;
pub mod document;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;

pub use dependency::DependencyRegistry;
pub use document::{DependencySource, HtmlDependency, HtmlDocument, RenderedHtml};

/// Name of the framework's client runtime dependency.
pub const RUNTIME_DEPENDENCY_NAME: &str = "weave";

/// A resolved UI value.
pub enum Ui {
    /// A document to render, mounting its dependencies on the way.
    Document(HtmlDocument),
    /// A complete response, returned unmodified.
    Response(Response),
    /// Anything else. The string describes what was produced, for logs.
    Invalid(String),
}

impl fmt::Debug for Ui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document(doc) => f.debug_tuple("Document").field(doc).finish(),
            Self::Response(res) => f.debug_tuple("Response").field(&res.status()).finish(),
            Self::Invalid(what) => f.debug_tuple("Invalid").field(what).finish(),
        }
    }
}

impl From<HtmlDocument> for Ui {
    fn from(doc: HtmlDocument) -> Self {
        Self::Document(doc)
    }
}

impl From<Response> for Ui {
    fn from(res: Response) -> Self {
        Self::Response(res)
    }
}

/// Function producing a [`Ui`] for each page request.
pub type UiFn = Arc<dyn Fn(&Request) -> Ui + Send + Sync>;

/// Where the page UI comes from.
#[derive(Clone)]
pub enum UiSource {
    /// The same document for every request.
    Static(HtmlDocument),
    /// Computed per request.
    Dynamic(UiFn),
}

impl UiSource {
    /// Wraps a closure as a [`UiSource::Dynamic`].
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Request) -> Ui + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Resolves the UI for one request.
    #[must_use]
    pub fn resolve(&self, request: &Request) -> Ui {
        match self {
            Self::Static(doc) => Ui::Document(doc.clone()),
            Self::Dynamic(f) => f(request),
        }
    }
}

impl fmt::Debug for UiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(doc) => f.debug_tuple("Static").field(doc).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<HtmlDocument> for UiSource {
    fn from(doc: HtmlDocument) -> Self {
        Self::Static(doc)
    }
}

/// Dependencies every page needs for the client runtime to connect back.
#[must_use]
pub fn runtime_dependencies(runtime_dir: &Path) -> Vec<HtmlDependency> {
    vec![
        HtmlDependency::new(RUNTIME_DEPENDENCY_NAME, env!("CARGO_PKG_VERSION"))
            .with_file(runtime_dir)
            .with_script("weave.js")
            .with_stylesheet("weave.css"),
    ]
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn request(uri: &str) -> Request {
        let Ok(req) = Request::builder().uri(uri).body(Body::empty()) else {
            panic!("bad request");
        };
        req
    }

    #[test]
    fn static_source_yields_document() {
        let source = UiSource::from(HtmlDocument::new("<p>hi</p>"));
        assert!(matches!(source.resolve(&request("/")), Ui::Document(_)));
    }

    #[test]
    fn dynamic_source_sees_request() {
        let source = UiSource::dynamic(|req| {
            if req.uri().query() == Some("raw") {
                StatusCode::NOT_FOUND.into_response().into()
            } else {
                HtmlDocument::new("page").into()
            }
        });
        let Ui::Response(res) = source.resolve(&request("/?raw")) else {
            panic!("expected response");
        };
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(matches!(source.resolve(&request("/")), Ui::Document(_)));
    }

    #[test]
    fn runtime_dependency_points_at_runtime_dir() {
        let deps = runtime_dependencies(Path::new("assets/runtime"));
        let Some(dep) = deps.first() else {
            panic!("no runtime dependency");
        };
        assert_eq!(dep.name, RUNTIME_DEPENDENCY_NAME);
        assert_eq!(dep.source.file.as_deref(), Some(Path::new("assets/runtime")));
    }
}
