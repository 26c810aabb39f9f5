//! Minimal HTML document model.
//!
//! Only what the page route needs: a body fragment, a title, extra head
//! markup, and the static dependencies (scripts and stylesheets) the page
//! pulls in.

use std::fmt::Write as _;
use std::path::PathBuf;

use super::DependencyRegistry;
use crate::error::GatewayError;

/// Where a dependency's files live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySource {
    /// Local directory, relative to `package` when that is set.
    pub file: Option<PathBuf>,
    /// URL prefix the files are served from. Set once mounted, or supplied
    /// up front for externally hosted assets.
    pub href: Option<String>,
    /// Owning package whose directory `file` is relative to.
    pub package: Option<String>,
}

/// A versioned bundle of static assets referenced by a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDependency {
    /// Bundle name.
    pub name: String,
    /// Bundle version.
    pub version: String,
    /// File location and served URL.
    pub source: DependencySource,
    /// Script paths relative to the bundle root.
    pub scripts: Vec<String>,
    /// Stylesheet paths relative to the bundle root.
    pub stylesheets: Vec<String>,
}

impl HtmlDependency {
    /// Creates a dependency with no source and no assets.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: DependencySource::default(),
            scripts: Vec::new(),
            stylesheets: Vec::new(),
        }
    }

    /// Sets the local directory.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.source.file = Some(file.into());
        self
    }

    /// Sets an external URL prefix; such dependencies are never mounted.
    #[must_use]
    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.source.href = Some(href.into());
        self
    }

    /// Makes `file` relative to a registered package directory.
    #[must_use]
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.source.package = Some(package.into());
        self
    }

    /// Adds a script.
    #[must_use]
    pub fn with_script(mut self, path: impl Into<String>) -> Self {
        self.scripts.push(path.into());
        self
    }

    /// Adds a stylesheet.
    #[must_use]
    pub fn with_stylesheet(mut self, path: impl Into<String>) -> Self {
        self.stylesheets.push(path.into());
        self
    }

    /// The mount prefix, `name-version`.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    fn asset_url(&self, path: &str) -> String {
        match self.source.href.as_deref() {
            Some(href) => format!("{}/{}", href.trim_end_matches('/'), path),
            None => path.to_string(),
        }
    }
}

/// A page: body markup plus the dependencies it references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlDocument {
    /// Document title.
    pub title: Option<String>,
    /// Raw markup appended to `<head>`.
    pub head: Vec<String>,
    /// Raw body markup.
    pub body: String,
    /// Referenced dependencies, in document order.
    pub dependencies: Vec<HtmlDependency>,
}

/// Output of [`HtmlDocument::render`].
#[derive(Debug, Clone)]
pub struct RenderedHtml {
    /// The full HTML document.
    pub html: String,
    /// Dependencies as rendered, with `href` set and files scrubbed.
    pub dependencies: Vec<HtmlDependency>,
}

impl HtmlDocument {
    /// Creates a document with the given body markup.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Appends raw head markup.
    #[must_use]
    pub fn with_head(mut self, markup: impl Into<String>) -> Self {
        self.head.push(markup.into());
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: HtmlDependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Appends dependencies, skipping any whose name is already present.
    pub fn append_dependencies(&mut self, deps: impl IntoIterator<Item = HtmlDependency>) {
        for dep in deps {
            if !self.dependencies.iter().any(|d| d.name == dep.name) {
                self.dependencies.push(dep);
            }
        }
    }

    /// Renders the document, registering every dependency with `registry`
    /// so its files are served under the prefix the page links to.
    ///
    /// # Errors
    ///
    /// Propagates [`DependencyRegistry::register`] failures; a page that
    /// references an unmountable dependency is a programming error.
    pub async fn render(mut self, registry: &DependencyRegistry) -> Result<RenderedHtml, GatewayError> {
        for dep in &mut self.dependencies {
            registry.register(dep, true).await?;
        }

        let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\"/>\n");
        if let Some(title) = &self.title {
            let _ = writeln!(html, "<title>{}</title>", escape(title));
        }
        for dep in &self.dependencies {
            for css in &dep.stylesheets {
                let _ = writeln!(
                    html,
                    "<link href=\"{}\" rel=\"stylesheet\"/>",
                    escape(&dep.asset_url(css))
                );
            }
            for js in &dep.scripts {
                let _ = writeln!(html, "<script src=\"{}\"></script>", escape(&dep.asset_url(js)));
            }
        }
        for markup in &self.head {
            html.push_str(markup);
            html.push('\n');
        }
        html.push_str("</head>\n<body>\n");
        html.push_str(&self.body);
        html.push_str("\n</body>\n</html>\n");

        Ok(RenderedHtml {
            html,
            dependencies: self.dependencies,
        })
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn prefix_joins_name_and_version() {
        assert_eq!(HtmlDependency::new("plotly", "2.1").prefix(), "plotly-2.1");
    }

    #[test]
    fn append_skips_duplicate_names() {
        let mut doc = HtmlDocument::new("").with_dependency(HtmlDependency::new("a", "1"));
        doc.append_dependencies([HtmlDependency::new("a", "2"), HtmlDependency::new("b", "1")]);
        let names: Vec<_> = doc.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn render_links_external_assets() {
        let doc = HtmlDocument::new("<div id=\"app\"></div>")
            .with_title("Tom & Jerry")
            .with_dependency(
                HtmlDependency::new("cdn", "1.0")
                    .with_href("https://cdn.example.com/lib/")
                    .with_script("lib.js")
                    .with_stylesheet("lib.css"),
            );
        let registry = DependencyRegistry::new();
        let Ok(rendered) = doc.render(&registry).await else {
            panic!("render failed");
        };

        assert!(rendered.html.starts_with("<!DOCTYPE html>"));
        assert!(rendered.html.contains("<title>Tom &amp; Jerry</title>"));
        assert!(rendered.html.contains("<script src=\"https://cdn.example.com/lib/lib.js\"></script>"));
        assert!(rendered.html.contains("<link href=\"https://cdn.example.com/lib/lib.css\" rel=\"stylesheet\"/>"));
        assert!(rendered.html.contains("<div id=\"app\"></div>"));
        assert_eq!(registry.mounted_count().await, 0);
    }
}
