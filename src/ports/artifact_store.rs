use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// What kind of output an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    StaticFile,
    Page,
    AppRoute,
    ApiRoute,
    ErrorPage,
    External,
}

impl ArtifactKind {
    /// Rendered on request rather than served from disk.
    pub fn is_rendered(self) -> bool {
        matches!(
            self,
            ArtifactKind::Page | ArtifactKind::AppRoute | ArtifactKind::ErrorPage
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::StaticFile => "static_file",
            ArtifactKind::Page => "page",
            ArtifactKind::AppRoute => "app_route",
            ArtifactKind::ApiRoute => "api_route",
            ArtifactKind::ErrorPage => "error_page",
            ArtifactKind::External => "external",
        }
    }
}

/// A build output the caller can render or serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Artifact identifier: a page name or a public file path.
    pub path: String,
    pub kind: ArtifactKind,
    /// Locale the lookup path carried, when the store detected one.
    pub locale: Option<String>,
}

impl Artifact {
    pub fn new(path: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            kind,
            locale: None,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

/// Error type for artifact lookups
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ArtifactStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Artifact store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for artifact lookups
pub type ArtifactStoreResult<T> = Result<T, ArtifactStoreError>;

/// ArtifactStore answers whether a path maps to a build output.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Look up the artifact for an exact request path.
    ///
    /// Returns `Ok(None)` when nothing exists at `path`. Errors are reserved
    /// for lookups that could not be answered.
    async fn lookup_artifact(&self, path: &str) -> ArtifactStoreResult<Option<Artifact>>;
}
