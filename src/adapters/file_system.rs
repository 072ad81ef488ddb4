use std::{
    collections::HashSet,
    convert::TryFrom,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr, eyre};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::{
    config::models::ServerConfig,
    core::locale::normalize_locale_path,
    ports::artifact_store::{
        Artifact, ArtifactKind, ArtifactStore, ArtifactStoreError, ArtifactStoreResult,
    },
};

/// Artifact store over a list of built pages and a public directory.
///
/// Page names are matched exactly (`/blog/[slug]`). Anything else is looked
/// up as a file under the public directory. A leading locale segment is
/// removed before either lookup and reported on the artifact.
#[derive(Debug, Clone, Default)]
pub struct FileSystemArtifactStore {
    public_dir: Option<PathBuf>,
    pages: HashSet<String>,
    locales: Vec<String>,
}

impl FileSystemArtifactStore {
    pub fn new(public_dir: Option<PathBuf>, pages: impl IntoIterator<Item = String>) -> Self {
        Self {
            public_dir,
            pages: pages.into_iter().collect(),
            locales: Vec::new(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        let store = Self::new(
            config.public_dir.as_ref().map(PathBuf::from),
            config.pages.iter().cloned(),
        );
        match &config.routing.i18n {
            Some(i18n) => store.with_locales(i18n.locales.clone()),
            None => store,
        }
    }

    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.locales = locales;
        self
    }

    fn page_kind(page: &str) -> ArtifactKind {
        if page == "/api" || page.starts_with("/api/") {
            ArtifactKind::ApiRoute
        } else if matches!(page, "/404" | "/500" | "/_error") {
            ArtifactKind::ErrorPage
        } else {
            ArtifactKind::Page
        }
    }

    /// Whether `path` names a regular file inside `root`.
    async fn file_exists(&self, root: &Path, path: &str) -> ArtifactStoreResult<bool> {
        if path.split('/').any(|segment| segment == "..") {
            return Ok(false);
        }
        let full_path = root.join(path.trim_start_matches('/'));

        let metadata = match tokio::fs::metadata(&full_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(ArtifactStoreError::IoError(e)),
        };
        if !metadata.is_file() {
            return Ok(false);
        }

        // Symlinks may still point outside the root.
        let canonical_root = tokio::fs::canonicalize(root).await?;
        let canonical_path = tokio::fs::canonicalize(&full_path).await?;
        if !canonical_path.starts_with(&canonical_root) {
            return Err(ArtifactStoreError::InvalidPath(format!(
                "{path} resolves outside the public directory"
            )));
        }
        Ok(true)
    }

    /// Serve a static artifact from the public directory.
    pub async fn serve(&self, path: &str, req: Request<AxumBody>) -> Result<Response<AxumBody>> {
        let root = self
            .public_dir
            .as_ref()
            .ok_or_else(|| eyre!("No public directory configured"))?;

        let uri_string = format!("/{}", path.trim_start_matches('/'));
        let uri = hyper::Uri::try_from(uri_string).wrap_err("Failed to parse URI for file serving")?;

        let (parts, body) = req.into_parts();
        let mut file_req = Request::from_parts(parts, body);
        *file_req.uri_mut() = uri;

        let response = ServeDir::new(root)
            .oneshot(file_req)
            .await
            .wrap_err("ServeDir failed to serve file")?;

        let (parts, body) = response.into_parts();
        let body = AxumBody::new(body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));
        Ok(Response::from_parts(parts, body))
    }
}

#[async_trait]
impl ArtifactStore for FileSystemArtifactStore {
    async fn lookup_artifact(&self, path: &str) -> ArtifactStoreResult<Option<Artifact>> {
        let localized = normalize_locale_path(path, &self.locales);
        let stamp = |artifact: Artifact| match &localized.detected {
            Some(locale) => artifact.with_locale(locale.clone()),
            None => artifact,
        };

        let name = localized.pathname.as_str();
        if self.pages.contains(name) {
            return Ok(Some(stamp(Artifact::new(name, Self::page_kind(name)))));
        }

        if let Some(root) = &self.public_dir {
            if self.file_exists(root, name).await? {
                return Ok(Some(stamp(Artifact::new(name, ArtifactKind::StaticFile))));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    use super::*;

    async fn create_test_file(dir: &TempDir, path: &str, content: &str) -> std::io::Result<()> {
        let full_path = dir.path().join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full_path, content).await
    }

    fn store(dir: &TempDir) -> FileSystemArtifactStore {
        FileSystemArtifactStore::new(
            Some(dir.path().to_path_buf()),
            ["/about", "/blog/[slug]", "/api/users", "/404"].map(String::from),
        )
    }

    #[tokio::test]
    async fn test_pages_take_their_kind_from_the_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        let about = store.lookup_artifact("/about").await.unwrap().unwrap();
        assert_eq!(about.kind, ArtifactKind::Page);
        let api = store.lookup_artifact("/api/users").await.unwrap().unwrap();
        assert_eq!(api.kind, ArtifactKind::ApiRoute);
        let not_found = store.lookup_artifact("/404").await.unwrap().unwrap();
        assert_eq!(not_found.kind, ArtifactKind::ErrorPage);
        assert!(store.lookup_artifact("/blog/hello").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_files_are_found() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "favicon.ico", "icon").await.unwrap();
        create_test_file(&temp_dir, "assets/app.css", "body{}").await.unwrap();
        let store = store(&temp_dir);

        let file = store.lookup_artifact("/assets/app.css").await.unwrap().unwrap();
        assert_eq!(file.kind, ArtifactKind::StaticFile);
        assert!(store.lookup_artifact("/assets").await.unwrap().is_none());
        assert!(store.lookup_artifact("/missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locale_prefix_is_stripped_and_reported() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "favicon.ico", "icon").await.unwrap();
        let store = store(&temp_dir).with_locales(vec!["en".into(), "fr".into()]);

        let page = store.lookup_artifact("/fr/blog/[slug]").await.unwrap().unwrap();
        assert_eq!(page.path, "/blog/[slug]");
        assert_eq!(page.locale.as_deref(), Some("fr"));

        let file = store.lookup_artifact("/en/favicon.ico").await.unwrap().unwrap();
        assert_eq!(file.path, "/favicon.ico");
    }

    #[tokio::test]
    async fn test_path_traversal_protection() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        assert!(store.lookup_artifact("/../../../etc/passwd").await.unwrap().is_none());
        assert!(store.lookup_artifact("/a/../../secret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_serve_reads_the_file() {
        let temp_dir = TempDir::new().unwrap();
        create_test_file(&temp_dir, "hello.txt", "Hello, world!").await.unwrap();
        let store = store(&temp_dir);

        let request = Request::builder()
            .uri("/ignored")
            .body(AxumBody::empty())
            .unwrap();
        let response = store.serve("/hello.txt", request).await.unwrap();
        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "Hello, world!");
    }
}
