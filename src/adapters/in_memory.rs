//! In-memory providers for tests, dry runs and embedding.
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::{
    config::models::DynamicRouteDescriptor,
    core::{
        locale::normalize_locale_path,
        pattern::{PathPattern, PatternError},
    },
    ports::{
        artifact_store::{Artifact, ArtifactKind, ArtifactStore, ArtifactStoreResult},
        dynamic_routes::{DynamicRoute, DynamicRouteRegistry},
        middleware_worker::{
            MiddlewareRequest, MiddlewareResponse, MiddlewareResult, MiddlewareWorker,
        },
    },
};

/// Artifact store backed by a map. Lookups are counted per path.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: HashMap<String, ArtifactKind>,
    locales: Vec<String>,
    lookups: Mutex<HashMap<String, usize>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, kind: ArtifactKind) -> Self {
        self.artifacts.insert(path.into(), kind);
        self
    }

    pub fn page(self, path: impl Into<String>) -> Self {
        self.with(path, ArtifactKind::Page)
    }

    pub fn static_file(self, path: impl Into<String>) -> Self {
        self.with(path, ArtifactKind::StaticFile)
    }

    /// Strip these locales from lookup paths, as the file system store does.
    pub fn with_locales(mut self, locales: &[&str]) -> Self {
        self.locales = locales.iter().map(|l| l.to_string()).collect();
        self
    }

    /// How many times `path` was looked up.
    pub fn lookups(&self, path: &str) -> usize {
        self.lookups
            .lock()
            .map(|counts| counts.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn lookup_artifact(&self, path: &str) -> ArtifactStoreResult<Option<Artifact>> {
        if let Ok(mut counts) = self.lookups.lock() {
            *counts.entry(path.to_string()).or_default() += 1;
        }
        let localized = normalize_locale_path(path, &self.locales);
        Ok(self
            .artifacts
            .get(&localized.pathname)
            .map(|kind| {
                let artifact = Artifact::new(localized.pathname.clone(), *kind);
                match &localized.detected {
                    Some(locale) => artifact.with_locale(locale.clone()),
                    None => artifact,
                }
            }))
    }
}

/// An ordered list of dynamic routes that can be replaced wholesale, e.g.
/// when the configuration is reloaded.
#[derive(Debug, Clone)]
pub struct StaticRouteRegistry {
    routes: Arc<ArcSwap<Arc<[DynamicRoute]>>>,
    enumerations: Arc<AtomicUsize>,
}

fn parse_routes<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Vec<DynamicRoute>, PatternError> {
    pairs
        .into_iter()
        .map(|(name, pattern)| {
            Ok(DynamicRoute {
                name: name.to_string(),
                pattern: PathPattern::parse_case_sensitive(pattern)?,
            })
        })
        .collect()
}

impl StaticRouteRegistry {
    pub fn new(routes: Vec<DynamicRoute>) -> Self {
        Self {
            routes: Arc::new(ArcSwap::from_pointee(routes.into())),
            enumerations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `(page, pattern)` pairs in registration order.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self, PatternError> {
        parse_routes(pairs.iter().copied()).map(Self::new)
    }

    pub fn from_descriptors(descriptors: &[DynamicRouteDescriptor]) -> Result<Self, PatternError> {
        parse_routes(descriptors.iter().map(|d| (d.page.as_str(), d.pattern.as_str())))
            .map(Self::new)
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Swap in a new route list. Enumerations already handed out keep the old one.
    pub fn replace(&self, descriptors: &[DynamicRouteDescriptor]) -> Result<(), PatternError> {
        let routes = parse_routes(descriptors.iter().map(|d| (d.page.as_str(), d.pattern.as_str())))?;
        self.routes.store(Arc::new(routes.into()));
        Ok(())
    }

    /// How many times the routes were enumerated.
    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::Relaxed)
    }
}

impl DynamicRouteRegistry for StaticRouteRegistry {
    fn enumerate_dynamic_routes(&self) -> Arc<[DynamicRoute]> {
        self.enumerations.fetch_add(1, Ordering::Relaxed);
        let current = self.routes.load();
        let routes: &Arc<[DynamicRoute]> = &current;
        routes.clone()
    }
}

type Handler = dyn Fn(MiddlewareRequest) -> Pin<Box<dyn Future<Output = MiddlewareResult<MiddlewareResponse>> + Send>>
    + Send
    + Sync;

/// Middleware implemented by a closure in the same process.
pub struct InProcessMiddleware {
    handler: Box<Handler>,
    invocations: AtomicUsize,
}

impl InProcessMiddleware {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(MiddlewareRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MiddlewareResult<MiddlewareResponse>> + Send + 'static,
    {
        Self {
            handler: Box::new(move |request| Box::pin(handler(request))),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MiddlewareWorker for InProcessMiddleware {
    async fn ensure_ready(&self) -> MiddlewareResult<()> {
        Ok(())
    }

    async fn invoke(&self, request: MiddlewareRequest) -> MiddlewareResult<MiddlewareResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        (self.handler)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_counts_lookups_and_strips_locales() {
        let store = InMemoryArtifactStore::new()
            .page("/about")
            .with_locales(&["en", "fr"]);
        let found = store.lookup_artifact("/fr/about").await.unwrap().unwrap();
        assert_eq!(found.path, "/about");
        assert_eq!(found.locale.as_deref(), Some("fr"));
        assert!(store.lookup_artifact("/missing").await.unwrap().is_none());
        assert_eq!(store.lookups("/fr/about"), 1);
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry =
            StaticRouteRegistry::from_pairs(&[("/blog/[slug]", "/blog/:slug"), ("/[page]", "/:page")])
                .unwrap();
        let routes = registry.enumerate_dynamic_routes();
        assert_eq!(routes[0].name, "/blog/[slug]");
        assert_eq!(routes[1].name, "/[page]");
        assert_eq!(registry.enumerations(), 1);

        registry
            .replace(&[DynamicRouteDescriptor::new("/docs/[...parts]", "/docs/:parts+")])
            .unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(registry.enumerate_dynamic_routes()[0].name, "/docs/[...parts]");
    }
}
