//! Request resolver.
//!
//! Walks the compiled [`RouteTable`] against one request. Every entry yields
//! an explicit [`EntryOutcome`]; the walk only ever moves forward, except for
//! the two sanctioned jumps (middleware rewrite back to the filesystem
//! boundary, and the linear `Hit` boundary onward to the error phase).
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    context::ResolutionContext,
    destination::{DestinationTemplate, QueryMode},
    locale::normalize_locale_path,
    middleware,
    pattern::Params,
    query::DATA_KEY,
    request::InboundRequest,
    result::{Outcome, ResolutionResult},
    route_table::{Boundary, Effect, Phase, RouteEntry, RouteTable},
};
use crate::{
    metrics,
    ports::{
        artifact_store::{Artifact, ArtifactKind, ArtifactStore, ArtifactStoreError},
        dynamic_routes::DynamicRouteRegistry,
        middleware_worker::{MiddlewareError, MiddlewareWorker},
    },
    tracing_setup::create_resolution_span,
    utils::url::{
        has_path_prefix, needs_slash_normalization, normalize_repeated_slashes, strip_path_prefix,
    },
};

/// Default budget for one middleware round trip.
pub const DEFAULT_MIDDLEWARE_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures during a resolution. `resolve` never returns these; they become
/// a 500 result with `fault` set.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("artifact lookup for '{path}' failed: {source}")]
    Lookup {
        path: String,
        source: ArtifactStoreError,
    },

    #[error("middleware matched but no middleware worker is configured")]
    MiddlewareUnavailable,

    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    #[error("middleware did not answer within {0:?}")]
    MiddlewareTimeout(Duration),

    #[error("middleware returned an unusable URL '{url}': {source}")]
    InvalidMiddlewareUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("request was cancelled")]
    Cancelled,
}

/// What applying one entry did to the walk.
#[derive(Debug)]
pub enum EntryOutcome {
    /// The entry did not apply.
    NoMatch,
    /// The entry applied; move to the next one.
    Continue,
    /// Resume at the first entry of the phase.
    Reenter(Phase),
    Terminate(Box<ResolutionResult>),
}

/// Resolves requests against the active route table.
pub struct Resolver {
    table: ArcSwap<RouteTable>,
    artifacts: Arc<dyn ArtifactStore>,
    middleware: Option<Arc<dyn MiddlewareWorker>>,
    middleware_timeout: Duration,
}

impl Resolver {
    pub fn new(table: RouteTable, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            artifacts,
            middleware: None,
            middleware_timeout: DEFAULT_MIDDLEWARE_TIMEOUT,
        }
    }

    pub fn with_middleware(mut self, worker: Arc<dyn MiddlewareWorker>, timeout: Duration) -> Self {
        self.middleware = Some(worker);
        self.middleware_timeout = timeout;
        self
    }

    /// The table new resolutions will use.
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Swap in a new table. Resolutions already running keep theirs.
    pub fn reload(&self, table: RouteTable) {
        let entries = table.len();
        self.table.store(Arc::new(table));
        metrics::record_table_reload(true, entries);
        tracing::info!(entries, "Route table reloaded");
    }

    /// Resolve one request. Always produces a result.
    pub async fn resolve(
        &self,
        request: InboundRequest,
        registry: &dyn DynamicRouteRegistry,
    ) -> ResolutionResult {
        let started = Instant::now();
        let table = self.table.load_full();
        let request_id = Uuid::new_v4().to_string();
        let span = create_resolution_span(request.method.as_str(), &request.target, &request_id);

        let result = self
            .resolve_with(&table, request, registry)
            .instrument(span.clone())
            .await;

        let outcome = result.outcome.as_str();
        span.record("outcome", outcome);
        span.record("path.resolved", result.path.as_str());
        if let Some(status) = result.status_code {
            span.record("status", status);
        }
        metrics::increment_resolutions(outcome);
        metrics::record_resolution_duration(outcome, started.elapsed());
        result
    }

    async fn resolve_with(
        &self,
        table: &RouteTable,
        request: InboundRequest,
        registry: &dyn DynamicRouteRegistry,
    ) -> ResolutionResult {
        if needs_slash_normalization(&request.target) {
            let location = normalize_repeated_slashes(&request.target);
            tracing::debug!(location = %location, "Normalizing repeated slashes");
            return ResolutionResult::normalization_redirect(
                &request.target,
                &location,
                request.headers,
            );
        }

        let ctx = ResolutionContext::seed(request, table.settings());
        let mut walk = Walk {
            resolver: self,
            table,
            registry,
            ctx,
        };
        match walk.run().await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, path = %walk.ctx.path, "Resolution failed");
                walk.fault(e).await
            }
        }
    }
}

/// One resolution in progress.
struct Walk<'a> {
    resolver: &'a Resolver,
    table: &'a RouteTable,
    registry: &'a dyn DynamicRouteRegistry,
    ctx: ResolutionContext,
}

impl Walk<'_> {
    async fn run(&mut self) -> Result<ResolutionResult, ResolveError> {
        let table = self.table;
        let entries = table.entries();
        let mut cursor = 0;
        while let Some(entry) = entries.get(cursor) {
            match self.apply(entry).await? {
                EntryOutcome::NoMatch | EntryOutcome::Continue => cursor += 1,
                EntryOutcome::Reenter(phase) => {
                    tracing::debug!(%phase, "Re-entering table");
                    cursor = table.phase_start(phase);
                }
                EntryOutcome::Terminate(result) => return Ok(*result),
            }
        }
        // The error boundary always terminates; only a hand-built table gets here.
        Ok(self.error_result(404).await)
    }

    async fn apply(&mut self, entry: &RouteEntry) -> Result<EntryOutcome, ResolveError> {
        if let Effect::Boundary(boundary) = &entry.effect {
            return self.boundary(*boundary).await;
        }
        if let Some(name) = &entry.name {
            if self.ctx.visited.contains(name) {
                return Ok(EntryOutcome::NoMatch);
            }
        }

        let Some(params) = self.evaluate(entry) else {
            return Ok(EntryOutcome::NoMatch);
        };
        tracing::debug!(entry = %entry.describe(), "Matched");

        match &entry.effect {
            Effect::Headers(templates) => {
                for template in templates {
                    let value = template.value.render(&params);
                    self.ctx.response_headers.set(&template.key, value);
                }
                Ok(EntryOutcome::Continue)
            }
            Effect::Redirect {
                status,
                destination,
            } => Ok(self.redirect(*status, destination, &params)),
            Effect::Rewrite { destination, check } => {
                if let Some(name) = &entry.name {
                    self.ctx.visited.insert(name.clone());
                }
                self.rewrite(destination, *check, &params).await
            }
            Effect::Status { code, .. } => Ok(EntryOutcome::Terminate(Box::new(
                self.error_result(*code).await,
            ))),
            Effect::Middleware => self.middleware().await,
            Effect::Boundary(_) => Ok(EntryOutcome::Continue),
        }
    }

    fn evaluate(&self, entry: &RouteEntry) -> Option<Params> {
        let settings = self.table.settings();
        if entry.internal {
            let path = self.ctx.internal_path(settings);
            entry.evaluate(&path, &self.ctx.condition_input())
        } else {
            entry.evaluate(&self.ctx.path, &self.ctx.condition_input())
        }
    }

    async fn boundary(&mut self, boundary: Boundary) -> Result<EntryOutcome, ResolveError> {
        match boundary {
            Boundary::Filesystem => {
                let path = self.ctx.path.clone();
                if let Some(artifact) = self.lookup(&path).await? {
                    if self.admissible(&artifact) {
                        return Ok(EntryOutcome::Terminate(Box::new(self.hit(artifact))));
                    }
                }
                Ok(EntryOutcome::Continue)
            }
            Boundary::Check => Ok(match self.recheck().await? {
                Some(result) => EntryOutcome::Terminate(Box::new(result)),
                None => EntryOutcome::Continue,
            }),
            Boundary::Hit => Ok(EntryOutcome::Reenter(Phase::Error)),
            Boundary::Error => Ok(EntryOutcome::Terminate(Box::new(
                self.error_result(404).await,
            ))),
            Boundary::BeforeFilesEnd | Boundary::Resource | Boundary::Miss => {
                Ok(EntryOutcome::Continue)
            }
        }
    }

    fn redirect(&self, status: u16, destination: &DestinationTemplate, params: &Params) -> EntryOutcome {
        let mut target = destination.compile(params, &self.ctx.query, QueryMode::Explicit);
        if !target.is_external() {
            target.path = normalize_repeated_slashes(&target.path);
            if let Some(state) = &self.ctx.locale {
                target.path = super::context::strip_locale(
                    &target.path,
                    &self.table.settings().base_path,
                    &state.default_locale,
                );
            }
        }
        let location = target.public_url();
        tracing::debug!(status, location = %location, "Redirecting");
        EntryOutcome::Terminate(Box::new(ResolutionResult::redirect(
            &self.ctx, status, &location,
        )))
    }

    async fn rewrite(
        &mut self,
        destination: &DestinationTemplate,
        check: bool,
        params: &Params,
    ) -> Result<EntryOutcome, ResolveError> {
        let target = destination.compile(params, &self.ctx.query, QueryMode::Passthrough);
        if target.is_external() {
            let url = target.public_url();
            tracing::debug!(url = %url, "Rewriting to an external URL");
            return Ok(EntryOutcome::Terminate(Box::new(ResolutionResult::external(
                &self.ctx, url,
            ))));
        }

        self.ctx.apply_destination(target);
        self.ctx.rewritten = true;
        self.ctx.redetect_locale(self.table.settings());

        if check {
            if let Some(result) = self.recheck().await? {
                return Ok(EntryOutcome::Terminate(Box::new(result)));
            }
        }
        Ok(EntryOutcome::Continue)
    }

    async fn middleware(&mut self) -> Result<EntryOutcome, ResolveError> {
        if self.ctx.middleware_invoked {
            return Ok(EntryOutcome::NoMatch);
        }
        self.ctx.middleware_invoked = true;
        let resolver = self.resolver;
        let table = self.table;
        let Some(worker) = &resolver.middleware else {
            return Err(ResolveError::MiddlewareUnavailable);
        };
        middleware::invoke(
            &mut self.ctx,
            table.settings(),
            worker.as_ref(),
            resolver.middleware_timeout,
        )
        .await
    }

    /// Try the current path as a file, then against the dynamic routes.
    async fn recheck(&mut self) -> Result<Option<ResolutionResult>, ResolveError> {
        let path = self.ctx.path.clone();
        if let Some(artifact) = self.lookup(&path).await? {
            if self.admissible(&artifact) {
                return Ok(Some(self.hit(artifact)));
            }
        }

        let table = self.table;
        let settings = table.settings();
        let Some(rest) = strip_path_prefix(&path, &settings.base_path) else {
            return Ok(None);
        };
        let mut candidate = match &settings.i18n {
            Some(i18n) => normalize_locale_path(rest, &i18n.locales).pathname,
            None => rest.to_string(),
        };
        let data_prefix = format!("{}/data/{}", settings.internal_prefix, settings.build_id);
        let data_request =
            match data_page_path(&candidate, &data_prefix, settings.i18n.as_ref()) {
                Some(page) => {
                    candidate = page;
                    true
                }
                None => false,
            };

        let routes = self.registry.enumerate_dynamic_routes();
        for route in routes.iter() {
            if self.ctx.visited.contains(&route.name) {
                continue;
            }
            let Some(params) = route.pattern.match_path(&candidate) else {
                continue;
            };
            self.ctx.visited.insert(route.name.clone());
            tracing::debug!(route = %route.name, "Dynamic route matched");

            let page = match &self.ctx.locale {
                Some(state) => format!("/{}{}", state.current, route.name),
                None => route.name.clone(),
            };
            let Some(artifact) = self.artifacts_lookup(&page).await? else {
                continue;
            };
            if !self.admissible(&artifact) {
                continue;
            }
            // Only the accepted route leaves its captures in the query.
            for (key, value) in params {
                self.ctx.query.set(key, value);
            }
            if data_request {
                self.ctx.query.set(DATA_KEY, "1");
            }
            return Ok(Some(self.hit(artifact)));
        }
        Ok(None)
    }

    /// Whether a found artifact may end the walk from here.
    fn admissible(&self, artifact: &Artifact) -> bool {
        let explicit_locale = self
            .ctx
            .locale
            .as_ref()
            .is_some_and(|state| state.detected.is_some());
        if artifact.kind == ArtifactKind::ApiRoute && explicit_locale {
            return false;
        }
        artifact.kind == ArtifactKind::StaticFile
            || self.table.settings().fs_authoritative
            || self.ctx.rewritten
    }

    /// Apply the hit-phase headers and accept `artifact`.
    fn hit(&mut self, artifact: Artifact) -> ResolutionResult {
        let table = self.table;
        for entry in table.phase_entries(Phase::Hit) {
            let Effect::Headers(templates) = &entry.effect else {
                continue;
            };
            if let Some(params) = self.evaluate(entry) {
                for template in templates {
                    let value = template.value.render(&params);
                    self.ctx.response_headers.set(&template.key, value);
                }
            }
        }
        tracing::debug!(artifact = %artifact.path, kind = artifact.kind.as_str(), "Artifact matched");
        ResolutionResult::artifact(&self.ctx, artifact)
    }

    /// The error page for `code`, qualified by locale where configured.
    async fn error_result(&mut self, code: u16) -> ResolutionResult {
        let table = self.table;
        let mut base = Params::new();
        for (key, values) in self.ctx.query.reserved().iter() {
            if let Some(value) = values.first() {
                base.insert(key.to_string(), value.clone());
            }
        }

        let mut page_path = None;
        for entry in table.phase_entries(Phase::Error) {
            let Effect::Status {
                code: entry_code,
                page: Some(page),
            } = &entry.effect
            else {
                continue;
            };
            if *entry_code != code {
                continue;
            }
            if let Some(params) = self.evaluate(entry) {
                let mut merged = base.clone();
                merged.extend(params);
                let target = page.compile(&merged, &self.ctx.query, QueryMode::Explicit);
                page_path = Some(target.path);
                break;
            }
        }

        let settings = table.settings();
        let page_path = page_path.unwrap_or_else(|| {
            let page = if code == 404 {
                &settings.not_found_page
            } else {
                &settings.error_page
            };
            format!("{}{page}", settings.base_path)
        });

        let artifact = match self.lookup(&page_path).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => Artifact::new(page_path.clone(), ArtifactKind::ErrorPage),
            Err(e) => {
                tracing::warn!(error = %e, page = %page_path, "Error page lookup failed");
                Artifact::new(page_path.clone(), ArtifactKind::ErrorPage)
            }
        };
        ResolutionResult::error_page(&self.ctx, code, page_path, artifact)
    }

    async fn fault(&mut self, error: ResolveError) -> ResolutionResult {
        let mut result = self.error_result(500).await;
        result.fault = Some(error.to_string());
        result.outcome = Outcome::Fault;
        result
    }

    /// Look up a path that still carries the base path.
    async fn lookup(&mut self, path: &str) -> Result<Option<Artifact>, ResolveError> {
        let table = self.table;
        match strip_path_prefix(path, &table.settings().base_path) {
            Some(relative) => self.artifacts_lookup(relative).await,
            None => Ok(None),
        }
    }

    // Takes `&mut self` so the future only needs `Walk: Send`.
    async fn artifacts_lookup(&mut self, path: &str) -> Result<Option<Artifact>, ResolveError> {
        let resolver = self.resolver;
        resolver
            .artifacts
            .lookup_artifact(path)
            .await
            .map_err(|source| ResolveError::Lookup {
                path: path.to_string(),
                source,
            })
    }
}

/// `{prefix}[/{locale}]/blog/post.json` to `/blog/post`.
fn data_page_path(
    path: &str,
    data_prefix: &str,
    i18n: Option<&super::locale::LocaleSettings>,
) -> Option<String> {
    if !has_path_prefix(path, data_prefix) {
        return None;
    }
    let rest = strip_path_prefix(path, data_prefix)?.strip_suffix(".json")?;
    let rest = match i18n {
        Some(i18n) => normalize_locale_path(rest, &i18n.locales).pathname,
        None => rest.to_string(),
    };
    Some(if rest == "/index" { "/".to_string() } else { rest })
}
