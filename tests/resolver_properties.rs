// End-to-end resolution behaviour over in-memory providers.
use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use switchyard::{
    adapters::{InMemoryArtifactStore, InProcessMiddleware, StaticRouteRegistry},
    config::models::{I18nConfig, MiddlewareMatcher, RedirectRule, RewriteGroups, RewriteRule, RoutingConfig},
    core::{
        InboundRequest, Outcome, Resolver, RouteTable,
        destination::{DestinationTemplate, QueryMode},
        pattern::Params,
        query::Query,
        resolver::DEFAULT_MIDDLEWARE_TIMEOUT,
    },
    ports::{artifact_store::ArtifactKind, middleware_worker::MiddlewareResponse},
};

fn resolver(routing: RoutingConfig, store: InMemoryArtifactStore) -> (Resolver, Arc<InMemoryArtifactStore>) {
    let store = Arc::new(store);
    let table = RouteTable::compile(&routing).unwrap();
    (Resolver::new(table, store.clone()), store)
}

fn i18n() -> I18nConfig {
    I18nConfig {
        locales: vec!["en".into(), "fr".into()],
        default_locale: "en".into(),
        domains: vec![],
        locale_detection: true,
    }
}

fn get(target: &str) -> InboundRequest {
    InboundRequest::get(target).header("host", "example.com")
}

#[tokio::test]
async fn redirects_win_over_files() {
    let routing = RoutingConfig {
        redirects: vec![RedirectRule::new("/old", "/new").permanent()],
        ..RoutingConfig::default()
    };
    let (resolver, _) = resolver(routing, InMemoryArtifactStore::new().static_file("/old"));
    let result = resolver
        .resolve(get("/old?utm=1"), &StaticRouteRegistry::empty())
        .await;
    assert_eq!(result.status_code, Some(308));
    assert!(result.finished);
    assert_eq!(result.location(), Some("/new"));
}

#[tokio::test]
async fn trailing_slashes_are_redirected_away() {
    let (resolver, _) = resolver(RoutingConfig::default(), InMemoryArtifactStore::new().page("/about"));
    let result = resolver
        .resolve(get("/about/"), &StaticRouteRegistry::empty())
        .await;
    assert_eq!(result.status_code, Some(308));
    assert_eq!(result.location(), Some("/about"));
}

#[tokio::test]
async fn repeated_slashes_are_normalized_first() {
    let (resolver, _) = resolver(RoutingConfig::default(), InMemoryArtifactStore::new());
    let result = resolver
        .resolve(get("//a//b?x=1"), &StaticRouteRegistry::empty())
        .await;
    assert_eq!(result.status_code, Some(308));
    assert_eq!(result.location(), Some("/a/b?x=1"));
}

#[tokio::test]
async fn not_found_uses_the_locale_qualified_page() {
    let routing = RoutingConfig {
        i18n: Some(i18n()),
        ..RoutingConfig::default()
    };
    let store = InMemoryArtifactStore::new()
        .with("/404", ArtifactKind::ErrorPage)
        .with_locales(&["en", "fr"]);
    let (resolver, _) = resolver(routing, store);
    let registry = StaticRouteRegistry::empty();

    let result = resolver.resolve(get("/fr/missing"), &registry).await;
    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.outcome, Outcome::NotFound);
    assert_eq!(result.path, "/fr/404");
    let artifact = result.matched_artifact.unwrap();
    assert_eq!(artifact.path, "/404");
    assert_eq!(artifact.locale.as_deref(), Some("fr"));

    // No locale in the URL: the default locale is used.
    let result = resolver.resolve(get("/missing"), &registry).await;
    assert_eq!(result.path, "/en/404");
    assert_eq!(result.public_path, "/missing");
}

#[test]
fn destinations_compile_deterministically() {
    let template = DestinationTemplate::parse("/posts/:slug?ref=:source").unwrap();
    let params: Params = [("slug", "hello"), ("source", "feed"), ("extra", "1")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let incoming = Query::parse("x=1&ref=ignored");

    let first = template.compile(&params, &incoming, QueryMode::Passthrough);
    let second = template.compile(&params, &incoming, QueryMode::Passthrough);
    assert_eq!(first, second);
    assert_eq!(first.path, "/posts/hello");
    assert_eq!(first.query.get("ref"), Some("feed"));
    assert_eq!(first.query.get("extra"), Some("1"));
    assert_eq!(first.query.get("x"), Some("1"));

    let redirect = template.compile(&params, &incoming, QueryMode::Explicit);
    assert!(redirect.query.get("x").is_none());
    assert_eq!(redirect.public_url(), "/posts/hello?ref=feed");
}

#[tokio::test]
async fn static_files_win_over_dynamic_routes() {
    let store = InMemoryArtifactStore::new()
        .static_file("/robots.txt")
        .page("/[page]");
    let (resolver, _) = resolver(RoutingConfig::default(), store);
    let registry = StaticRouteRegistry::from_pairs(&[("/[page]", "/:page")]).unwrap();

    let result = resolver.resolve(get("/robots.txt"), &registry).await;
    assert_eq!(result.matched_artifact.unwrap().kind, ArtifactKind::StaticFile);

    let result = resolver.resolve(get("/pricing"), &registry).await;
    let artifact = result.matched_artifact.unwrap();
    assert_eq!(artifact.path, "/[page]");
    assert_eq!(result.query.get("page"), Some("pricing"));
}

#[tokio::test]
async fn rewrites_reach_dynamic_routes_with_the_query_carried() {
    let routing = RoutingConfig {
        rewrites: RewriteGroups {
            after_files: vec![RewriteRule::new("/blog/:slug", "/posts/:slug")],
            ..RewriteGroups::default()
        },
        ..RoutingConfig::default()
    };
    let (resolver, _) = resolver(routing, InMemoryArtifactStore::new().page("/posts/[slug]"));
    let registry = StaticRouteRegistry::from_pairs(&[("/posts/[slug]", "/posts/:slug")]).unwrap();

    let result = resolver.resolve(get("/blog/hello?x=1"), &registry).await;
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.path, "/posts/hello");
    assert_eq!(result.public_path, "/blog/hello");
    assert_eq!(result.query.get("slug"), Some("hello"));
    assert_eq!(result.query.get("x"), Some("1"));
    assert_eq!(result.matched_artifact.unwrap().path, "/posts/[slug]");
}

#[tokio::test]
async fn middleware_rewrites_are_relative_and_reenter_the_filesystem() {
    let routing = RoutingConfig {
        middleware: vec![MiddlewareMatcher::new("/:path*")],
        ..RoutingConfig::default()
    };
    let store = Arc::new(InMemoryArtifactStore::new().page("/about"));
    let middleware = Arc::new(InProcessMiddleware::new(|_request| async {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-middleware-rewrite",
            "http://example.com/about?from=mw".parse().unwrap(),
        );
        Ok(MiddlewareResponse {
            status: StatusCode::OK,
            headers,
            body: axum::body::Body::empty(),
        })
    }));
    let resolver = Resolver::new(RouteTable::compile(&routing).unwrap(), store.clone())
        .with_middleware(middleware.clone(), DEFAULT_MIDDLEWARE_TIMEOUT);

    let result = resolver
        .resolve(get("/start?keep=no"), &StaticRouteRegistry::empty())
        .await;
    assert_eq!(result.outcome, Outcome::Artifact);
    assert_eq!(result.path, "/about");
    assert_eq!(result.query.get("from"), Some("mw"));
    assert!(result.query.get("keep").is_none());
    assert_eq!(middleware.invocations(), 1);
    assert_eq!(store.lookups("/about"), 1);
}

#[tokio::test]
async fn default_locale_prefix_stays_invisible() {
    let routing = RoutingConfig {
        i18n: Some(i18n()),
        redirects: vec![RedirectRule::new("/old", "/about")],
        ..RoutingConfig::default()
    };
    let store = InMemoryArtifactStore::new()
        .page("/about")
        .with_locales(&["en", "fr"]);
    let (resolver, _) = resolver(routing, store);
    let registry = StaticRouteRegistry::empty();

    let result = resolver.resolve(get("/about"), &registry).await;
    assert_eq!(result.path, "/en/about");
    assert_eq!(result.public_path, "/about");
    assert_eq!(result.matched_artifact.unwrap().locale.as_deref(), Some("en"));

    // Redirect locations never expose the default locale or reserved keys.
    let result = resolver.resolve(get("/old"), &registry).await;
    assert_eq!(result.location(), Some("/about"));
    let result = resolver.resolve(get("/fr/old"), &registry).await;
    assert_eq!(result.location(), Some("/fr/about"));
}

#[tokio::test]
async fn each_dynamic_route_is_attempted_once() {
    // A rewrite loop through both recheck points plus a middleware rewrite
    // back into the filesystem phase.
    let routing = RoutingConfig {
        middleware: vec![MiddlewareMatcher::new("/start")],
        rewrites: RewriteGroups {
            after_files: vec![RewriteRule::new("/loop", "/spin")],
            fallback: vec![RewriteRule::new("/spin", "/loop")],
            ..RewriteGroups::default()
        },
        ..RoutingConfig::default()
    };
    // The route's page is never built, so every match is a miss.
    let store = Arc::new(InMemoryArtifactStore::new());
    let middleware = Arc::new(InProcessMiddleware::new(|_request| async {
        let mut headers = HeaderMap::new();
        headers.insert("x-middleware-rewrite", "/loop".parse().unwrap());
        Ok(MiddlewareResponse {
            status: StatusCode::OK,
            headers,
            body: axum::body::Body::empty(),
        })
    }));
    let resolver = Resolver::new(RouteTable::compile(&routing).unwrap(), store.clone())
        .with_middleware(middleware.clone(), DEFAULT_MIDDLEWARE_TIMEOUT);
    let registry = StaticRouteRegistry::from_pairs(&[("/[word]", "/:word")]).unwrap();

    let result = resolver.resolve(get("/start"), &registry).await;
    assert_eq!(result.status_code, Some(404));
    assert_eq!(store.lookups("/[word]"), 1);
    assert_eq!(middleware.invocations(), 1);
}

#[tokio::test]
async fn table_reload_applies_to_new_resolutions() {
    let (resolver, _) = resolver(RoutingConfig::default(), InMemoryArtifactStore::new().page("/new"));
    let registry = StaticRouteRegistry::empty();
    assert_eq!(resolver.resolve(get("/old"), &registry).await.status_code, Some(404));

    let routing = RoutingConfig {
        redirects: vec![RedirectRule::new("/old", "/new")],
        ..RoutingConfig::default()
    };
    resolver.reload(RouteTable::compile(&routing).unwrap());
    let result = resolver.resolve(get("/old"), &registry).await;
    assert_eq!(result.status_code, Some(307));
    assert_eq!(result.location(), Some("/new"));
}

#[tokio::test]
async fn rejected_dynamic_routes_leave_the_query_untouched() {
    let routing = RoutingConfig {
        fs_routes_authoritative: false,
        rewrites: RewriteGroups {
            fallback: vec![RewriteRule::new("/pricing", "/landing")],
            ..RewriteGroups::default()
        },
        ..RoutingConfig::default()
    };
    let store = InMemoryArtifactStore::new().page("/[page]").page("/landing");
    let (resolver, _) = resolver(routing, store);
    let registry = StaticRouteRegistry::from_pairs(&[("/[page]", "/:page")]).unwrap();

    let result = resolver.resolve(get("/pricing"), &registry).await;
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.path, "/landing");
    assert_eq!(result.matched_artifact.unwrap().path, "/landing");
    assert!(result.query.get("page").is_none());
}
