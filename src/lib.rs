//! Switchyard - a request-routing resolution engine.
//!
//! Switchyard compiles a declarative routing configuration (headers, redirects,
//! rewrites, dynamic routes, locales, middleware matchers) into an ordered,
//! phased **route table**, then resolves each inbound request against that table
//! to decide what answers it: a static file, a page, an API route, a redirect, an
//! external URL, a middleware response or an error page.
//!
//! The crate follows a **hexagonal architecture**: the resolver in `core` talks to
//! the outside world only through the traits in `ports` (artifact lookup, dynamic
//! route enumeration, the middleware worker, outbound HTTP). `adapters` provides
//! filesystem, HTTP and in-memory implementations, and the `switchyard` binary wires
//! them into a small HTTP server.
//!
//! # Features
//! - Phased route table with explicit boundaries (filesystem, check, hit, error)
//! - Path patterns with named, optional and repeated parameters plus `has`/`missing`
//!   conditions on headers, cookies, query and host
//! - Base path and locale prefixes, domain locales and default-locale redirects
//! - Out-of-process middleware with request-header overrides, rewrites and redirects
//! - Dynamic-route recheck with per-request loop protection
//! - Hot reload of the route table via `arc-swap`
//! - Metrics through the `metrics` facade and structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchyard::{
//!     InMemoryArtifactStore, InboundRequest, Resolver, RouteTable, StaticRouteRegistry,
//!     config::RoutingConfig,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let table = RouteTable::compile(&RoutingConfig::default())?;
//! let artifacts = Arc::new(InMemoryArtifactStore::new().page("/about"));
//! let resolver = Resolver::new(table, artifacts);
//! let result = resolver
//!     .resolve(InboundRequest::get("/about"), &StaticRouteRegistry::empty())
//!     .await;
//! assert_eq!(result.status_code, Some(200));
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Table construction returns `CompileError`; resolution never fails outright and
//! reports faults on the result as a 500. Binary-level plumbing uses `eyre::Result<T>`
//! with `WrapErr` context.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{
        FileConfigProvider, FileSystemArtifactStore, HttpClientAdapter, HttpMiddlewareWorker,
        InMemoryArtifactStore, InProcessMiddleware, RoutingHandler, StaticRouteRegistry,
    },
    core::{
        CompileError, InboundRequest, Outcome, ResolutionResult, ResolveError, Resolver,
        RouteTable,
    },
    ports::http_client::HttpClient,
    utils::{ServerSignal, SignalHandler},
};
