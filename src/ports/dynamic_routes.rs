use std::sync::Arc;

use crate::core::pattern::PathPattern;

/// A parameterised page route, e.g. `/blog/[slug]` at `/blog/:slug`.
#[derive(Debug, Clone)]
pub struct DynamicRoute {
    /// Page name; used to fetch the artifact and to key the visited set.
    pub name: String,
    pub pattern: PathPattern,
}

/// DynamicRouteRegistry lists dynamic routes in registration order, most
/// specific first. The resolver never re-sorts the list.
pub trait DynamicRouteRegistry: Send + Sync {
    fn enumerate_dynamic_routes(&self) -> Arc<[DynamicRoute]>;
}
