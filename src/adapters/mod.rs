pub mod config_providers;
pub mod file_system;
pub mod http_client;
pub mod http_handler;
pub mod in_memory;
pub mod middleware_worker;

/// Re-export commonly used types from adapters
pub use config_providers::FileConfigProvider;
pub use file_system::FileSystemArtifactStore;
pub use http_client::HttpClientAdapter;
pub use http_handler::RoutingHandler;
pub use in_memory::{InMemoryArtifactStore, InProcessMiddleware, StaticRouteRegistry};
pub use middleware_worker::HttpMiddlewareWorker;
