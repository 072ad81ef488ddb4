pub mod artifact_store;
pub mod config_provider;
pub mod dynamic_routes;
pub mod http_client;
pub mod middleware_worker;
