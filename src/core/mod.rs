pub mod compiler;
pub mod condition;
pub mod context;
pub mod destination;
pub mod headers;
pub mod locale;
pub mod middleware;
pub mod pattern;
pub mod query;
pub mod request;
pub mod resolver;
pub mod result;
pub mod route_table;

pub use compiler::CompileError;
pub use request::InboundRequest;
pub use resolver::{ResolveError, Resolver};
pub use result::{Outcome, ResolutionResult};
pub use route_table::RouteTable;
