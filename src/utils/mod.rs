pub mod shutdown;
pub mod url;

pub use shutdown::{ServerSignal, SignalHandler};
