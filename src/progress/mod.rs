//! Progress reporting for build runs

mod handler;
mod logging;

pub use handler::{BuildEvent, NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
