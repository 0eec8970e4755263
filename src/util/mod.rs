//! Utility modules for cogbuild

pub mod logging;

pub use logging::{init_logging, LoggingConfig};
