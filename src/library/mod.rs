//! Automatic library discovery from header includes

pub mod cache;
pub mod resolver;
pub mod scanner;

pub use cache::LibraryCache;
pub use resolver::LibraryResolver;
pub use scanner::{library_name, strip_delimiters, IncludeScanner, INCLUDE_MARKER};
