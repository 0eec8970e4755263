//! cogbuild - build orchestrator for Propeller C, C++, Spin and cog-local projects
//!
//! A project file lists the main source first, then further sources, objects,
//! libraries, raw compiler options and `>key=value` directives. cogbuild turns
//! that list into the sequence of external tool calls that produces a linked
//! executable: Spin and binary blobs are converted to linkable objects,
//! cog-local C is compiled and section-renamed, libraries are discovered from
//! `#include` lines, and everything is linked with the Propeller GCC toolchain.
//!
//! # Example Usage
//!
//! ```no_run
//! use cogbuild::{BuildOrchestrator, BuildRequest, ProcessInvoker, ToolchainConfig};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn build() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ToolchainConfig::from_env()?;
//! let orchestrator = BuildOrchestrator::new(config, Arc::new(ProcessInvoker));
//!
//! let request = BuildRequest::new("blink.side").memory_model("cmm");
//! let result = orchestrator.run(request, CancellationToken::new()).await;
//! println!("exit code {}", result.exit_code);
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`manifest`]: project file parsing
//! - [`pipeline`]: staging, argument planning and the build orchestrator
//! - [`library`]: include scanning and library resolution
//! - [`tools`]: external program invocation
//! - [`progress`]: build event reporting

pub mod cli;
pub mod config;
pub mod library;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod tools;
pub mod util;

pub use config::{ConfigError, LibraryOrdering, SpinFlavor, Toolchain, ToolchainConfig};
pub use library::{IncludeScanner, LibraryCache, LibraryResolver};
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use pipeline::{
    ArgumentPlanner, ArgumentVector, BuildConfig, BuildError, BuildOrchestrator, BuildRequest,
    BuildResult, BuildStatus,
};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler};
pub use tools::{Invocation, ProcessInvoker, RecordingInvoker, ToolInvoker, ToolOutput};
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_cogbuild() {
        assert_eq!(NAME, "cogbuild");
    }
}
