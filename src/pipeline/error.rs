use crate::tools::{ToolError, ABNORMAL_EXIT};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {exit_code}")]
    ToolInvocation { program: String, exit_code: i32 },

    #[error(transparent)]
    Spawn(#[from] ToolError),

    #[error("Cannot build {entry}: {reason}")]
    StageSetup { entry: String, reason: String },

    #[error("Build cancelled")]
    Cancelled,

    #[error("A build of {0} is already running")]
    AlreadyRunning(PathBuf),
}

impl BuildError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Process exit code reported for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::ToolInvocation { exit_code, .. } => *exit_code,
            _ => ABNORMAL_EXIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_exit_code_propagates() {
        let err = BuildError::ToolInvocation {
            program: "propeller-elf-gcc".to_string(),
            exit_code: 2,
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "propeller-elf-gcc exited with code 2");
    }

    #[test]
    fn test_other_errors_use_abnormal_exit() {
        assert_eq!(BuildError::Cancelled.exit_code(), -1);
        assert_eq!(
            BuildError::Configuration("no project".to_string()).exit_code(),
            -1
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        assert_eq!(BuildError::filesystem("lmm/main.elf", io).exit_code(), -1);
    }
}
