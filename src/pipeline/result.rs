use super::error::BuildError;
use super::report::SizeReport;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Succeeded,
    /// Target already newer than every source
    NotNeeded,
    Failed,
    Cancelled,
}

/// One external program run by the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub program: String,
    pub exit_code: i32,
}

/// Terminal outcome of a build
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub exit_code: i32,
    pub stages: Vec<StageRecord>,
    pub artifact: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub size: Option<SizeReport>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    pub diagnosis: Vec<String>,
    pub warnings: Vec<String>,
}

impl BuildResult {
    pub fn new(status: BuildStatus) -> Self {
        Self {
            status,
            exit_code: 0,
            stages: Vec::new(),
            artifact: None,
            archive: None,
            size: None,
            failed_stage: None,
            error: None,
            diagnosis: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Failure carrying the error's exit code
    pub fn failed(error: &BuildError) -> Self {
        let status = match error {
            BuildError::Cancelled => BuildStatus::Cancelled,
            _ => BuildStatus::Failed,
        };
        Self {
            exit_code: error.exit_code(),
            error: Some(error.to_string()),
            ..Self::new(status)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, BuildStatus::Succeeded | BuildStatus::NotNeeded)
    }

    /// Program names in invocation order
    pub fn programs(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.program.as_str()).collect()
    }
}
