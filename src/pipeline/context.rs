//! Per-run state shared by the build phases

use super::error::BuildError;
use super::result::StageRecord;
use crate::progress::{BuildEvent, ProgressEvent, ProgressHandler};
use crate::tools::{Invocation, ToolInvoker, ToolOutput, ABNORMAL_EXIT};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Planning,
    Compiling,
    Archiving,
    Linking,
    PostLink,
}

impl BuildPhase {
    pub fn name(&self) -> &'static str {
        match self {
            BuildPhase::Planning => "planning",
            BuildPhase::Compiling => "compiling",
            BuildPhase::Archiving => "archiving",
            BuildPhase::Linking => "linking",
            BuildPhase::PostLink => "post-link",
        }
    }
}

/// Asked whether to go on after a recoverable filesystem problem
pub trait Confirm: Send + Sync {
    fn confirm_continue(&self, error: &BuildError) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAbort;

impl Confirm for AlwaysAbort {
    fn confirm_continue(&self, _error: &BuildError) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysContinue;

impl Confirm for AlwaysContinue {
    fn confirm_continue(&self, _error: &BuildError) -> bool {
        true
    }
}

/// Mutable state of one in-flight build
pub struct BuildRun<'a> {
    invoker: &'a dyn ToolInvoker,
    progress: Option<&'a dyn ProgressHandler>,
    pub project_dir: PathBuf,
    /// Tools still run, but nothing on disk is created, copied or removed
    dry_run: bool,
    pub stages: Vec<StageRecord>,
    pub warnings: Vec<String>,
    pub failed_stage: Option<String>,
    /// Captured text of the call that failed the build
    pub failure_output: String,
}

impl<'a> BuildRun<'a> {
    pub fn new(
        invoker: &'a dyn ToolInvoker,
        progress: Option<&'a dyn ProgressHandler>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            invoker,
            progress,
            project_dir: project_dir.into(),
            dry_run: false,
            stages: Vec::new(),
            warnings: Vec::new(),
            failed_stage: None,
            failure_output: String::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(handler) = self.progress {
            handler.on_progress(&event);
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.emit(ProgressEvent::Warning {
            message: message.clone(),
        });
        self.warnings.push(message);
    }

    /// Runs one program, records it and reports it; nonzero exits are returned as output
    pub async fn run_tool(&mut self, stage: &str, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        let result = self.invoker.invoke(invocation).await;
        let (exit_code, captured_text) = match &result {
            Ok(output) => (output.exit_code, output.captured_text()),
            Err(err) => (ABNORMAL_EXIT, err.to_string()),
        };

        self.stages.push(StageRecord {
            stage: stage.to_string(),
            program: invocation.program.clone(),
            exit_code,
        });
        self.emit(ProgressEvent::ToolFinished(BuildEvent {
            stage: stage.to_string(),
            program: invocation.program.clone(),
            arguments: invocation.args.clone(),
            working_dir: invocation.working_dir.clone(),
            exit_code,
            captured_text: captured_text.clone(),
        }));

        // Let the host runtime breathe between tool calls
        tokio::task::yield_now().await;

        match result {
            Ok(output) => Ok(output),
            Err(err) => {
                self.fail(stage, captured_text);
                Err(err.into())
            }
        }
    }

    /// Like [`run_tool`](Self::run_tool) but a nonzero exit fails the build
    pub async fn run_checked(&mut self, stage: &str, invocation: &Invocation) -> Result<ToolOutput, BuildError> {
        let output = self.run_tool(stage, invocation).await?;
        if output.success() {
            return Ok(output);
        }
        self.fail(stage, output.captured_text());
        Err(BuildError::ToolInvocation {
            program: invocation.program.clone(),
            exit_code: output.exit_code,
        })
    }

    /// Copies `from` to `to` (project relative), removing a stale `to` first
    pub fn stage_file(&mut self, from: &Path, to: &Path) -> Result<(), BuildError> {
        let source = self.project_dir.join(from);
        let target = self.project_dir.join(to);
        debug!(from = %from.display(), to = %to.display(), "Staging file");
        if self.dry_run {
            return Ok(());
        }

        let result = remove_if_exists(&target).and_then(|_| fs::copy(&source, &target).map(|_| ()));
        if let Err(err) = result {
            warn!(from = %source.display(), error = %err, "Failed to stage file");
            self.fail("stage", format!("Failed to copy {} to {}", from.display(), to.display()));
            return Err(BuildError::filesystem(source, err));
        }
        Ok(())
    }

    /// Removes a stale artifact before it is rebuilt
    pub fn remove_stale(&self, path: &Path) -> std::io::Result<()> {
        if self.dry_run {
            debug!(path = %path.display(), "Keeping stale file in dry run");
            return Ok(());
        }
        remove_if_exists(path)
    }

    fn fail(&mut self, stage: &str, captured: String) {
        if self.failed_stage.is_none() {
            self.failed_stage = Some(stage.to_string());
            self.failure_output = captured;
        }
    }
}

pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
