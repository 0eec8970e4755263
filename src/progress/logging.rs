//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { project } => {
                info!(project = %project, "Starting build");
            }
            ProgressEvent::PhaseStarted { phase } => {
                debug!(phase = %phase, "Starting phase");
            }
            ProgressEvent::PhaseComplete { phase, duration } => {
                info!(
                    phase = %phase,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::ToolFinished(build) => {
                if build.exit_code == 0 {
                    info!(stage = %build.stage, "{}", build.command_line());
                } else {
                    warn!(
                        stage = %build.stage,
                        exit_code = build.exit_code,
                        "{}",
                        build.command_line()
                    );
                }
                for line in build.captured_text.lines().filter(|l| !l.trim().is_empty()) {
                    info!(program = %build.program, "{}", line);
                }
            }
            ProgressEvent::Warning { message } => {
                warn!("{}", message);
            }
            ProgressEvent::Diagnosis { message } => {
                warn!(diagnosis = true, "{}", message);
            }
            ProgressEvent::NotNeeded { target } => {
                info!(target = %target, "Build not needed");
            }
            ProgressEvent::Completed {
                exit_code,
                total_time,
            } => {
                info!(
                    exit_code,
                    total_time_ms = total_time.as_millis(),
                    "Build complete"
                );
            }
            ProgressEvent::Failed { error } => {
                warn!(error = %error, "Build failed");
            }
        }
    }
}
