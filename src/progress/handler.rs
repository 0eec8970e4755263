//! Progress handler trait and events

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// One finished tool call, as shown in the build log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildEvent {
    pub stage: String,
    pub program: String,
    pub arguments: Vec<String>,
    pub working_dir: PathBuf,
    pub exit_code: i32,
    pub captured_text: String,
}

impl BuildEvent {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Events emitted while a build runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Build started
    Started { project: String },

    PhaseStarted { phase: String },

    PhaseComplete {
        phase: String,
        #[serde(with = "duration_ms")]
        duration: Duration,
    },

    /// An external program exited
    ToolFinished(BuildEvent),

    /// A non-fatal problem (suppressed flag, failed strip, ...)
    Warning { message: String },

    /// Advisory text derived from failed tool output
    Diagnosis { message: String },

    /// Target is newer than every source
    NotNeeded { target: String },

    /// Build finished; exit code 0 is success
    Completed {
        exit_code: i32,
        #[serde(with = "duration_ms")]
        total_time: Duration,
    },

    /// Build failed
    Failed { error: String },
}

/// Trait for handling progress events during a build
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
