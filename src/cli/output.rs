//! Output formatting for build results and planned link commands
//!
//! Human output is a short summary for terminals; JSON output is a single
//! pretty-printed document for scripts. During a JSON build every progress
//! event is also written to stdout as one JSON line by [`JsonLinesHandler`].

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Mutex;

use crate::pipeline::{ArgumentVector, BuildResult, BuildStatus};
use crate::progress::{ProgressEvent, ProgressHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_result(&self, result: &BuildResult) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result)
                .context("Failed to serialize build result to JSON"),
            OutputFormat::Human => Ok(self.format_result_human(result)),
        }
    }

    pub fn format_plan(&self, vector: &ArgumentVector, program: &str) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "program": program,
                    "arguments": vector.to_args(),
                    "warnings": vector.warnings,
                });
                serde_json::to_string_pretty(&output).context("Failed to serialize plan to JSON")
            }
            OutputFormat::Human => {
                let mut output = format!("{} {}\n", program, vector.to_args().join(" "));
                for warning in &vector.warnings {
                    output.push_str(&format!("warning: {}\n", warning));
                }
                Ok(output)
            }
        }
    }

    fn format_result_human(&self, result: &BuildResult) -> String {
        let mut output = String::new();

        let header = match result.status {
            BuildStatus::Succeeded => "\u{2713} Build succeeded",
            BuildStatus::NotNeeded => "\u{2713} Build not needed",
            BuildStatus::Failed => "\u{2717} Build failed",
            BuildStatus::Cancelled => "\u{26A0} Build cancelled",
        };
        output.push_str(header);
        output.push('\n');

        if let Some(artifact) = &result.artifact {
            output.push_str(&format!("Executable:  {}\n", artifact.display()));
        }
        if let Some(archive) = &result.archive {
            output.push_str(&format!("Library:     {}\n", archive.display()));
        }
        if let Some(size) = &result.size {
            output.push_str(&format!(
                "Code Size:   {} bytes ({} total)\n",
                size.code_size, size.total_size
            ));
        }
        if !result.stages.is_empty() {
            output.push_str(&format!("Tool calls:  {}\n", result.stages.len()));
        }

        if let Some(stage) = &result.failed_stage {
            output.push_str(&format!("Failed in:   {}\n", stage));
        }
        if let Some(error) = &result.error {
            output.push_str(&format!("Error:       {}\n", error));
        }
        if result.status == BuildStatus::Failed {
            output.push_str(&format!("Exit code:   {}\n", result.exit_code));
        }

        if !result.diagnosis.is_empty() {
            output.push('\n');
            for line in &result.diagnosis {
                output.push_str(line);
                output.push('\n');
            }
        }

        if !result.warnings.is_empty() {
            output.push_str("\nWarnings:\n");
            for warning in &result.warnings {
                output.push_str(&format!("  \u{2022} {}\n", warning));
            }
        }

        output
    }
}

/// Writes each progress event as one JSON line
pub struct JsonLinesHandler<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesHandler<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JsonLinesHandler<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ProgressHandler for JsonLinesHandler<W> {
    fn on_progress(&self, event: &ProgressEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A closed stdout must not fail the build
        let _ = writeln!(writer, "{}", line);
    }
}
