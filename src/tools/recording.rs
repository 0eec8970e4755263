use super::invoker::{Invocation, ToolError, ToolInvoker, ToolOutput};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Invoker that records every call instead of running it.
///
/// Used by `cogbuild build --dry-run` and by tests. Calls succeed with empty
/// output unless a scripted [`ScriptedResponse`] matches the command line.
pub struct RecordingInvoker {
    calls: Mutex<Vec<Invocation>>,
    responses: Mutex<Vec<ScriptedResponse>>,
    materialize_outputs: bool,
}

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub pattern: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub once: bool,
}

impl ScriptedResponse {
    /// Matches any call whose command line contains `pattern`
    pub fn matching(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            once: false,
        }
    }

    pub fn exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            materialize_outputs: false,
        }
    }

    /// Create the `-o` target of every successful call as an empty file,
    /// so stages that copy a tool's output find something on disk.
    pub fn materializing() -> Self {
        Self {
            materialize_outputs: true,
            ..Self::new()
        }
    }

    pub fn respond(&self, response: ScriptedResponse) {
        self.responses.lock().unwrap().push(response);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(Invocation::command_line).collect()
    }

    fn take_response(&self, command_line: &str) -> Option<ScriptedResponse> {
        let mut responses = self.responses.lock().unwrap();
        let index = responses
            .iter()
            .position(|r| command_line.contains(&r.pattern))?;
        if responses[index].once {
            Some(responses.remove(index))
        } else {
            Some(responses[index].clone())
        }
    }

    fn materialize(invocation: &Invocation) {
        let Some(pos) = invocation.args.iter().position(|a| a == "-o") else {
            return;
        };
        let Some(target) = invocation.args.get(pos + 1) else {
            return;
        };
        let path = invocation.working_dir.join(target);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(path, b"");
    }
}

impl Default for RecordingInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for RecordingInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let command_line = invocation.command_line();
        self.calls.lock().unwrap().push(invocation.clone());

        let output = match self.take_response(&command_line) {
            Some(response) => ToolOutput {
                exit_code: response.exit_code,
                stdout: response.stdout,
                stderr: response.stderr,
                duration: Duration::ZERO,
            },
            None => ToolOutput::with_code(0),
        };

        if self.materialize_outputs && output.success() {
            Self::materialize(invocation);
        }

        Ok(output)
    }
}
