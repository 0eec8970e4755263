//! External toolchain programs

pub mod invoker;
pub mod recording;

pub use invoker::{Invocation, ProcessInvoker, ToolError, ToolInvoker, ToolOutput, ABNORMAL_EXIT};
pub use recording::{RecordingInvoker, ScriptedResponse};
