pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BuildArgs, CliArgs, Commands, OutputFormatArg, PlanArgs};
pub use handlers::{handle_build, handle_plan, process_exit_code};
pub use output::{JsonLinesHandler, OutputFormat, OutputFormatter};
