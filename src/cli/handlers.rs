use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::commands::{BuildArgs, PlanArgs};
use super::output::{JsonLinesHandler, OutputFormat, OutputFormatter};
use crate::config::ToolchainConfig;
use crate::pipeline::{AlwaysAbort, AlwaysContinue, BuildOrchestrator, BuildRequest, Confirm};
use crate::progress::{LoggingHandler, ProgressHandler};
use crate::tools::{ProcessInvoker, RecordingInvoker, ToolInvoker};

/// Negative exit codes (abnormal termination, internal failures) become 1
pub fn process_exit_code(code: i32) -> i32 {
    if code < 0 {
        1
    } else {
        code
    }
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    match run_build(args, quiet).await {
        Ok(code) => process_exit_code(code),
        Err(e) => {
            error!("Build failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub async fn handle_plan(args: &PlanArgs) -> i32 {
    match run_plan(args) {
        Ok(()) => 0,
        Err(e) => {
            error!("Planning failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

async fn run_build(args: &BuildArgs, quiet: bool) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let format: OutputFormat = args.format.into();

    let recorder = args.dry_run.then(|| Arc::new(RecordingInvoker::new()));
    let invoker: Arc<dyn ToolInvoker> = match &recorder {
        Some(recorder) => recorder.clone() as Arc<dyn ToolInvoker>,
        None => Arc::new(ProcessInvoker),
    };

    let progress: Arc<dyn ProgressHandler> = match format {
        OutputFormat::Json => Arc::new(JsonLinesHandler::stdout()),
        OutputFormat::Human => Arc::new(LoggingHandler),
    };
    let confirm: Arc<dyn Confirm> = if args.yes {
        Arc::new(AlwaysContinue)
    } else {
        Arc::new(AlwaysAbort)
    };

    let orchestrator = BuildOrchestrator::new(config, invoker)
        .with_progress_handler(progress)
        .with_confirm(confirm);

    let mut request = BuildRequest::new(&args.project)
        .force(args.force || args.dry_run)
        .dry_run(args.dry_run);
    if let Some(model) = &args.memtype {
        request = request.memory_model(model.clone());
    }
    if args.library {
        request = request.make_library(true);
    }
    if args.auto_lib {
        request = request.auto_library(true);
    }
    if args.sd_pex {
        request = request.sd_package(true);
    }
    debug!(?request, "Build request");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling build");
            ctrl_c.cancel();
        }
    });

    let result = orchestrator.run(request, cancel).await;

    if let Some(recorder) = &recorder {
        if format == OutputFormat::Human && !quiet {
            for line in recorder.command_lines() {
                println!("{}", line);
            }
        }
    }

    if !quiet || !result.is_success() {
        let rendered = OutputFormatter::new(format).format_result(&result)?;
        println!("{}", rendered.trim_end());
    }

    Ok(result.exit_code)
}

fn run_plan(args: &PlanArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let orchestrator = BuildOrchestrator::new(config, Arc::new(RecordingInvoker::new()));

    let mut request = BuildRequest::new(&args.project);
    if let Some(model) = &args.memtype {
        request = request.memory_model(model.clone());
    }

    let plan = orchestrator
        .prepare(&request)
        .with_context(|| format!("Failed to read {}", args.project.display()))?;
    let linker = if plan.config.is_cpp() {
        plan.toolchain.cxx
    } else {
        plan.toolchain.compiler
    };
    let vector = orchestrator
        .plan_link(&request)
        .with_context(|| format!("Failed to plan {}", args.project.display()))?;
    let rendered = OutputFormatter::new(args.format.into()).format_plan(&vector, &linker)?;
    println!("{}", rendered.trim_end());
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<ToolchainConfig> {
    let config = ToolchainConfig::load(path).context("Failed to load toolchain configuration")?;
    config.validate().context("Invalid toolchain configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_exit_code() {
        assert_eq!(process_exit_code(0), 0);
        assert_eq!(process_exit_code(2), 2);
        assert_eq!(process_exit_code(-1), 1);
    }
}
