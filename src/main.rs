use cogbuild::cli::commands::{CliArgs, Commands};
use cogbuild::cli::handlers::{handle_build, handle_plan};
use cogbuild::util::logging::{init_logging, LoggingConfig};
use cogbuild::{ToolchainConfig, VERSION};

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // Load failures are reported by the command itself
    let configured = ToolchainConfig::load(args.config_path())
        .or_else(|_| ToolchainConfig::from_env())
        .map(|config| config.log_level)
        .unwrap_or_else(|_| ToolchainConfig::default().log_level);
    init_logging(LoggingConfig::from_env(args.log_level(&configured)));

    debug!("cogbuild v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Build(build_args) => handle_build(build_args, args.quiet).await,
        Commands::Plan(plan_args) => handle_plan(plan_args).await,
    };

    std::process::exit(exit_code);
}
