use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::Level;

use crate::util::logging::parse_level;

#[derive(Parser, Debug)]
#[command(
    name = "cogbuild",
    about = "Build orchestrator for Propeller C, C++, Spin and cog-local projects",
    version,
    long_about = "cogbuild reads a project file listing sources and directives, runs each \
                  entry through its stage (Spin compile, blob conversion, cog-local compile, \
                  assembly), resolves libraries from #include lines and links the result \
                  with the Propeller GCC toolchain."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(
        short = 'v',
        long,
        global = true,
        help = "Enable verbose output (same as --log-level debug)"
    )]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Suppress all output except errors"
    )]
    pub quiet: bool,
}

impl CliArgs {
    /// Configuration file named by the subcommand, if any
    pub fn config_path(&self) -> Option<&Path> {
        match &self.command {
            Commands::Build(args) => args.config.as_deref(),
            Commands::Plan(args) => args.config.as_deref(),
        }
    }

    /// `--log-level`, then `-v`/`-q`, then the configured level
    pub fn log_level(&self, configured: &str) -> Level {
        if let Some(level) = &self.log_level {
            parse_level(level)
        } else if self.verbose {
            Level::DEBUG
        } else if self.quiet {
            Level::ERROR
        } else {
            parse_level(configured)
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build a project",
        long_about = "Build a project file into an executable.\n\n\
                      Examples:\n  \
                      cogbuild build blink.side\n  \
                      cogbuild build blink.side --memtype cmm --force\n  \
                      cogbuild build servo.side --library --format json\n  \
                      cogbuild build blink.side --dry-run"
    )]
    Build(BuildArgs),

    #[command(
        about = "Print the planned link command",
        long_about = "Resolve directives and option lines and print the link argument \
                      vector without running any tool.\n\n\
                      Examples:\n  \
                      cogbuild plan blink.side\n  \
                      cogbuild plan blink.side --memtype xmmc --format json"
    )]
    Plan(PlanArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(value_name = "PROJECT", help = "Project file to build")]
    pub project: PathBuf,

    #[arg(long, help = "Rebuild even when the executable is up to date")]
    pub force: bool,

    #[arg(long, value_name = "MODEL", help = "Override the memory model (lmm, cmm, xmmc, ...)")]
    pub memtype: Option<String>,

    #[arg(long, help = "Archive the compiled objects into a static library")]
    pub library: bool,

    #[arg(long = "auto-lib", help = "Resolve libraries from #include lines")]
    pub auto_lib: bool,

    #[arg(long = "sd-pex", help = "Package the executable as AUTORUN.PEX")]
    pub sd_pex: bool,

    #[arg(long, help = "Record tool calls instead of running them")]
    pub dry_run: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(short = 'c', long, value_name = "FILE", help = "Toolchain configuration file")]
    pub config: Option<PathBuf>,

    #[arg(short = 'y', long, help = "Continue when stale outputs cannot be removed")]
    pub yes: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(value_name = "PROJECT", help = "Project file to plan")]
    pub project: PathBuf,

    #[arg(long, value_name = "MODEL", help = "Override the memory model")]
    pub memtype: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(short = 'c', long, value_name = "FILE", help = "Toolchain configuration file")]
    pub config: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
