pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod result;
pub mod stage;
pub mod staleness;

pub use config::{BuildConfig, CompilerKind};
pub use context::{AlwaysAbort, AlwaysContinue, BuildPhase, BuildRun, Confirm};
pub use error::BuildError;
pub use orchestrator::{BuildOrchestrator, BuildPlan, BuildRequest};
pub use planner::{ArgumentPlanner, ArgumentVector};
pub use report::{diagnose, SizeReport};
pub use result::{BuildResult, BuildStatus, StageRecord};
pub use stage::{fold_symbol, Splice, StageKind, StagePlan, StagePlanner, Step, SymbolRename};
pub use staleness::rebuild_required;
