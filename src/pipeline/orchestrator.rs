use super::config::BuildConfig;
use super::context::{AlwaysAbort, BuildPhase, BuildRun, Confirm};
use super::error::BuildError;
use super::planner::{object_path, ArgumentPlanner, ArgumentVector};
use super::report::{diagnose, SizeReport};
use super::result::{BuildResult, BuildStatus};
use super::stage::{Splice, StagePlanner, Step};
use super::staleness::rebuild_required;
use crate::config::{Toolchain, ToolchainConfig};
use crate::library::{LibraryCache, LibraryResolver};
use crate::manifest::{Manifest, ManifestEntry};
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::tools::{Invocation, ToolInvoker};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PEX_OUTPUT: &str = "a.pex";
const AUTORUN_PEX: &str = "AUTORUN.PEX";

/// What to build and which per-run overrides apply on top of the project's directives
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub project_file: PathBuf,
    pub force: bool,
    pub memory_model: Option<String>,
    pub make_library: Option<bool>,
    pub auto_library: Option<bool>,
    pub sd_package: Option<bool>,
    /// Leave the project tree untouched; pair with a recording invoker
    pub dry_run: bool,
}

impl BuildRequest {
    pub fn new(project_file: impl Into<PathBuf>) -> Self {
        Self {
            project_file: project_file.into(),
            ..Default::default()
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn memory_model(mut self, model: impl Into<String>) -> Self {
        self.memory_model = Some(model.into());
        self
    }

    pub fn make_library(mut self, enabled: bool) -> Self {
        self.make_library = Some(enabled);
        self
    }

    pub fn auto_library(mut self, enabled: bool) -> Self {
        self.auto_library = Some(enabled);
        self
    }

    pub fn sd_package(mut self, enabled: bool) -> Self {
        self.sd_package = Some(enabled);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn apply(&self, config: &mut BuildConfig) {
        if let Some(model) = &self.memory_model {
            config.memory_model = model.clone();
        }
        if let Some(enabled) = self.make_library {
            config.make_library = enabled;
        }
        if let Some(enabled) = self.auto_library {
            config.auto_library = enabled;
        }
        if let Some(enabled) = self.sd_package {
            config.sd_package = enabled;
        }
    }

    fn project_dir(&self) -> PathBuf {
        match self.project_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn project_stem(&self) -> String {
        self.project_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "a".to_string())
    }
}

/// Everything the planning phase resolved for the later phases
pub struct BuildPlan {
    pub manifest: Manifest,
    pub config: BuildConfig,
    pub toolchain: Toolchain,
    pub project_dir: PathBuf,
    pub out_dir: String,
    /// Executable path relative to the project directory
    pub executable: String,
    pub project_stem: String,
}

enum Outcome {
    NotNeeded(PathBuf),
    Built {
        artifact: PathBuf,
        archive: Option<PathBuf>,
        size: Option<SizeReport>,
    },
}

/// Drives one project from manifest to linked executable
pub struct BuildOrchestrator {
    config: ToolchainConfig,
    invoker: Arc<dyn ToolInvoker>,
    progress_handler: Option<Arc<dyn ProgressHandler>>,
    confirm: Arc<dyn Confirm>,
    cache: Mutex<LibraryCache>,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl BuildOrchestrator {
    pub fn new(config: ToolchainConfig, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            config,
            invoker,
            progress_handler: None,
            confirm: Arc::new(AlwaysAbort),
            cache: Mutex::new(LibraryCache::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_progress_handler(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress_handler = Some(handler);
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Number of include names cached by the last library resolution
    pub fn cached_libraries(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Resolves the manifest and configuration without running any tool
    pub fn prepare(&self, request: &BuildRequest) -> Result<BuildPlan, BuildError> {
        self.config
            .validate()
            .map_err(|e| BuildError::Configuration(e.to_string()))?;

        if !request.project_file.is_file() {
            return Err(BuildError::Configuration(format!(
                "Project file not found: {}",
                request.project_file.display()
            )));
        }

        let manifest = Manifest::load(&request.project_file)
            .map_err(|e| BuildError::Configuration(e.to_string()))?;

        let mut config = BuildConfig::from_directives(manifest.directives());
        request.apply(&mut config);

        let out_dir = config.output_dir_name();
        let project_stem = request.project_stem();
        let executable = format!("{}/{}.elf", out_dir, project_stem);

        Ok(BuildPlan {
            manifest,
            toolchain: self.config.toolchain(),
            config,
            project_dir: request.project_dir(),
            out_dir,
            executable,
            project_stem,
        })
    }

    /// Link arguments for `request` as far as they can be known without running tools
    pub fn plan_link(&self, request: &BuildRequest) -> Result<ArgumentVector, BuildError> {
        let plan = self.prepare(request)?;
        let mut lines = Vec::new();
        for entry in plan.manifest.entries().iter().skip(1) {
            if entry.is_local_source() || entry.is_option() {
                lines.push(entry.path().to_string());
            }
        }
        let main = plan.manifest.main().map(ManifestEntry::path).unwrap_or_default();
        Ok(ArgumentPlanner::new(&plan.config, plan.executable.clone())
            .with_main(main)
            .with_ordering(self.config.library_ordering)
            .plan(&lines))
    }

    /// Runs a build to completion. Failures are reported in the result, never as `Err`.
    pub async fn run(&self, request: BuildRequest, cancel: CancellationToken) -> BuildResult {
        let start = Instant::now();
        let project = request.project_file.display().to_string();

        let Some(_guard) = InFlight::acquire(&self.in_flight, &request.project_file) else {
            let error = BuildError::AlreadyRunning(request.project_file.clone());
            warn!(project = %project, "Build already running");
            self.emit(ProgressEvent::Failed {
                error: error.to_string(),
            });
            return BuildResult::failed(&error);
        };

        info!(project = %project, "Starting build");
        self.emit(ProgressEvent::Started {
            project: project.clone(),
        });

        let mut run = BuildRun::new(
            self.invoker.as_ref(),
            self.progress_handler.as_deref(),
            request.project_dir(),
        )
        .dry_run(request.dry_run);
        let outcome = self.execute(&request, &cancel, &mut run).await;

        let mut result = match outcome {
            Ok(Outcome::NotNeeded(target)) => {
                let mut result = BuildResult::new(BuildStatus::NotNeeded);
                result.artifact = Some(target);
                result
            }
            Ok(Outcome::Built {
                artifact,
                archive,
                size,
            }) => {
                let mut result = BuildResult::new(BuildStatus::Succeeded);
                result.artifact = Some(artifact);
                result.archive = archive;
                result.size = size;
                result
            }
            Err(error) => {
                warn!(project = %project, error = %error, "Build failed");
                let mut result = BuildResult::failed(&error);
                result.failed_stage = run.failed_stage.take();
                result.diagnosis = diagnose(&run.failure_output);
                for message in &result.diagnosis {
                    run.emit(ProgressEvent::Diagnosis {
                        message: message.clone(),
                    });
                }
                self.emit(ProgressEvent::Failed {
                    error: error.to_string(),
                });
                result
            }
        };
        result.stages = std::mem::take(&mut run.stages);
        result.warnings = std::mem::take(&mut run.warnings);

        self.emit(ProgressEvent::Completed {
            exit_code: result.exit_code,
            total_time: start.elapsed(),
        });
        info!(
            project = %project,
            exit_code = result.exit_code,
            duration_ms = start.elapsed().as_millis(),
            "Build finished"
        );
        result
    }

    async fn execute(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
        run: &mut BuildRun<'_>,
    ) -> Result<Outcome, BuildError> {
        let phase_start = self.phase_started(BuildPhase::Planning);
        let plan = self.prepare(request)?;
        let project_dir = plan.project_dir.clone();
        let executable = project_dir.join(&plan.executable);

        if !request.force
            && !rebuild_required(plan.manifest.local_sources(), &project_dir, &executable)
        {
            info!(target = %plan.executable, "Build not needed");
            self.emit(ProgressEvent::NotNeeded {
                target: plan.executable.clone(),
            });
            return Ok(Outcome::NotNeeded(executable));
        }

        let out_path = project_dir.join(&plan.out_dir);
        if !run.is_dry_run() {
            fs::create_dir_all(&out_path).map_err(|e| BuildError::filesystem(&out_path, e))?;
        }

        let pex = project_dir.join(format!("{}.pex", plan.project_stem));
        for stale in [&executable, &pex] {
            if let Err(err) = run.remove_stale(stale) {
                let error = BuildError::filesystem(stale, err);
                if !self.confirm.confirm_continue(&error) {
                    return Err(error);
                }
                run.warn(format!("Could not remove {}", stale.display()));
            }
        }

        if self.config.report_version {
            let version = Invocation::new(&plan.toolchain.compiler, &project_dir).arg("-v");
            let output = run.run_tool("version", &version).await?;
            if !output.success() {
                run.warn("Compiler version check failed");
            }
        }
        self.phase_complete(BuildPhase::Planning, phase_start);

        let phase_start = self.phase_started(BuildPhase::Compiling);
        let mut vector = self.compile(&plan, cancel, run).await?;
        self.phase_complete(BuildPhase::Compiling, phase_start);

        let mut archive = None;
        if plan.config.make_library {
            let phase_start = self.phase_started(BuildPhase::Archiving);
            archive = Some(self.archive(&plan, &mut vector, run).await?);
            self.phase_complete(BuildPhase::Archiving, phase_start);
        }

        let phase_start = self.phase_started(BuildPhase::Linking);
        let linker = if plan.config.is_cpp() {
            &plan.toolchain.cxx
        } else {
            &plan.toolchain.compiler
        };
        let link = Invocation::new(linker, &project_dir).args(vector.to_args());
        check_cancelled(cancel)?;
        run.run_checked("link", &link).await?;
        self.phase_complete(BuildPhase::Linking, phase_start);

        let phase_start = self.phase_started(BuildPhase::PostLink);
        let size = self.post_link(&plan, run).await;
        self.phase_complete(BuildPhase::PostLink, phase_start);

        Ok(Outcome::Built {
            artifact: executable,
            archive,
            size,
        })
    }

    /// Runs every entry's stage, then compiles the remaining sources to objects
    async fn compile(
        &self,
        plan: &BuildPlan,
        cancel: &CancellationToken,
        run: &mut BuildRun<'_>,
    ) -> Result<ArgumentVector, BuildError> {
        let mut stages = StagePlanner::new(&plan.toolchain, &plan.config, &plan.project_dir);
        let mut entries = plan.manifest.clone();
        let mut lines: Vec<String> = Vec::new();

        let main = entries.main().cloned().unwrap_or_else(|| ManifestEntry::source(""));
        if let Some(linked) = &main.linked_from {
            if let Some((dir, _)) = linked.rsplit_once('/') {
                lines.push(format!("-I {}", dir));
            }
        }

        // Stages may append derived entries, so the length is re-read each pass
        let mut index = 1;
        while index < entries.len() {
            check_cancelled(cancel)?;

            let Some(entry) = entries.get(index).cloned() else {
                break;
            };
            index += 1;

            if entry.is_metadata || entry.is_empty() {
                continue;
            }
            if entry.is_option() {
                lines.push(entry.raw.clone());
                continue;
            }

            let stage_plan = stages.plan(&entry, &entries)?;
            debug!(entry = %entry.display_name(), stage = stage_plan.kind.name(), "Planned entry");

            for step in &stage_plan.steps {
                match step {
                    Step::Invoke { label, invocation } => {
                        run.run_checked(label, invocation).await?;
                    }
                    Step::Stage { from, to } => run.stage_file(from, to)?,
                }
            }

            for splice in stage_plan.splices {
                match splice {
                    Splice::ManifestEntry(path) => entries.push(ManifestEntry::source(path)),
                    Splice::IncludeDir(dir) => lines.push(format!("-I {}", dir)),
                    Splice::LinkCandidate(path) | Splice::Archive(path) | Splice::Source(path) => {
                        lines.push(path)
                    }
                }
            }
        }

        let library_dirs = self.resolve_libraries(plan, &entries, run);

        let vector = ArgumentPlanner::new(&plan.config, plan.executable.clone())
            .with_main(main.path())
            .with_library_dirs(library_dirs)
            .with_ordering(self.config.library_ordering)
            .plan(&lines);
        for warning in &vector.warnings {
            run.warn(warning.clone());
        }

        self.compile_objects(plan, vector, cancel, run).await
    }

    fn resolve_libraries(&self, plan: &BuildPlan, entries: &Manifest, run: &mut BuildRun<'_>) -> Vec<PathBuf> {
        if !plan.config.auto_library {
            return Vec::new();
        }
        let Some(root) = &self.config.library_root else {
            run.warn("Automatic library resolution needs a library root; skipping");
            return Vec::new();
        };

        let sources: Vec<&str> = entries.local_sources().collect();
        let mut cache = lock(&self.cache);
        let dirs = LibraryResolver::new(&mut cache, root).resolve(&plan.project_dir, &sources);
        info!(libraries = dirs.len(), "Resolved libraries from includes");
        dirs
    }

    async fn compile_objects(
        &self,
        plan: &BuildPlan,
        mut vector: ArgumentVector,
        cancel: &CancellationToken,
        run: &mut BuildRun<'_>,
    ) -> Result<ArgumentVector, BuildError> {
        let compiler = if plan.config.is_cpp() {
            &plan.toolchain.cxx
        } else {
            &plan.toolchain.compiler
        };
        for source in vector.compilable_inputs() {
            check_cancelled(cancel)?;
            let object = object_path(&plan.out_dir, &source);
            let invocation =
                Invocation::new(compiler, &plan.project_dir).args(vector.compile_args(&source, &object));
            run.run_checked("compile", &invocation).await?;
            vector.replace_input(&source, &object);
        }
        Ok(vector)
    }

    async fn archive(
        &self,
        plan: &BuildPlan,
        vector: &mut ArgumentVector,
        run: &mut BuildRun<'_>,
    ) -> Result<PathBuf, BuildError> {
        let archive = format!("{}/{}.a", plan.out_dir, plan.project_stem);
        let archive_path = plan.project_dir.join(&archive);
        run.remove_stale(&archive_path).map_err(|e| BuildError::filesystem(&archive_path, e))?;

        let objects = vector.take_objects();
        let invocation = Invocation::new(&plan.toolchain.archiver, &plan.project_dir)
            .args(["rs", archive.as_str()])
            .args(objects);
        run.run_checked("archive", &invocation).await?;

        vector.archives.insert(0, archive);
        Ok(archive_path)
    }

    /// Strip, size report and SD packaging; problems are warnings only
    async fn post_link(&self, plan: &BuildPlan, run: &mut BuildRun<'_>) -> Option<SizeReport> {
        let dir = &plan.project_dir;
        let exe = plan.executable.as_str();

        if !plan.config.is_xmm() {
            let strip = Invocation::new(&plan.toolchain.loader, dir).args(["-s", exe]);
            if !matches!(run.run_tool("strip", &strip).await, Ok(output) if output.success()) {
                run.warn(format!("Could not strip {}", exe));
            }
        }

        let objdump = Invocation::new(&plan.toolchain.objdump, dir).args(["-h", exe]);
        let size = match run.run_tool("size", &objdump).await {
            Ok(output) if output.success() => SizeReport::parse(&output.stdout),
            _ => None,
        };
        match &size {
            Some(size) => info!(
                code_size = size.code_size,
                total_size = size.total_size,
                "Code Size {} bytes ({} total)",
                size.code_size,
                size.total_size
            ),
            None => run.warn("Could not read program size"),
        }

        if plan.config.sd_package {
            self.package_pex(plan, run).await;
        }
        size
    }

    async fn package_pex(&self, plan: &BuildPlan, run: &mut BuildRun<'_>) {
        let dir = &plan.project_dir;
        let pex = dir.join(PEX_OUTPUT);
        let autorun = dir.join(AUTORUN_PEX);
        for stale in [&pex, &autorun] {
            if let Err(err) = run.remove_stale(stale) {
                warn!(path = %stale.display(), error = %err, "Could not remove old package");
            }
        }

        let make = Invocation::new(&plan.toolchain.loader, dir).args(["-x", plan.executable.as_str()]);
        let made = matches!(run.run_tool("pex", &make).await, Ok(output) if output.success());
        if run.is_dry_run() {
            return;
        }
        if !made || !pex.exists() || fs::rename(&pex, &autorun).is_err() {
            run.warn(format!("Could not make {}", AUTORUN_PEX));
        }
    }

    fn phase_started(&self, phase: BuildPhase) -> Instant {
        debug!(phase = phase.name(), "Phase started");
        self.emit(ProgressEvent::PhaseStarted {
            phase: phase.name().to_string(),
        });
        Instant::now()
    }

    fn phase_complete(&self, phase: BuildPhase, started: Instant) {
        self.emit(ProgressEvent::PhaseComplete {
            phase: phase.name().to_string(),
            duration: started.elapsed(),
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(handler) = &self.progress_handler {
            handler.on_progress(&event);
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), BuildError> {
    if cancel.is_cancelled() {
        info!("Build cancelled");
        return Err(BuildError::Cancelled);
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a project as building until dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    key: PathBuf,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<PathBuf>>, project: &Path) -> Option<Self> {
        let key = fs::canonicalize(project).unwrap_or_else(|_| project.to_path_buf());
        if !lock(set).insert(key.clone()) {
            return None;
        }
        Some(Self { set, key })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}
