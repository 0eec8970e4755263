//! Per-extension build stages
//!
//! Each manifest entry is classified once into a [`StageKind`] and planned into
//! a [`StagePlan`]: the tool calls and file staging copies to run, plus the
//! derived artifacts that feed forward into the rest of the build.

use super::config::BuildConfig;
use super::error::BuildError;
use crate::config::{SpinFlavor, Toolchain};
use crate::manifest::{extension, short_stem, strip_extension, Manifest, ManifestEntry};
use crate::tools::Invocation;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Staging file name the Spin compiler sees for embedded Spin sources
pub const SPIN_STAGING_NAME: &str = "tmp.spin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    SpinCompile,
    EmbeddedSpinCompile,
    DataEmbed,
    EmbeddedDataEmbed,
    Assemble,
    CogCompile,
    EmbeddedCogCompile,
    Archive,
    PassThrough,
}

impl StageKind {
    pub fn classify(path: &str) -> Self {
        match extension(path).as_deref() {
            Some("spin") => StageKind::SpinCompile,
            Some("espin") => StageKind::EmbeddedSpinCompile,
            Some("dat") => StageKind::DataEmbed,
            Some("edat") => StageKind::EmbeddedDataEmbed,
            Some("s") => StageKind::Assemble,
            Some("cogc") => StageKind::CogCompile,
            Some("ecogc") => StageKind::EmbeddedCogCompile,
            Some("a") => StageKind::Archive,
            _ => StageKind::PassThrough,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::SpinCompile => "spin",
            StageKind::EmbeddedSpinCompile => "espin",
            StageKind::DataEmbed => "dat",
            StageKind::EmbeddedDataEmbed => "edat",
            StageKind::Assemble => "assemble",
            StageKind::CogCompile => "cogc",
            StageKind::EmbeddedCogCompile => "ecogc",
            StageKind::Archive => "archive",
            StageKind::PassThrough => "source",
        }
    }
}

/// Non-alphanumeric characters folded to `_`, the way objcopy names binary symbols
pub fn fold_symbol(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Rename of the symbols objcopy generates for a binary blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRename {
    pub old: String,
    pub new: String,
}

impl SymbolRename {
    /// `old` follows the path handed to objcopy; `new` follows `symbol_path`
    /// (the blob path without the build output directory)
    pub fn for_blob(objcopy_path: &str, symbol_path: &str) -> Self {
        Self {
            old: format!("_binary_{}", fold_symbol(objcopy_path)),
            new: format!("_binary_{}_firmware", fold_symbol(strip_extension(symbol_path))),
        }
    }

    /// `--redefine-sym` arguments for the `_start`, `_end` and `_size` variants
    pub fn redefine_args(&self) -> Vec<String> {
        ["_start", "_end", "_size"]
            .iter()
            .flat_map(|suffix| {
                [
                    "--redefine-sym".to_string(),
                    format!("{}{}={}{}", self.old, suffix, self.new, suffix),
                ]
            })
            .collect()
    }
}

/// Renamed blob symbols claimed so far in one build
#[derive(Debug, Default)]
pub struct SymbolTable {
    owners: HashMap<String, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails when a different source already produced the same symbol
    pub fn claim(&mut self, rename: &SymbolRename, source: &str) -> Result<(), BuildError> {
        match self.owners.get(&rename.new) {
            Some(owner) if owner != source => Err(BuildError::StageSetup {
                entry: source.to_string(),
                reason: format!("symbol {} already defined by {}", rename.new, owner),
            }),
            Some(_) => Ok(()),
            None => {
                self.owners.insert(rename.new.clone(), source.to_string());
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Invoke {
        label: &'static str,
        invocation: Invocation,
    },
    /// Copy `from` to `to` (project relative), removing a stale `to` first
    Stage { from: PathBuf, to: PathBuf },
}

/// Artifacts a stage feeds into the rest of the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Splice {
    /// Derived pseudo-source that must itself go through a stage
    ManifestEntry(String),
    /// Object that goes straight to the link
    LinkCandidate(String),
    Archive(String),
    /// Source for the generic compile and link steps
    Source(String),
    IncludeDir(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub kind: StageKind,
    pub steps: Vec<Step>,
    pub splices: Vec<Splice>,
}

impl StagePlan {
    fn new(kind: StageKind) -> Self {
        Self {
            kind,
            steps: Vec::new(),
            splices: Vec::new(),
        }
    }

    fn invoke(&mut self, label: &'static str, invocation: Invocation) {
        self.steps.push(Step::Invoke { label, invocation });
    }
}

/// Plans stages for one build
pub struct StagePlanner<'a> {
    toolchain: &'a Toolchain,
    config: &'a BuildConfig,
    project_dir: &'a Path,
    out_dir: String,
    symbols: SymbolTable,
}

impl<'a> StagePlanner<'a> {
    pub fn new(toolchain: &'a Toolchain, config: &'a BuildConfig, project_dir: &'a Path) -> Self {
        Self {
            toolchain,
            config,
            project_dir,
            out_dir: config.output_dir_name(),
            symbols: SymbolTable::new(),
        }
    }

    /// Plans `entry`; `manifest` is the current (growing) entry list
    pub fn plan(&mut self, entry: &ManifestEntry, manifest: &Manifest) -> Result<StagePlan, BuildError> {
        let path = entry.path();
        let kind = StageKind::classify(path);
        let mut plan = StagePlan::new(kind);

        match kind {
            StageKind::SpinCompile => {
                let dat = self.out_path(&format!("{}.dat", short_stem(path)));
                plan.invoke("spin", self.spin_invocation(path));
                if !manifest.references(&dat) {
                    plan.splices.push(Splice::ManifestEntry(dat));
                }
            }
            StageKind::EmbeddedSpinCompile => {
                let stem = short_stem(path);
                let edat = self.out_path(&format!("{}.edat", stem));
                plan.steps.push(Step::Stage {
                    from: PathBuf::from(path),
                    to: PathBuf::from(SPIN_STAGING_NAME),
                });
                plan.invoke("spin", self.spin_invocation(SPIN_STAGING_NAME));
                plan.steps.push(Step::Stage {
                    from: PathBuf::from(self.out_path("tmp.dat")),
                    to: PathBuf::from(&edat),
                });
                if !manifest.references(&edat) {
                    plan.splices.push(Splice::ManifestEntry(edat));
                }
            }
            StageKind::DataEmbed | StageKind::EmbeddedDataEmbed => {
                let symbol_path = self.without_out_dir(path);
                let rename = SymbolRename::for_blob(path, symbol_path);
                self.symbols.claim(&rename, path)?;

                let base = fold_symbol(strip_extension(symbol_path));
                let object = self.out_path(&format!("{}_firmware.o", base));
                plan.invoke(
                    "objcopy",
                    self.tool(&self.toolchain.objcopy)
                        .args(["-I", "binary", "-B", "propeller", "-O", "propeller-elf-gcc"])
                        .args(rename.redefine_args())
                        .args([path, object.as_str()]),
                );

                if kind == StageKind::EmbeddedDataEmbed {
                    let section = format!("{}_firmware", base);
                    plan.invoke(
                        "objcopy",
                        self.tool(&self.toolchain.objcopy).args([
                            "--rename-section".to_string(),
                            format!(".data={}.ecog", section),
                            "--redefine-sym".to_string(),
                            format!("{}_start=_load_start_{}_ecog", rename.new, section),
                            "--redefine-sym".to_string(),
                            format!("{}_end=_load_stop_{}_ecog", rename.new, section),
                            object.clone(),
                        ]),
                    );
                }

                if !manifest.references(&object) {
                    plan.splices.push(Splice::LinkCandidate(object));
                }
            }
            StageKind::Assemble => {
                let object = self.out_path(&format!("{}.o", short_stem(path)));
                plan.invoke(
                    "assemble",
                    self.tool(&self.toolchain.assembler)
                        .args(["-o", object.as_str(), path]),
                );
                if !manifest.references(&object) {
                    plan.splices.push(Splice::LinkCandidate(object));
                }
            }
            StageKind::CogCompile | StageKind::EmbeddedCogCompile => {
                let suffix = if kind == StageKind::CogCompile { "cog" } else { "ecog" };
                let stem = short_stem(path);
                let image = self.out_path(&format!("{}.{}", stem, suffix));
                plan.invoke(
                    "cog-compile",
                    self.tool(&self.toolchain.compiler)
                        .args(["-r", "-Os", "-mcog", "-o", image.as_str(), "-xc", path]),
                );
                plan.invoke(
                    "objcopy",
                    self.tool(&self.toolchain.objcopy).args([
                        "--localize-text".to_string(),
                        "--rename-section".to_string(),
                        format!(".text={}.{}", stem, suffix),
                        image.clone(),
                    ]),
                );
                plan.splices.push(Splice::LinkCandidate(image));
            }
            StageKind::Archive => {
                plan.splices.push(Splice::Archive(path.to_string()));
            }
            StageKind::PassThrough => {
                if entry.linked_from.is_some() {
                    let dir = match path.rfind(['/', '\\']) {
                        Some(0) => "/",
                        Some(idx) => &path[..idx],
                        None => ".",
                    };
                    plan.splices.push(Splice::IncludeDir(dir.to_string()));
                }
                plan.splices.push(Splice::Source(path.to_string()));
            }
        }

        Ok(plan)
    }

    fn spin_invocation(&self, source: &str) -> Invocation {
        let mut invocation = self.tool(&self.toolchain.spin_compiler).arg("-c");
        let library = self
            .toolchain
            .spin_library
            .as_ref()
            .filter(|dir| dir.is_dir())
            .map(|dir| dir.display().to_string());

        let output = match self.toolchain.spin_flavor {
            SpinFlavor::OpenSpin => {
                if let Some(library) = library {
                    invocation = invocation.args(["-I".to_string(), library]);
                }
                self.out_path(&format!("{}.dat", short_stem(source)))
            }
            SpinFlavor::Bstc => {
                invocation = invocation.args(self.config.spin_options.split_whitespace());
                if let Some(library) = library {
                    invocation = invocation.args(["-L".to_string(), library]);
                }
                // bstc adds the .dat itself
                self.out_path(short_stem(source))
            }
        };
        invocation.args(["-o".to_string(), output, source.to_string()])
    }

    fn tool(&self, program: &str) -> Invocation {
        Invocation::new(program, self.project_dir)
    }

    fn out_path(&self, name: &str) -> String {
        format!("{}/{}", self.out_dir, name)
    }

    fn without_out_dir<'p>(&self, path: &'p str) -> &'p str {
        path.strip_prefix(&self.out_dir)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path)
    }
}
