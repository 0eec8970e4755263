//! Toolchain configuration for cogbuild
//!
//! Settings are read from an optional TOML file and then overridden by
//! environment variables. Everything has a default, so an installed
//! propeller-gcc on `PATH` works without any configuration.
//!
//! # Environment Variables
//!
//! - `COGBUILD_COMPILER`: C compiler path - default: "propeller-elf-gcc"
//! - `COGBUILD_SPIN_COMPILER`: Spin compiler (openspin or bstc) - default: "openspin"
//! - `COGBUILD_SPIN_LIBRARY`: Spin object library directory
//! - `COGBUILD_LIBRARY`: Root of the C library tree searched by auto-library resolution
//! - `COGBUILD_LOADER`: Loader program - default: "propeller-load"
//! - `COGBUILD_LINK_GROUP`: Wrap `-l` flags in a linker group instead of repeating them (true|false)
//! - `COGBUILD_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use cogbuild::ToolchainConfig;
//!
//! let config = ToolchainConfig::load(None).expect("config");
//! config.validate().expect("Invalid configuration");
//! let tools = config.toolchain();
//! assert!(tools.objcopy.ends_with("objcopy"));
//! ```

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_COMPILER: &str = "propeller-elf-gcc";
const DEFAULT_SPIN_COMPILER: &str = "openspin";
const DEFAULT_LOADER: &str = "propeller-load";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Compiler not set. Set COGBUILD_COMPILER or `compiler` in the config file")]
    MissingCompiler,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// How `-l` flags are arranged on the link line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryOrdering {
    /// Append the full library list once per distinct library
    #[default]
    Repeat,
    /// Emit the list once between `--start-group` and `--end-group`
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub compiler: String,
    pub spin_compiler: String,
    pub spin_library: Option<PathBuf>,
    pub library_root: Option<PathBuf>,
    pub loader: String,
    pub library_ordering: LibraryOrdering,
    /// Run `<compiler> -v` at the start of each build
    pub report_version: bool,
    pub log_level: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: DEFAULT_COMPILER.to_string(),
            spin_compiler: DEFAULT_SPIN_COMPILER.to_string(),
            spin_library: None,
            library_root: None,
            loader: DEFAULT_LOADER.to_string(),
            library_ordering: LibraryOrdering::Repeat,
            report_version: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ToolchainConfig {
    /// Defaults overridden by `COGBUILD_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Loads the optional TOML file, then applies environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(compiler) = env::var("COGBUILD_COMPILER") {
            self.compiler = compiler;
        }
        if let Ok(spin) = env::var("COGBUILD_SPIN_COMPILER") {
            self.spin_compiler = spin;
        }
        if let Ok(dir) = env::var("COGBUILD_SPIN_LIBRARY") {
            self.spin_library = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = env::var("COGBUILD_LIBRARY") {
            self.library_root = Some(PathBuf::from(dir));
        }
        if let Ok(loader) = env::var("COGBUILD_LOADER") {
            self.loader = loader;
        }
        if let Ok(group) = env::var("COGBUILD_LINK_GROUP") {
            let group = group
                .parse::<bool>()
                .map_err(|e| ConfigError::ParseError {
                    field: "COGBUILD_LINK_GROUP".to_string(),
                    error: e.to_string(),
                })?;
            self.library_ordering = if group {
                LibraryOrdering::Group
            } else {
                LibraryOrdering::Repeat
            };
        }
        if let Ok(level) = env::var("COGBUILD_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compiler.trim().is_empty() {
            return Err(ConfigError::MissingCompiler);
        }
        if self.spin_compiler.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Spin compiler must not be empty".to_string(),
            ));
        }
        if self.loader.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Loader must not be empty".to_string(),
            ));
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }
        Ok(())
    }

    /// Resolves the program names used by each build stage
    pub fn toolchain(&self) -> Toolchain {
        let compiler = self.compiler.clone();
        Toolchain {
            cxx: cxx_for(&compiler),
            objcopy: sibling_tool(&compiler, "objcopy"),
            assembler: sibling_tool(&compiler, "as"),
            archiver: sibling_tool(&compiler, "ar"),
            objdump: sibling_tool(&compiler, "objdump"),
            loader: self.loader.clone(),
            spin_compiler: self.spin_compiler.clone(),
            spin_flavor: SpinFlavor::detect(&self.spin_compiler),
            spin_library: self.spin_library.clone(),
            compiler,
        }
    }
}

/// Which command-line dialect the Spin compiler speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinFlavor {
    /// openspin: writes exactly the `-o` file, library via `-I`
    OpenSpin,
    /// bstc: appends `.dat` to `-o`, library via `-L`
    Bstc,
}

impl SpinFlavor {
    pub fn detect(program: &str) -> Self {
        let name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program)
            .to_lowercase();
        if name == "openspin" || name == "openspin.exe" {
            SpinFlavor::OpenSpin
        } else {
            SpinFlavor::Bstc
        }
    }
}

/// Resolved program names for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub compiler: String,
    pub cxx: String,
    pub objcopy: String,
    pub assembler: String,
    pub archiver: String,
    pub objdump: String,
    pub loader: String,
    pub spin_compiler: String,
    pub spin_flavor: SpinFlavor,
    pub spin_library: Option<PathBuf>,
}

/// `propeller-elf-gcc` -> `propeller-elf-<tool>`, keeping any directory prefix
fn sibling_tool(compiler: &str, tool: &str) -> String {
    match compiler.strip_suffix("gcc") {
        Some(prefix) => format!("{}{}", prefix, tool),
        None => match compiler.strip_suffix("gcc.exe") {
            Some(prefix) => format!("{}{}.exe", prefix, tool),
            None => format!("propeller-elf-{}", tool),
        },
    }
}

fn cxx_for(compiler: &str) -> String {
    match compiler.rfind('-') {
        Some(idx) => format!("{}c++", &compiler[..=idx]),
        None => "c++".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn clear_env() {
        for var in [
            "COGBUILD_COMPILER",
            "COGBUILD_SPIN_COMPILER",
            "COGBUILD_SPIN_LIBRARY",
            "COGBUILD_LIBRARY",
            "COGBUILD_LOADER",
            "COGBUILD_LINK_GROUP",
            "COGBUILD_LOG_LEVEL",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ToolchainConfig::default();
        assert_eq!(config.compiler, "propeller-elf-gcc");
        assert_eq!(config.library_ordering, LibraryOrdering::Repeat);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toolchain_sibling_names() {
        let config = ToolchainConfig {
            compiler: "/opt/parallax/bin/propeller-elf-gcc".to_string(),
            ..Default::default()
        };
        let tools = config.toolchain();
        assert_eq!(tools.objcopy, "/opt/parallax/bin/propeller-elf-objcopy");
        assert_eq!(tools.assembler, "/opt/parallax/bin/propeller-elf-as");
        assert_eq!(tools.archiver, "/opt/parallax/bin/propeller-elf-ar");
        assert_eq!(tools.objdump, "/opt/parallax/bin/propeller-elf-objdump");
        assert_eq!(tools.cxx, "/opt/parallax/bin/propeller-elf-c++");
        assert_eq!(tools.spin_flavor, SpinFlavor::OpenSpin);
    }

    #[test]
    fn test_spin_flavor_detection() {
        assert_eq!(SpinFlavor::detect("/usr/bin/openspin"), SpinFlavor::OpenSpin);
        assert_eq!(SpinFlavor::detect("OpenSpin.exe"), SpinFlavor::OpenSpin);
        assert_eq!(SpinFlavor::detect("bstc.linux"), SpinFlavor::Bstc);
    }

    #[test]
    fn test_validate_rejects_empty_compiler() {
        let config = ToolchainConfig {
            compiler: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingCompiler)));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let config = ToolchainConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_file_with_partial_settings() {
        clear_env();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "compiler = \"/tools/propeller-elf-gcc\"\nlibrary_root = \"/libs\"\nlibrary_ordering = \"group\""
        )
        .unwrap();

        let config = ToolchainConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.compiler, "/tools/propeller-elf-gcc");
        assert_eq!(config.library_root, Some(PathBuf::from("/libs")));
        assert_eq!(config.library_ordering, LibraryOrdering::Group);
        assert_eq!(config.spin_compiler, "openspin");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        env::set_var("COGBUILD_COMPILER", "/env/propeller-elf-gcc");
        env::set_var("COGBUILD_LINK_GROUP", "true");

        let config = ToolchainConfig::from_env().unwrap();
        assert_eq!(config.compiler, "/env/propeller-elf-gcc");
        assert_eq!(config.library_ordering, LibraryOrdering::Group);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_bad_bool_is_parse_error() {
        clear_env();
        env::set_var("COGBUILD_LINK_GROUP", "maybe");

        let err = ToolchainConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        clear_env();
    }

    #[test]
    fn test_missing_config_file() {
        let err = ToolchainConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
