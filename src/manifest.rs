//! Project manifest model
//!
//! A project file is a newline separated list. The first line is the main
//! source; `>` lines are directives; `-` lines are compiler/linker options;
//! `alias->path` lines compile `path` while displaying `alias`.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Separator between the displayed alias and the real source path
pub const FILE_LINK: &str = "->";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read project file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Project file {0} has no entries")]
    Empty(PathBuf),

    #[error("Project file {0} starts with a directive instead of the main source")]
    MissingMain(PathBuf),
}

/// One line of the project file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub raw: String,
    pub is_metadata: bool,
    pub linked_from: Option<String>,
}

impl ManifestEntry {
    pub fn parse(line: &str) -> Self {
        let raw = line.trim().to_string();
        let is_metadata = raw.starts_with('>');
        let linked_from = if is_metadata {
            None
        } else {
            raw.find(FILE_LINK)
                .filter(|idx| *idx > 0)
                .map(|idx| raw[idx + FILE_LINK.len()..].trim().to_string())
        };
        Self {
            raw,
            is_metadata,
            linked_from,
        }
    }

    /// A derived entry spliced in by a build stage
    pub fn source(path: impl Into<String>) -> Self {
        Self {
            raw: path.into(),
            is_metadata: false,
            linked_from: None,
        }
    }

    /// Path handed to the tools
    pub fn path(&self) -> &str {
        self.linked_from.as_deref().unwrap_or(&self.raw)
    }

    /// Name shown to the user
    pub fn display_name(&self) -> &str {
        match self.raw.find(FILE_LINK) {
            Some(idx) if self.linked_from.is_some() => self.raw[..idx].trim(),
            _ => &self.raw,
        }
    }

    /// Directive text without the leading `>`
    pub fn directive(&self) -> Option<&str> {
        if self.is_metadata {
            Some(self.raw[1..].trim())
        } else {
            None
        }
    }

    /// `-I dir`, `-L dir`, `-lm` and similar option lines
    pub fn is_option(&self) -> bool {
        !self.is_metadata && self.raw.starts_with('-')
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// A file that takes part in the build
    pub fn is_local_source(&self) -> bool {
        !self.is_metadata && !self.is_option() && !self.is_empty()
    }
}

/// Ordered project entries; entry 0 is the main source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .trim()
            .lines()
            .map(ManifestEntry::parse)
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries }
    }

    pub fn from_entries<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = lines
            .into_iter()
            .map(|l| ManifestEntry::parse(l.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&text);
        match manifest.entries.first() {
            None => Err(ManifestError::Empty(path.to_path_buf())),
            Some(first) if !first.is_local_source() => {
                Err(ManifestError::MissingMain(path.to_path_buf()))
            }
            Some(_) => Ok(manifest),
        }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ManifestEntry> {
        self.entries.get(index)
    }

    pub fn main(&self) -> Option<&ManifestEntry> {
        self.entries.first()
    }

    pub fn push(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    pub fn directives(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(ManifestEntry::directive)
    }

    /// Source paths that decide whether the target is stale
    pub fn local_sources(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.is_local_source())
            .map(ManifestEntry::path)
    }

    /// True when some entry already names `file_name` (case-insensitive, by file name)
    pub fn references(&self, file_name: &str) -> bool {
        let wanted = short_name(file_name).to_lowercase();
        self.entries
            .iter()
            .filter(|e| !e.is_metadata)
            .any(|e| short_name(e.path()).to_lowercase() == wanted)
    }
}

/// Final path component of a `/`-separated manifest path
pub fn short_name(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// File name without its last extension
pub fn short_stem(path: &str) -> &str {
    strip_extension(short_name(path))
}

/// Path without its last extension (extension only counts in the final component)
pub fn strip_extension(path: &str) -> &str {
    let name_start = path.len() - short_name(path).len();
    match path[name_start..].rfind('.') {
        Some(idx) if idx > 0 => &path[..name_start + idx],
        _ => path,
    }
}

/// Lowercase extension of the final component, without the dot
pub fn extension(path: &str) -> Option<String> {
    let name = short_name(path);
    name.rfind('.')
        .filter(|idx| *idx > 0)
        .map(|idx| name[idx + 1..].to_lowercase())
}
