use super::cache::LibraryCache;
use super::scanner::{library_name, strip_delimiters, IncludeScanner};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Discovers library directories implied by `#include "foo.h"` usage.
///
/// A header `foo.h` maps to a directory named `libfoo`, searched first in the
/// project tree and then under the library root. Each library found is
/// scanned in turn through its own `foo.h`, so transitive dependencies are
/// picked up. Resolution is best-effort: unreadable files and headers with no
/// matching library are skipped.
pub struct LibraryResolver<'a> {
    cache: &'a mut LibraryCache,
    library_root: PathBuf,
    visited: HashSet<PathBuf>,
    scanned: Vec<PathBuf>,
    /// `(search root, name)` pairs already looked up without success
    missing: HashSet<(PathBuf, String)>,
    found: Vec<PathBuf>,
}

impl<'a> LibraryResolver<'a> {
    pub fn new(cache: &'a mut LibraryCache, library_root: impl Into<PathBuf>) -> Self {
        Self {
            cache,
            library_root: library_root.into(),
            visited: HashSet::new(),
            scanned: Vec::new(),
            missing: HashSet::new(),
            found: Vec::new(),
        }
    }

    /// Library directories needed by `sources`, in discovery order.
    ///
    /// Clears the cache first so every build sees the current filesystem.
    pub fn resolve<S: AsRef<str>>(&mut self, project_dir: &Path, sources: &[S]) -> Vec<PathBuf> {
        self.cache.clear();
        self.visited.clear();
        self.scanned.clear();
        self.missing.clear();
        self.found.clear();

        for source in sources {
            let path = project_dir.join(source.as_ref());
            self.scan(project_dir, &path);
        }

        debug!(
            libraries = self.found.len(),
            files_scanned = self.scanned.len(),
            "Library resolution complete"
        );
        self.found.clone()
    }

    /// Files opened during the last pass, in scan order
    pub fn scanned_files(&self) -> &[PathBuf] {
        &self.scanned
    }

    fn scan(&mut self, project_dir: &Path, file: &Path) {
        if !self.visited.insert(canonical(file)) {
            return;
        }

        let scanner = match IncludeScanner::open(file) {
            Ok(scanner) => scanner,
            Err(err) => {
                trace!(file = %file.display(), error = %err, "Skipping unreadable source");
                return;
            }
        };
        self.scanned.push(file.to_path_buf());

        for raw in scanner {
            let Some(name) = library_name(strip_delimiters(&raw)) else {
                continue;
            };
            let Some(library) = self.find_library(project_dir, &name) else {
                continue;
            };
            // A library including its own header must not add itself
            if canonical(&library) == canonical(project_dir) {
                continue;
            }
            if self.found.contains(&library) {
                continue;
            }

            debug!(library = %library.display(), from = %file.display(), "Found library");
            self.found.push(library.clone());

            let header = format!("{}.h", &name["lib".len()..]);
            let in_library = library.join(&header);
            let header_path = if in_library.is_file() {
                Some(in_library)
            } else {
                self.find_header(project_dir, &header)
            };
            if let Some(header_path) = header_path {
                let header_dir = header_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| library.clone());
                self.scan(&header_dir, &header_path);
            }
        }
    }

    /// Library directory `name`; only these lookups go through the cache
    fn find_library(&mut self, project_dir: &Path, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.cache.get(name) {
            return Some(path);
        }
        let found = self.search(project_dir, name, EntryKind::Directory);
        if let Some(path) = &found {
            self.cache.insert(name, path);
        }
        found
    }

    /// Header file `name` outside its library directory
    fn find_header(&mut self, project_dir: &Path, name: &str) -> Option<PathBuf> {
        self.search(project_dir, name, EntryKind::File)
    }

    fn search(&mut self, project_dir: &Path, name: &str, kind: EntryKind) -> Option<PathBuf> {
        let key = (project_dir.to_path_buf(), name.to_string());
        if self.missing.contains(&key) {
            return None;
        }
        let found = find_named(project_dir, name, kind)
            .or_else(|| find_named(&self.library_root, name, kind));
        if found.is_none() {
            self.missing.insert(key);
        }
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
}

/// First entry of `kind` named `name` below `root`, walking in file-name order
fn find_named(root: &Path, name: &str, kind: EntryKind) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }
    WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.depth() > 0)
        .filter(|entry| {
            entry.file_type().is_some_and(|t| match kind {
                EntryKind::Directory => t.is_dir(),
                EntryKind::File => t.is_file(),
            })
        })
        .find(|entry| entry.file_name() == name)
        .map(|entry| entry.into_path())
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
