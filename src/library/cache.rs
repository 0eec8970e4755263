use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `libNAME` -> library directory, trusted only while the path exists
#[derive(Debug, Default, Clone)]
pub struct LibraryCache {
    entries: HashMap<String, PathBuf>,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached path, evicting it if it no longer exists on disk
    pub fn get(&mut self, name: &str) -> Option<PathBuf> {
        let path = self.entries.get(name)?;
        if path.exists() {
            return Some(path.clone());
        }
        debug!(name, path = %path.display(), "Evicting stale library cache entry");
        self.entries.remove(name);
        None
    }

    pub fn insert(&mut self, name: impl Into<String>, path: &Path) {
        self.entries.insert(name.into(), path.to_path_buf());
    }

    pub fn evict(&mut self, name: &str) -> Option<PathBuf> {
        self.entries.remove(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
