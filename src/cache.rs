//! In-memory directory content cache.
//!
//! Maps a normalized directory path to the set of entry names it held when it was
//! analyzed. Entries are treated as ground truth until the cache is dropped; nothing
//! here re-reads a directory to check for staleness.

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyze::analyze;
use crate::layout::{ModuleLayout, normcase, normcase_path};

/// The cache shared between the installer and every finder. The mutex doubles as the
/// lock serializing cache population and lookups; `None` means not installed.
pub type SharedCache = Arc<Mutex<Option<DirectoryCache>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    names: HashSet<String>,
}

impl CacheEntry {
    pub fn contains(&self, normalized_name: &str) -> bool {
        self.names.contains(normalized_name)
    }

    /// True if `candidate` names a directory entry as is or with any layout suffix.
    pub fn matches(&self, candidate: &str, layout: &ModuleLayout) -> bool {
        if self.names.contains(candidate) {
            return true;
        }
        let mut probe = String::with_capacity(candidate.len() + 8);
        layout.suffixes.iter().any(|s| {
            probe.clear();
            probe.push_str(candidate);
            probe.push_str(&s.suffix);
            self.names.contains(probe.as_str())
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryCache {
    entries: HashMap<PathBuf, CacheEntry>,
    autocache: bool,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzes `paths` in quick mode and records every relevant, non-empty directory,
    /// on top of `existing` when given.
    pub fn prepare(paths: &[PathBuf], existing: Option<DirectoryCache>, layout: &ModuleLayout) -> Self {
        let mut cache = existing.unwrap_or_default();

        let analyzed: Vec<(&PathBuf, Option<Vec<String>>)> = paths
            .par_iter()
            .map(|dir| {
                let analysis = analyze(dir, false, layout);
                let relevant = analysis.relevant;
                let listing = analysis.listing.filter(|l| relevant && !l.is_empty());
                (dir, listing)
            })
            .collect();

        for (dir, listing) in analyzed {
            if let Some(listing) = listing {
                cache.update(dir, listing);
            }
        }
        cache
    }

    /// Inserts or replaces the entry for `dir`.
    pub fn update<I, S>(&mut self, dir: &Path, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| normcase(n.as_ref()).into_owned())
            .collect();
        self.entries.insert(normcase_path(dir), CacheEntry { names });
    }

    pub fn get(&self, dir: &Path) -> Option<&CacheEntry> {
        self.entries.get(&normcase_path(dir))
    }

    pub fn remove(&mut self, dir: &Path) -> Option<CacheEntry> {
        self.entries.remove(&normcase_path(dir))
    }

    pub fn autocache(&self) -> bool {
        self.autocache
    }

    pub fn set_autocache(&mut self, autocache: bool) {
        self.autocache = autocache;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    pub fn stats(&self) -> CacheStats {
        let mut directories: Vec<String> = self
            .dirs()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        directories.sort();
        CacheStats {
            cached_dirs: self.entries.len() as u64,
            cached_names: self.entries.values().map(|e| e.len() as u64).sum(),
            autocache: self.autocache,
            directories,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached_dirs: u64,
    pub cached_names: u64,
    pub autocache: bool,
    pub directories: Vec<String>,
}
