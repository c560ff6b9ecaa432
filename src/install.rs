//! Installing the finder factory into a module system, and taking it out again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analyze::analyze;
use crate::cache::{CacheStats, DirectoryCache, SharedCache};
use crate::error::Error;
use crate::finder::{FACTORY_MARKER, FINDER_MARKER, NULL_FINDER_MARKER, QuickFinderFactory};
use crate::host::{Binding, ModuleSystem};
use crate::layout::ModuleLayout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallFlags {
    /// Do nothing at all.
    pub off: bool,
    /// Skip the cache and the hook; only `filter_dirs` can still apply.
    pub no_cache: bool,
    /// Never cache a directory lazily on first use.
    pub no_autocache: bool,
    /// Drop irrelevant directories from the given list.
    pub filter_dirs: bool,
}

impl FromStr for InstallFlags {
    type Err = Error;

    /// Parses keywords such as `"noAutocache filterDirs"`; commas also separate.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = InstallFlags::default();
        for word in s.split(|c: char| c.is_whitespace() || c == ',') {
            match word {
                "" => {}
                "off" => flags.off = true,
                "noCache" => flags.no_cache = true,
                "noAutocache" => flags.no_autocache = true,
                "filterDirs" => flags.filter_dirs = true,
                other => return Err(Error::UnknownFlag(other.to_string())),
            }
        }
        Ok(flags)
    }
}

/// Owner of the directory cache for one module system.
#[derive(Debug, Clone, Default)]
pub struct QuickResolve {
    cache: SharedCache,
}

impl QuickResolve {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn shared_cache(&self) -> SharedCache {
        Arc::clone(&self.cache)
    }

    pub fn is_installed(&self) -> bool {
        self.cache.lock().is_some()
    }

    /// Builds or extends the cache, registers the finder factory, and optionally
    /// filters `dirs` (or the system search path when `dirs` is `None`).
    pub fn install(&self, system: &ModuleSystem, flags: InstallFlags, dirs: Option<&mut Vec<PathBuf>>) {
        if flags.off {
            debug!("quickresolve disabled by flags");
            return;
        }

        let layout = system.layout();
        let mut host = system.state();
        let mut dirs = dirs;

        if !flags.no_cache {
            let mut guard = self.cache.lock();
            let source = match &dirs {
                Some(d) => d.to_vec(),
                None => host.search_path.clone(),
            };
            let mut cache = DirectoryCache::prepare(&source, guard.take(), layout);
            cache.set_autocache(!flags.no_autocache);

            host.hooks.retain(|h| !FACTORY_MARKER.is(h.marker()));
            host.hooks.push(Arc::new(QuickFinderFactory::new(
                Arc::clone(&self.cache),
                Arc::clone(system.primitive()),
            )));

            // Bindings made before the hook existed are stale; a directory owned by a
            // foreign finder must not be served from the cache.
            host.bindings.retain(|dir, binding| {
                let ours = match binding {
                    Binding::Unclaimed => true,
                    Binding::Finder(f) => {
                        FINDER_MARKER.is(f.marker()) || NULL_FINDER_MARKER.is(f.marker())
                    }
                };
                if !ours {
                    cache.remove(dir);
                }
                !ours
            });

            info!(
                cached_dirs = cache.len(),
                autocache = cache.autocache(),
                "installed directory cache"
            );
            *guard = Some(cache);
        }

        if flags.filter_dirs {
            let guard = self.cache.lock();
            let state = &mut *host;
            let bindings = &state.bindings;
            let keep =
                |dir: &PathBuf| relevant_locked(bindings, guard.as_ref(), dir, false, layout);
            let before;
            let after;
            match dirs.as_mut() {
                Some(d) => {
                    before = d.len();
                    d.retain(keep);
                    after = d.len();
                }
                None => {
                    before = state.search_path.len();
                    state.search_path.retain(keep);
                    after = state.search_path.len();
                }
            }
            info!(removed = before - after, kept = after, "filtered search path");
        }
    }

    /// Removes the finder factory and discards the cache. Safe to call repeatedly.
    pub fn uninstall(&self, system: &ModuleSystem) {
        let mut host = system.state();
        let before = host.hooks.len();
        host.hooks.retain(|h| !FACTORY_MARKER.is(h.marker()));
        if host.hooks.len() != before {
            host.bindings.clear();
        }
        if self.cache.lock().take().is_some() {
            info!("uninstalled directory cache");
        }
    }

    /// Whether `dir` could hold anything, judged from bindings, cache, or a thorough
    /// analysis. `filterDirs` asks the same question with a quick analysis. Entries that cannot be analyzed as directories count as relevant.
    pub fn is_dir_relevant(&self, system: &ModuleSystem, dir: &Path) -> bool {
        let host = system.state();
        let guard = self.cache.lock();
        relevant_locked(&host.bindings, guard.as_ref(), dir, true, system.layout())
    }

    /// Builds a cache for `paths` (the system search path by default) on top of
    /// `existing`, without installing it.
    pub fn prepare_cache(
        &self,
        system: &ModuleSystem,
        paths: Option<&[PathBuf]>,
        existing: Option<DirectoryCache>,
    ) -> DirectoryCache {
        match paths {
            Some(p) => DirectoryCache::prepare(p, existing, system.layout()),
            None => DirectoryCache::prepare(&system.search_path(), existing, system.layout()),
        }
    }

    /// Forgets what is known about `dir` so that its next use re-analyzes it.
    ///
    /// Returns whether a cache entry was dropped.
    pub fn invalidate(&self, system: &ModuleSystem, dir: &Path) -> bool {
        let mut host = system.state();
        host.bindings.remove(dir);
        let mut guard = self.cache.lock();
        let removed = guard.as_mut().and_then(|c| c.remove(dir)).is_some();
        if removed {
            debug!(dir = %dir.display(), "invalidated cache entry");
        }
        removed
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.cache.lock().as_ref().map(DirectoryCache::stats)
    }
}

fn relevant_locked(
    bindings: &HashMap<PathBuf, Binding>,
    cache: Option<&DirectoryCache>,
    dir: &Path,
    thorough: bool,
    layout: &ModuleLayout,
) -> bool {
    if let Some(binding) = bindings.get(dir) {
        let marker = binding.marker();
        if NULL_FINDER_MARKER.is(marker) {
            return false;
        }
        if FINDER_MARKER.is(marker) {
            return true;
        }
    }

    if cache
        .and_then(|c| c.get(dir))
        .is_some_and(|entry| !entry.is_empty())
    {
        return true;
    }

    let analysis = analyze(dir, thorough, layout);
    analysis.relevant || analysis.listing.is_none()
}
