//! Cache-backed finders and the factory that hands them out.
//!
//! A [`Finder`] answers "is `name` in my directory" from the shared directory cache
//! and only touches the filesystem when the cache says the name is there. A
//! directory proven to hold nothing gets the [`NullFinder`] instead.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::analyze::analyze;
use crate::cache::{DirectoryCache, SharedCache};
use crate::error::{Error, Result};
use crate::host::{FinderFactory, Marker, PathFinder, Resolution, base_name};
use crate::layout::normcase;
use crate::probe::LoadPrimitive;

pub static FINDER_MARKER: Marker = Marker::new("quickresolve::Finder");
pub static NULL_FINDER_MARKER: Marker = Marker::new("quickresolve::NullFinder");
pub static FACTORY_MARKER: Marker = Marker::new("quickresolve::FinderFactory");

static NULL_FINDER: LazyLock<Arc<NullFinder>> = LazyLock::new(|| Arc::new(NullFinder));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// A missing cache entry is a configuration error.
    Strict,
    /// A missing cache entry is filled in by analyzing the directory.
    Autocache,
}

impl CachePolicy {
    pub fn from_autocache(autocache: bool) -> Self {
        if autocache {
            CachePolicy::Autocache
        } else {
            CachePolicy::Strict
        }
    }
}

#[derive(Debug)]
pub struct Finder {
    dir: PathBuf,
    policy: CachePolicy,
    cache: SharedCache,
    primitive: Arc<dyn LoadPrimitive>,
}

impl Finder {
    pub fn new(
        dir: impl Into<PathBuf>,
        policy: CachePolicy,
        cache: SharedCache,
        primitive: Arc<dyn LoadPrimitive>,
    ) -> Self {
        Self {
            dir: dir.into(),
            policy,
            cache,
            primitive,
        }
    }

    fn fill_missing_entry(&self, cache: &mut DirectoryCache) -> std::result::Result<(), String> {
        match self.policy {
            CachePolicy::Strict => Err(format!(
                "no cache entry for {} and autocache is disabled",
                self.dir.display()
            )),
            CachePolicy::Autocache => {
                let analysis = analyze(&self.dir, false, self.primitive.layout());
                let Some(listing) = analysis.listing else {
                    return Err(format!(
                        "no cache entry for {} and the directory cannot be listed",
                        self.dir.display()
                    ));
                };
                debug!(dir = %self.dir.display(), entries = listing.len(), "re-cached directory");
                cache.update(&self.dir, listing);
                Ok(())
            }
        }
    }
}

impl PathFinder for Finder {
    fn find(&self, qualified_name: &str) -> Resolution {
        let mut guard = self.cache.lock();
        let Some(cache) = guard.as_mut() else {
            return Resolution::Misconfigured("directory cache is not installed".to_string());
        };

        if cache.get(&self.dir).is_none()
            && let Err(reason) = self.fill_missing_entry(cache)
        {
            return Resolution::Misconfigured(reason);
        }
        let Some(entry) = cache.get(&self.dir) else {
            return Resolution::Misconfigured(format!(
                "cache entry for {} vanished",
                self.dir.display()
            ));
        };

        let layout = self.primitive.layout();
        let base = base_name(qualified_name);
        if !entry.matches(&normcase(base), layout) {
            return Resolution::NotFound;
        }

        match self.primitive.load_from_dir(&self.dir, base) {
            Some(loader) => {
                debug!(name = qualified_name, dir = %self.dir.display(), "cache hit");
                Resolution::Found(loader.named(qualified_name))
            }
            None => {
                debug!(name = qualified_name, dir = %self.dir.display(), "cache hit, load primitive found nothing");
                Resolution::NotFound
            }
        }
    }

    fn marker(&self) -> Option<&'static Marker> {
        Some(&FINDER_MARKER)
    }
}

/// Bound to directories that cannot contain anything; never finds a thing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFinder;

impl PathFinder for NullFinder {
    fn find(&self, _qualified_name: &str) -> Resolution {
        Resolution::NotFound
    }

    fn marker(&self) -> Option<&'static Marker> {
        Some(&NULL_FINDER_MARKER)
    }
}

pub fn null_finder() -> Arc<dyn PathFinder> {
    NULL_FINDER.clone()
}

/// The hook the installer appends to the resolver chain.
#[derive(Debug, Clone)]
pub struct QuickFinderFactory {
    cache: SharedCache,
    primitive: Arc<dyn LoadPrimitive>,
}

impl QuickFinderFactory {
    pub fn new(cache: SharedCache, primitive: Arc<dyn LoadPrimitive>) -> Self {
        Self { cache, primitive }
    }

    fn finder(&self, dir: &Path, policy: CachePolicy) -> Arc<dyn PathFinder> {
        Arc::new(Finder::new(
            dir,
            policy,
            Arc::clone(&self.cache),
            Arc::clone(&self.primitive),
        ))
    }
}

impl FinderFactory for QuickFinderFactory {
    fn create(&self, dir: &Path) -> Result<Arc<dyn PathFinder>> {
        let mut guard = self.cache.lock();
        let Some(cache) = guard.as_mut() else {
            return Err(Error::declined(dir, "directory cache is not installed"));
        };
        let policy = CachePolicy::from_autocache(cache.autocache());

        if cache.get(dir).is_some() {
            return Ok(self.finder(dir, policy));
        }

        let analysis = analyze(dir, false, self.primitive.layout());
        let Some(listing) = analysis.listing else {
            return Err(Error::declined(dir, "not a listable absolute directory"));
        };
        if !analysis.relevant {
            debug!(dir = %dir.display(), "directory holds no modules");
            return Ok(null_finder());
        }
        if policy == CachePolicy::Strict {
            return Err(Error::declined(dir, "not cached and autocache is disabled"));
        }

        debug!(dir = %dir.display(), entries = listing.len(), "cached directory on first use");
        cache.update(dir, listing);
        Ok(self.finder(dir, policy))
    }

    fn marker(&self) -> Option<&'static Marker> {
        Some(&FACTORY_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ModuleLayout;
    use crate::probe::{FsPrimitive, Loader};
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingPrimitive {
        inner: FsPrimitive,
        calls: AtomicUsize,
    }

    impl LoadPrimitive for CountingPrimitive {
        fn layout(&self) -> &ModuleLayout {
            self.inner.layout()
        }

        fn load_from_dir(&self, dir: &Path, base_name: &str) -> Option<Loader> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load_from_dir(dir, base_name)
        }
    }

    fn installed(autocache: bool) -> SharedCache {
        let mut cache = DirectoryCache::new();
        cache.set_autocache(autocache);
        Arc::new(Mutex::new(Some(cache)))
    }

    #[test]
    fn miss_never_reaches_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("present.lua"), "").unwrap();

        let cache = installed(false);
        cache
            .lock()
            .as_mut()
            .unwrap()
            .update(dir.path(), ["present.lua"]);
        let primitive = Arc::new(CountingPrimitive::default());
        let finder = Finder::new(dir.path(), CachePolicy::Strict, cache, primitive.clone());

        assert_eq!(finder.find("absent"), Resolution::NotFound);
        assert_eq!(finder.find("pkg.absent"), Resolution::NotFound);
        assert_eq!(primitive.calls.load(Ordering::SeqCst), 0);

        match finder.find("pkg.present") {
            Resolution::Found(loader) => {
                assert_eq!(loader.name, "pkg.present");
                assert_eq!(loader.path, dir.path().join("present.lua"));
            }
            other => panic!("expected a loader, got {other:?}"),
        }
        assert_eq!(primitive.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hit_without_loadable_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = installed(false);
        // the entry claims a file that is not on disk
        cache
            .lock()
            .as_mut()
            .unwrap()
            .update(dir.path(), ["ghost.lua"]);
        let finder = Finder::new(
            dir.path(),
            CachePolicy::Strict,
            cache,
            Arc::new(FsPrimitive::default()),
        );
        assert_eq!(finder.find("ghost"), Resolution::NotFound);
    }

    #[test]
    fn strict_finder_without_entry_is_misconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let finder = Finder::new(
            dir.path(),
            CachePolicy::Strict,
            installed(false),
            Arc::new(FsPrimitive::default()),
        );
        assert!(matches!(finder.find("x"), Resolution::Misconfigured(_)));
    }

    #[test]
    fn autocache_finder_refills_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("late.lua"), "").unwrap();
        let cache = installed(true);
        let finder = Finder::new(
            dir.path(),
            CachePolicy::Autocache,
            cache.clone(),
            Arc::new(FsPrimitive::default()),
        );

        assert!(matches!(finder.find("late"), Resolution::Found(_)));
        assert!(cache.lock().as_ref().unwrap().get(dir.path()).is_some());
    }

    #[test]
    fn finder_after_uninstall_is_misconfigured() {
        let cache: SharedCache = Arc::new(Mutex::new(None));
        let finder = Finder::new(
            "/opt/mods",
            CachePolicy::Autocache,
            cache,
            Arc::new(FsPrimitive::default()),
        );
        assert!(matches!(finder.find("x"), Resolution::Misconfigured(_)));
    }

    #[test]
    fn null_finder_is_a_shared_singleton() {
        let a = null_finder();
        let b = null_finder();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.find("anything"), Resolution::NotFound);
        assert!(NULL_FINDER_MARKER.is(a.marker()));
        assert!(!FINDER_MARKER.is(a.marker()));
    }

    #[test]
    fn factory_serves_cached_dirs_and_declines_unknown_ones_when_strict() {
        let known = tempfile::tempdir().unwrap();
        let unknown = tempfile::tempdir().unwrap();
        fs::write(known.path().join("a.lua"), "").unwrap();
        fs::write(unknown.path().join("b.lua"), "").unwrap();

        let cache = installed(false);
        cache.lock().as_mut().unwrap().update(known.path(), ["a.lua"]);
        let factory = QuickFinderFactory::new(cache, Arc::new(FsPrimitive::default()));

        let finder = factory.create(known.path()).unwrap();
        assert!(FINDER_MARKER.is(finder.marker()));
        assert!(matches!(
            factory.create(unknown.path()),
            Err(Error::Declined { .. })
        ));
    }

    #[test]
    fn factory_autocaches_relevant_dirs_and_nulls_empty_ones() {
        let relevant = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        fs::write(relevant.path().join("b.lua"), "").unwrap();

        let cache = installed(true);
        let factory = QuickFinderFactory::new(cache.clone(), Arc::new(FsPrimitive::default()));

        let finder = factory.create(relevant.path()).unwrap();
        assert!(FINDER_MARKER.is(finder.marker()));
        assert!(cache.lock().as_ref().unwrap().get(relevant.path()).is_some());

        let null = factory.create(empty.path()).unwrap();
        assert!(NULL_FINDER_MARKER.is(null.marker()));
        assert!(cache.lock().as_ref().unwrap().get(empty.path()).is_none());

        assert!(factory.create(Path::new("relative/dir")).is_err());
        assert!(factory.create(&relevant.path().join("missing")).is_err());
    }

    #[test]
    fn factory_declines_when_not_installed() {
        let factory = QuickFinderFactory::new(
            Arc::new(Mutex::new(None)),
            Arc::new(FsPrimitive::default()),
        );
        assert!(factory.create(Path::new("/tmp")).is_err());
    }
}
