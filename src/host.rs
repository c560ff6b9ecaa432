//! Reference host resolution machinery.
//!
//! `ModuleSystem` owns what a module loader normally keeps in process state: the
//! search path, the ordered resolver-hook chain, and the per-directory binding cache.
//! Resolution walks the search path; each directory is served by the first hook that
//! accepts it, or by the raw load primitive when no hook does.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::layout::{ModuleLayout, is_identifier};
use crate::probe::{FsPrimitive, LoadPrimitive, Loader};

/// Identity sentinel for recognizing finders and factories across instances.
///
/// Two markers are the same only if they are the same static.
#[derive(Debug)]
pub struct Marker {
    name: &'static str,
}

impl Marker {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is(&self, other: Option<&Marker>) -> bool {
        other.is_some_and(|o| std::ptr::eq(self, o))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Loader),
    NotFound,
    /// The finder cannot answer at all; the reason is reported to the caller.
    Misconfigured(String),
}

pub trait PathFinder: Send + Sync + fmt::Debug {
    fn find(&self, qualified_name: &str) -> Resolution;

    fn marker(&self) -> Option<&'static Marker> {
        None
    }
}

pub trait FinderFactory: Send + Sync {
    /// Returns a finder for `dir`, or an error when this factory cannot serve it.
    fn create(&self, dir: &Path) -> Result<Arc<dyn PathFinder>>;

    fn marker(&self) -> Option<&'static Marker> {
        None
    }
}

#[derive(Debug, Clone)]
pub enum Binding {
    Finder(Arc<dyn PathFinder>),
    /// No hook accepted the directory; the raw primitive serves it.
    Unclaimed,
}

impl Binding {
    pub fn finder(&self) -> Option<Arc<dyn PathFinder>> {
        match self {
            Binding::Finder(f) => Some(Arc::clone(f)),
            Binding::Unclaimed => None,
        }
    }

    pub fn marker(&self) -> Option<&'static Marker> {
        match self {
            Binding::Finder(f) => f.marker(),
            Binding::Unclaimed => None,
        }
    }
}

#[derive(Default)]
pub struct HostState {
    pub search_path: Vec<PathBuf>,
    pub hooks: Vec<Arc<dyn FinderFactory>>,
    pub bindings: HashMap<PathBuf, Binding>,
}

pub struct ModuleSystem {
    primitive: Arc<dyn LoadPrimitive>,
    state: Mutex<HostState>,
}

impl ModuleSystem {
    pub fn new(primitive: Arc<dyn LoadPrimitive>, search_path: Vec<PathBuf>) -> Self {
        Self {
            primitive,
            state: Mutex::new(HostState {
                search_path,
                ..HostState::default()
            }),
        }
    }

    pub fn with_layout(layout: ModuleLayout, search_path: Vec<PathBuf>) -> Self {
        Self::new(Arc::new(FsPrimitive::new(layout)), search_path)
    }

    pub fn primitive(&self) -> &Arc<dyn LoadPrimitive> {
        &self.primitive
    }

    pub fn layout(&self) -> &ModuleLayout {
        self.primitive.layout()
    }

    /// Locks the host state. Never call while holding the directory cache lock.
    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock()
    }

    pub fn search_path(&self) -> Vec<PathBuf> {
        self.state.lock().search_path.clone()
    }

    /// Returns the finder bound to `dir`, asking the hook chain on first use.
    pub fn finder_for(&self, dir: &Path) -> Option<Arc<dyn PathFinder>> {
        let mut state = self.state.lock();
        if let Some(binding) = state.bindings.get(dir) {
            return binding.finder();
        }

        let mut binding = Binding::Unclaimed;
        for hook in state.hooks.iter() {
            match hook.create(dir) {
                Ok(finder) => {
                    binding = Binding::Finder(finder);
                    break;
                }
                Err(err) => debug!(dir = %dir.display(), %err, "hook declined directory"),
            }
        }

        debug!(
            dir = %dir.display(),
            finder = binding.marker().map_or("unclaimed", Marker::name),
            "bound directory"
        );
        let finder = binding.finder();
        state.bindings.insert(dir.to_path_buf(), binding);
        finder
    }

    /// Resolves a dotted name, descending into package directories for each component.
    pub fn resolve(&self, name: &str) -> Result<Loader> {
        let not_found = || Error::NotFound {
            name: name.to_string(),
        };

        let mut path = self.search_path();
        let mut qualified = String::with_capacity(name.len());
        let mut resolved: Option<Loader> = None;

        for part in name.split('.') {
            // components are joined onto directories; only identifiers stay inside them
            if !is_identifier(part) {
                return Err(not_found());
            }
            if let Some(parent) = resolved.take() {
                let Some(package_dir) = parent.package_dir else {
                    return Err(not_found());
                };
                path = vec![package_dir];
                qualified.push('.');
            }
            qualified.push_str(part);

            match self.find_in(&path, &qualified)? {
                Some(loader) => resolved = Some(loader),
                None => {
                    return Err(Error::NotFound {
                        name: qualified.clone(),
                    });
                }
            }
        }

        resolved.ok_or_else(not_found)
    }

    fn find_in(&self, path: &[PathBuf], qualified: &str) -> Result<Option<Loader>> {
        let base = base_name(qualified);
        for dir in path {
            let outcome = match self.finder_for(dir) {
                Some(finder) => finder.find(qualified),
                None => match self.primitive.load_from_dir(dir, base) {
                    Some(loader) => Resolution::Found(loader.named(qualified)),
                    None => Resolution::NotFound,
                },
            };

            match outcome {
                Resolution::Found(loader) => return Ok(Some(loader)),
                Resolution::NotFound => continue,
                Resolution::Misconfigured(reason) => {
                    return Err(Error::Misconfigured {
                        name: qualified.to_string(),
                        dir: dir.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(None)
    }
}

/// Last component of a dotted name.
pub fn base_name(qualified: &str) -> &str {
    match qualified.rsplit_once('.') {
        Some((_, base)) => base,
        None => qualified,
    }
}
