//! The host's single-directory load primitive.
//!
//! This is the expensive path the directory cache exists to avoid: every call stats
//! one candidate per recognized suffix.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::layout::{ModuleKind, ModuleLayout};

/// A located unit, ready to be read by whatever executes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loader {
    pub name: String,
    /// The file to load; for a package this is its init file.
    pub path: PathBuf,
    pub kind: ModuleKind,
    pub package_dir: Option<PathBuf>,
}

impl Loader {
    pub fn named(mut self, qualified_name: &str) -> Self {
        self.name = qualified_name.to_string();
        self
    }

    pub fn is_package(&self) -> bool {
        self.package_dir.is_some()
    }

    /// Source text, when the located file is a source file.
    pub fn source(&self) -> Result<Option<String>> {
        if self.kind != ModuleKind::Source {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| Error::io(format!("reading source of {}", self.name), e))
    }
}

pub trait LoadPrimitive: Send + Sync + fmt::Debug {
    fn layout(&self) -> &ModuleLayout;

    /// Looks for `base_name` directly inside `dir`; `None` means not found.
    fn load_from_dir(&self, dir: &Path, base_name: &str) -> Option<Loader>;
}

/// Probes the real filesystem: a package directory first, then one file per suffix.
#[derive(Debug, Clone, Default)]
pub struct FsPrimitive {
    layout: ModuleLayout,
}

impl FsPrimitive {
    pub fn new(layout: ModuleLayout) -> Self {
        Self { layout }
    }
}

impl LoadPrimitive for FsPrimitive {
    fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    fn load_from_dir(&self, dir: &Path, base_name: &str) -> Option<Loader> {
        let package_dir = dir.join(base_name);
        if package_dir.is_dir() {
            for (init_name, kind) in self.layout.init_file_names() {
                let init = package_dir.join(init_name);
                if init.is_file() {
                    return Some(Loader {
                        name: base_name.to_string(),
                        path: init,
                        kind,
                        package_dir: Some(package_dir),
                    });
                }
            }
        }

        for s in self.layout.suffixes.iter() {
            let candidate = dir.join(format!("{base_name}{}", s.suffix));
            if candidate.is_file() {
                return Some(Loader {
                    name: base_name.to_string(),
                    path: candidate,
                    kind: s.kind,
                    package_dir: None,
                });
            }
        }

        None
    }
}
