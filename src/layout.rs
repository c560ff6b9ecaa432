//! Module file layout recognized by the host.
//!
//! A layout names the suffixes that mark a file as a loadable unit, the stem of the
//! file that turns a directory into a package, and a few knobs used by the archive
//! builder. Everything the analyzer and the finders compare is run through
//! [`normcase`] first, so suffixes are stored already normalized.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Source,
    Compiled,
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suffix {
    pub suffix: String,
    pub kind: ModuleKind,
}

impl Suffix {
    pub fn new(suffix: &str, kind: ModuleKind) -> Self {
        Self {
            suffix: suffix.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleLayout {
    /// Recognized suffixes in probe order.
    pub suffixes: Vec<Suffix>,
    /// `<init_stem><suffix>` inside a directory makes it a package.
    pub init_stem: String,
    /// File name the archive builder looks for on the search path.
    pub archive_name: String,
    /// Source fragments that make a unit depend on its own location.
    pub introspection_markers: Vec<String>,
}

impl Default for ModuleLayout {
    fn default() -> Self {
        Self {
            suffixes: vec![
                Suffix::new(".lua", ModuleKind::Source),
                Suffix::new(".luac", ModuleKind::Compiled),
                Suffix::new(".so", ModuleKind::Native),
            ],
            init_stem: "init".to_string(),
            archive_name: "modules.zip".to_string(),
            introspection_markers: vec![
                "debug.getinfo".to_string(),
                "package.searchpath".to_string(),
            ],
        }
        .normalized()
    }
}

impl ModuleLayout {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading layout {}", path.display()), e))?;
        let layout: ModuleLayout =
            serde_json::from_str(&raw).map_err(|e| Error::LayoutInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        layout.validate(path)?;
        Ok(layout.normalized())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: &str| Error::LayoutInvalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.suffixes.is_empty() {
            return Err(invalid("at least one suffix is required"));
        }
        if self.suffixes.iter().any(|s| s.suffix.is_empty()) {
            return Err(invalid("suffixes must not be empty"));
        }
        if self.init_stem.is_empty() {
            return Err(invalid("init_stem must not be empty"));
        }
        Ok(())
    }

    pub fn normalized(mut self) -> Self {
        for s in self.suffixes.iter_mut() {
            s.suffix = normcase(&s.suffix).into_owned();
        }
        self.init_stem = normcase(&self.init_stem).into_owned();
        self.archive_name = normcase(&self.archive_name).into_owned();
        self
    }

    pub fn has_module_suffix(&self, normalized_name: &str) -> bool {
        self.suffixes
            .iter()
            .any(|s| normalized_name.ends_with(s.suffix.as_str()))
    }

    pub fn is_init_file(&self, normalized_name: &str) -> bool {
        normalized_name
            .strip_prefix(self.init_stem.as_str())
            .is_some_and(|rest| self.suffixes.iter().any(|s| s.suffix == rest))
    }

    pub fn init_file_names(&self) -> impl Iterator<Item = (String, ModuleKind)> + '_ {
        self.suffixes
            .iter()
            .map(|s| (format!("{}{}", self.init_stem, s.suffix), s.kind))
    }

    /// Splits `name` into module name and suffix, preferring the longest suffix.
    pub fn split_module_file<'a>(&self, name: &'a str) -> Option<(&'a str, &Suffix)> {
        let normalized = normcase(name);
        self.suffixes
            .iter()
            .filter(|s| normalized.ends_with(s.suffix.as_str()) && normalized.len() > s.suffix.len())
            .max_by_key(|s| s.suffix.len())
            .and_then(|s| name.get(..name.len() - s.suffix.len()).map(|stem| (stem, s)))
    }
}

/// Bare identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Case and separator folding for file names on case-insensitive platforms.
pub fn normcase(name: &str) -> Cow<'_, str> {
    if cfg!(windows) {
        Cow::Owned(name.to_lowercase().replace('/', "\\"))
    } else {
        Cow::Borrowed(name)
    }
}

pub fn normcase_path(path: &Path) -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(normcase(&path.to_string_lossy()).into_owned())
    } else {
        path.to_path_buf()
    }
}
