//! Directory relevance analysis.
//!
//! `analyze` lists a directory once and decides whether it could hold any unit of the
//! layout. Anything uncertain (relative paths, unreadable directories) is reported as
//! relevant: a wrong "irrelevant" verdict hides a real module, a wrong "relevant"
//! verdict only costs a few probes.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

use crate::layout::{ModuleLayout, is_identifier, normcase};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub relevant: bool,
    /// Raw entry names, `None` when the directory could not be listed.
    pub listing: Option<Vec<String>>,
}

impl Analysis {
    fn new(relevant: bool, listing: Option<Vec<String>>) -> Self {
        Self { relevant, listing }
    }
}

/// Classifies `dir`.
///
/// With `thorough` unset, any entry that looks like a bare identifier counts as a
/// possible package directory. With `thorough` set, identifiers are ignored and each
/// subdirectory is opened to look for an init file instead.
pub fn analyze(dir: &Path, thorough: bool, layout: &ModuleLayout) -> Analysis {
    if !dir.is_absolute() {
        return Analysis::new(true, None);
    }
    if !dir.is_dir() {
        return Analysis::new(false, None);
    }

    classify(dir, list_dir(dir), thorough, layout)
}

fn classify(
    dir: &Path,
    listing: Option<Vec<String>>,
    thorough: bool,
    layout: &ModuleLayout,
) -> Analysis {
    let Some(listing) = listing else {
        warn!(dir = %dir.display(), "directory is not readable, assuming it is relevant");
        return Analysis::new(true, None);
    };

    for name in listing.iter() {
        let normalized = normcase(name);
        if layout.has_module_suffix(&normalized) {
            return Analysis::new(true, Some(listing));
        }
        if !thorough && is_identifier(&normalized) {
            return Analysis::new(true, Some(listing));
        }
    }

    if thorough {
        for name in listing.iter() {
            let sub = dir.join(name);
            if !sub.is_dir() {
                continue;
            }
            let Some(entries) = list_dir(&sub) else {
                return Analysis::new(true, Some(listing));
            };
            let has_init = entries
                .iter()
                .any(|e| layout.is_init_file(&normcase(e)) && sub.join(e).is_file());
            if has_init {
                return Analysis::new(true, Some(listing));
            }
        }
    }

    Analysis::new(false, Some(listing))
}

fn list_dir(dir: &Path) -> Option<Vec<String>> {
    let entries = fs::read_dir(dir).ok()?;
    entry_names(entries.map(|entry| entry.map(|e| e.file_name())))
}

/// A listing with any unreadable entry is no listing at all.
fn entry_names<I>(entries: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = io::Result<OsString>>,
{
    let mut names = Vec::new();
    for name in entries {
        let name = name.ok()?;
        names.push(name.to_string_lossy().into_owned());
    }
    Some(names)
}
