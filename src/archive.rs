//! Bundling top-level modules into a compressed archive.
//!
//! Loading many small modules from one archive is cheaper than locating each on a slow
//! filesystem. `build_archive` scans the search path once, keeps every top-level
//! module whose source is available and does not depend on its own location, and
//! writes the sources deflate-compressed together with a digest manifest.

use anyhow::{Context, Result};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::host::ModuleSystem;
use crate::install::QuickResolve;
use crate::layout::{ModuleLayout, is_identifier, normcase, normcase_path};

pub const MANIFEST_NAME: &str = "quickresolve-manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedModule {
    pub name: String,
    pub entry: String,
    pub source_path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OmitReason {
    Shadowed,
    Package,
    NoSource,
    Introspection,
}

#[derive(Debug, Clone, Serialize)]
pub struct OmittedModule {
    pub name: String,
    pub dir: String,
    pub reason: OmitReason,
}

#[derive(Debug, Serialize)]
pub struct ArchiveReport {
    pub archive: String,
    pub scanned_dirs: usize,
    pub modules: Vec<ArchivedModule>,
    pub omitted: Vec<OmittedModule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelUnit {
    pub name: String,
    pub is_package: bool,
}

/// Builds the archive at `archive`, or at the search-path entry named like the
/// layout's archive when not given. Uninstalls `quick` first so that the scan sees
/// the filesystem directly.
pub fn build_archive(
    system: &ModuleSystem,
    quick: &QuickResolve,
    archive: Option<PathBuf>,
) -> Result<ArchiveReport> {
    quick.uninstall(system);

    let layout = system.layout();
    let search_path = system.search_path();
    let archive = match archive {
        Some(p) => p,
        None => default_archive_path(&search_path, layout)?,
    };
    info!(archive = %archive.display(), "creating archive");
    let archive_key = real_path(&archive);

    let mut seen: HashSet<String> = HashSet::new();
    let mut selected: Vec<(ArchivedModule, String)> = Vec::new();
    let mut omitted = Vec::new();
    let mut scanned_dirs = 0usize;

    for dir in search_path.iter() {
        if real_path(dir) == archive_key {
            continue;
        }
        info!(dir = %dir.display(), "scanning directory");
        let units = match top_level_units(dir, layout) {
            Ok(units) => units,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot scan directory");
                continue;
            }
        };
        scanned_dirs += 1;

        let dir_label = dir.to_string_lossy().to_string();
        let mut omit = |name: &str, reason: OmitReason| {
            info!(name, ?reason, "omitting module");
            omitted.push(OmittedModule {
                name: name.to_string(),
                dir: dir_label.clone(),
                reason,
            });
        };

        for unit in units {
            if !seen.insert(unit.name.clone()) {
                omit(&unit.name, OmitReason::Shadowed);
                continue;
            }
            if unit.is_package {
                omit(&unit.name, OmitReason::Package);
                continue;
            }

            let Some(loader) = system.primitive().load_from_dir(dir, &unit.name) else {
                omit(&unit.name, OmitReason::NoSource);
                continue;
            };
            let source = match loader.source() {
                Ok(Some(source)) => source,
                Ok(None) => {
                    omit(&unit.name, OmitReason::NoSource);
                    continue;
                }
                Err(e) => {
                    warn!(name = %unit.name, error = %e, "cannot read source");
                    omit(&unit.name, OmitReason::NoSource);
                    continue;
                }
            };
            if layout
                .introspection_markers
                .iter()
                .any(|m| source.contains(m.as_str()))
            {
                omit(&unit.name, OmitReason::Introspection);
                continue;
            }

            let entry = loader
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| unit.name.clone());
            debug!(name = %unit.name, path = %loader.path.display(), "selecting module");
            selected.push((
                ArchivedModule {
                    name: unit.name.clone(),
                    entry,
                    source_path: loader.path.to_string_lossy().to_string(),
                    sha256: hash_content(&source),
                },
                source,
            ));
        }
    }

    remove_existing_archive(&archive)?;
    write_archive(&archive, &selected)?;
    info!(archive = %archive.display(), modules = selected.len(), "created archive");

    Ok(ArchiveReport {
        archive: archive.to_string_lossy().to_string(),
        scanned_dirs,
        modules: selected.into_iter().map(|(m, _)| m).collect(),
        omitted,
    })
}

/// Lists the loadable units directly inside `dir`, sorted by file name.
pub fn top_level_units(dir: &Path, layout: &ModuleLayout) -> std::io::Result<Vec<TopLevelUnit>> {
    let listing_dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let mut names: Vec<String> = std::fs::read_dir(listing_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut seen = HashSet::new();
    let mut units = Vec::new();
    for name in names {
        let path = listing_dir.join(&name);
        let unit = if path.is_dir() {
            if !is_identifier(&name) || !has_init_file(&path, layout) {
                continue;
            }
            TopLevelUnit {
                name,
                is_package: true,
            }
        } else {
            let Some((stem, _)) = layout.split_module_file(&name) else {
                continue;
            };
            if !is_identifier(stem) {
                continue;
            }
            TopLevelUnit {
                name: stem.to_string(),
                is_package: false,
            }
        };
        if seen.insert(unit.name.clone()) {
            units.push(unit);
        }
    }
    Ok(units)
}

/// Entry names of an archive, read through a memory map.
pub fn list_archive(archive_path: &Path) -> Result<Vec<String>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    // SAFETY: The file is opened read-only and outlives the map.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("Failed to mmap archive: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))
        .with_context(|| format!("Failed to read zip structure: {}", archive_path.display()))?;

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        names.push(entry.name().to_string());
    }
    Ok(names)
}

pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn default_archive_path(search_path: &[PathBuf], layout: &ModuleLayout) -> Result<PathBuf> {
    search_path
        .iter()
        .find(|p| {
            p.is_absolute()
                && p.file_name()
                    .is_some_and(|n| normcase(&n.to_string_lossy()) == layout.archive_name)
        })
        .cloned()
        .with_context(|| {
            format!(
                "Failed to find {} on the search path. Pass the archive path explicitly.",
                layout.archive_name
            )
        })
}

fn has_init_file(dir: &Path, layout: &ModuleLayout) -> bool {
    layout
        .init_file_names()
        .any(|(name, _)| dir.join(name).is_file())
}

fn real_path(path: &Path) -> PathBuf {
    normcase_path(&std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
}

fn remove_existing_archive(archive: &Path) -> Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(archive) else {
        return Ok(());
    };
    if !meta.is_file() {
        anyhow::bail!("Archive path must be a regular file: {}", archive.display());
    }
    warn!(archive = %archive.display(), "archive already exists, replacing it");
    std::fs::remove_file(archive)
        .with_context(|| format!("Failed to remove old archive: {}", archive.display()))
}

fn write_archive(archive: &Path, selected: &[(ArchivedModule, String)]) -> Result<()> {
    if let Some(parent) = archive.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let file = File::create(archive)
        .with_context(|| format!("Failed to create archive: {}", archive.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (module, source) in selected {
        zip.start_file(module.entry.as_str(), options)?;
        zip.write_all(source.as_bytes())?;
    }

    let manifest: Vec<&ArchivedModule> = selected.iter().map(|(m, _)| m).collect();
    zip.start_file(MANIFEST_NAME, options)?;
    zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::InstallFlags;
    use std::fs;
    use std::io::Read;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn top_level_units_lists_modules_and_packages() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("b.lua"), "");
        write(&dir.path().join("b.luac"), "");
        write(&dir.path().join("a.so"), "");
        write(&dir.path().join("pkg").join("init.lua"), "");
        write(&dir.path().join("data").join("x.txt"), "");
        write(&dir.path().join("not-an-id.lua"), "");
        write(&dir.path().join("README.md"), "");

        let units = top_level_units(dir.path(), &ModuleLayout::default()).unwrap();
        let names: Vec<(&str, bool)> = units
            .iter()
            .map(|u| (u.name.as_str(), u.is_package))
            .collect();
        assert_eq!(names, vec![("a", false), ("b", false), ("pkg", true)]);
    }

    #[test]
    fn build_archive_selects_first_plain_source_modules() -> Result<()> {
        let root = tempfile::tempdir()?;
        let first = root.path().join("first");
        let second = root.path().join("second");
        write(&first.join("a.lua"), "return 'first'");
        write(&first.join("where.lua"), "return debug.getinfo(1).source");
        write(&first.join("pkg").join("init.lua"), "return {}");
        write(&first.join("bin.luac"), "\x1bLua");
        write(&second.join("a.lua"), "return 'second'");
        write(&second.join("d.lua"), "return 'd'");
        let archive = root.path().join("out").join("bundle.zip");

        let system = ModuleSystem::with_layout(ModuleLayout::default(), vec![first.clone(), second.clone()]);
        let quick = QuickResolve::new();
        quick.install(&system, InstallFlags::default(), None);

        let report = build_archive(&system, &quick, Some(archive.clone()))?;
        assert!(!quick.is_installed());
        assert!(system.state().hooks.is_empty());
        assert_eq!(report.scanned_dirs, 2);

        let selected: Vec<&str> = report.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(selected, vec!["a", "d"]);
        assert_eq!(report.modules[0].source_path, first.join("a.lua").to_string_lossy());

        let reasons: Vec<(&str, OmitReason)> = report
            .omitted
            .iter()
            .map(|o| (o.name.as_str(), o.reason))
            .collect();
        assert!(reasons.contains(&("where", OmitReason::Introspection)));
        assert!(reasons.contains(&("pkg", OmitReason::Package)));
        assert!(reasons.contains(&("bin", OmitReason::NoSource)));
        assert!(reasons.contains(&("a", OmitReason::Shadowed)));

        let entries = list_archive(&archive)?;
        assert_eq!(entries, vec!["a.lua", "d.lua", MANIFEST_NAME]);

        let file = File::open(&archive)?;
        let mut zip = ZipArchive::new(file)?;
        let mut content = String::new();
        zip.by_name("a.lua")?.read_to_string(&mut content)?;
        assert_eq!(content, "return 'first'");

        let mut manifest = String::new();
        zip.by_name(MANIFEST_NAME)?.read_to_string(&mut manifest)?;
        let manifest: Vec<ArchivedModule> = serde_json::from_str(&manifest)?;
        assert_eq!(manifest[0].sha256, hash_content("return 'first'"));
        Ok(())
    }

    #[test]
    fn default_archive_comes_from_search_path_and_is_skipped() -> Result<()> {
        let root = tempfile::tempdir()?;
        let lib = root.path().join("lib");
        write(&lib.join("m.lua"), "return 1");
        let archive = root.path().join("modules.zip");
        write(&archive, "stale");

        let system = ModuleSystem::with_layout(ModuleLayout::default(), vec![archive.clone(), lib]);
        let report = build_archive(&system, &QuickResolve::new(), None)?;

        assert_eq!(report.archive, archive.to_string_lossy());
        assert_eq!(report.scanned_dirs, 1);
        assert_eq!(list_archive(&archive)?, vec!["m.lua", MANIFEST_NAME]);
        Ok(())
    }

    #[test]
    fn missing_default_archive_is_an_error() {
        let system = ModuleSystem::with_layout(ModuleLayout::default(), vec![PathBuf::from("/opt/lib")]);
        assert!(build_archive(&system, &QuickResolve::new(), None).is_err());
    }

    #[test]
    fn refuses_to_replace_a_directory() -> Result<()> {
        let root = tempfile::tempdir()?;
        let archive = root.path().join("modules.zip");
        fs::create_dir(&archive)?;

        let system = ModuleSystem::with_layout(ModuleLayout::default(), Vec::new());
        let err = build_archive(&system, &QuickResolve::new(), Some(archive)).unwrap_err();
        assert!(err.to_string().contains("regular file"));
        Ok(())
    }
}
