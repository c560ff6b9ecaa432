use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::install::InstallFlags;
use crate::layout::ModuleLayout;

pub const FLAGS_ENV: &str = "QUICKRESOLVE_FLAGS";
pub const LAYOUT_ENV: &str = "QUICKRESOLVE_LAYOUT";
pub const PATH_ENV: &str = "QUICKRESOLVE_PATH";

pub fn resolve_install_flags(cli: &Cli) -> Result<InstallFlags> {
    install_flags_from(cli.flags.as_deref(), env::var(FLAGS_ENV).ok())
}

fn install_flags_from(cli_flags: Option<&str>, env_flags: Option<String>) -> Result<InstallFlags> {
    match cli_flags.map(str::to_string).or(env_flags) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid install flags: {raw:?}")),
        None => Ok(InstallFlags::default()),
    }
}

pub fn resolve_layout(cli: &Cli) -> Result<ModuleLayout> {
    if let Some(p) = cli.layout.as_deref() {
        return load_layout(p);
    }

    if let Ok(p) = env::var(LAYOUT_ENV) {
        return load_layout(Path::new(&p));
    }

    if let Some(p) = default_layout_path().filter(|p| p.exists()) {
        return load_layout(&p);
    }

    Ok(ModuleLayout::default())
}

pub fn resolve_search_path(cli: &Cli) -> Result<Vec<PathBuf>> {
    search_path_from(&cli.path, env::var_os(PATH_ENV))
}

fn search_path_from(cli_path: &[PathBuf], env_path: Option<std::ffi::OsString>) -> Result<Vec<PathBuf>> {
    if !cli_path.is_empty() {
        return Ok(cli_path.to_vec());
    }
    if let Some(raw) = env_path {
        return Ok(env::split_paths(&raw).collect());
    }
    anyhow::bail!("No search path given. Use --path DIR or set {PATH_ENV}")
}

pub fn default_layout_path() -> Option<PathBuf> {
    quickresolve_home().ok().map(|home| home.join("layout.json"))
}

fn quickresolve_home() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve config directory"))?;
    Ok(base.join("quickresolve"))
}

fn load_layout(path: &Path) -> Result<ModuleLayout> {
    ModuleLayout::load(path).with_context(|| format!("Failed to load layout: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_flags_win_over_environment() {
        let flags = install_flags_from(Some("noAutocache"), Some("off".to_string())).unwrap();
        assert!(flags.no_autocache);
        assert!(!flags.off);

        let flags = install_flags_from(None, Some("off".to_string())).unwrap();
        assert!(flags.off);

        assert_eq!(install_flags_from(None, None).unwrap(), InstallFlags::default());
        assert!(install_flags_from(Some("fast"), None).is_err());
    }

    #[test]
    fn search_path_prefers_cli_then_environment() {
        let cli_path = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(
            search_path_from(&cli_path, Some("/c".into())).unwrap(),
            cli_path
        );

        let joined = env::join_paths([Path::new("/c"), Path::new("/d")]).unwrap();
        assert_eq!(
            search_path_from(&[], Some(joined)).unwrap(),
            vec![PathBuf::from("/c"), PathBuf::from("/d")]
        );

        assert!(search_path_from(&[], None).is_err());
    }

    #[test]
    fn explicit_layout_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(
            &path,
            r#"{ "suffixes": [ { "suffix": ".mod", "kind": "source" } ], "init_stem": "index" }"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "quickresolve",
            "--layout",
            path.to_str().unwrap(),
            "stats",
        ]);
        let layout = resolve_layout(&cli).unwrap();
        assert_eq!(layout.init_stem, "index");
        assert_eq!(layout.suffixes.len(), 1);
    }

    #[test]
    fn broken_layout_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(&path, "not json").unwrap();

        let err = load_layout(&path).unwrap_err();
        assert!(format!("{err:#}").contains("layout.json"));
    }
}
