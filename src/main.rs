use anyhow::Result;
use clap::Parser;
use quickresolve::analyze::analyze;
use quickresolve::archive::build_archive;
use quickresolve::cli::{Cli, Commands};
use quickresolve::config::{resolve_install_flags, resolve_layout, resolve_search_path};
use quickresolve::host::ModuleSystem;
use quickresolve::install::QuickResolve;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = parse_cli()?;
    init_tracing(cli.verbose);

    let layout = resolve_layout(&cli)?;

    match cli.command.clone() {
        Commands::Archive { archive } => {
            let system = ModuleSystem::with_layout(layout, resolve_search_path(&cli)?);
            let report = build_archive(&system, &QuickResolve::new(), archive)?;
            print_json(&report)?;
        }
        Commands::Analyze { dir, thorough } => {
            let analysis = analyze(&dir, thorough, &layout);
            print_json(&AnalyzeOutput {
                dir,
                thorough,
                relevant: analysis.relevant,
                listing: analysis.listing,
            })?;
        }
        Commands::Resolve { name } => {
            let system = ModuleSystem::with_layout(layout, resolve_search_path(&cli)?);
            let quick = QuickResolve::new();
            quick.install(&system, resolve_install_flags(&cli)?, None);
            let loader = system.resolve(&name)?;
            print_json(&loader)?;
        }
        Commands::Filter => {
            let system = ModuleSystem::with_layout(layout, resolve_search_path(&cli)?);
            let mut flags = resolve_install_flags(&cli)?;
            flags.filter_dirs = true;
            QuickResolve::new().install(&system, flags, None);
            print_json(&system.search_path())?;
        }
        Commands::Stats => {
            let system = ModuleSystem::with_layout(layout, resolve_search_path(&cli)?);
            let quick = QuickResolve::new();
            quick.install(&system, resolve_install_flags(&cli)?, None);
            print_json(&quick.stats())?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct AnalyzeOutput {
    dir: PathBuf,
    thorough: bool,
    relevant: bool,
    listing: Option<Vec<String>>,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "quickresolve=warn",
        1 => "quickresolve=info",
        _ => "quickresolve=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_cli() -> Result<Cli> {
    let args: Vec<String> = std::env::args().collect();
    Ok(Cli::parse_from(rewrite_args_for_implicit_archive(args)))
}

/// `quickresolve [options] [ARCHIVE]` means `quickresolve [options] archive [ARCHIVE]`.
fn rewrite_args_for_implicit_archive(mut args: Vec<String>) -> Vec<String> {
    let subcommands = ["archive", "analyze", "resolve", "filter", "stats", "help"];

    let mut idx = 1usize;
    while idx < args.len() {
        let a = args[idx].as_str();
        if a == "--" {
            idx += 1;
            break;
        }

        if a == "--path" || a == "--layout" || a == "--flags" {
            idx += 2;
            continue;
        }

        if a.starts_with('-') {
            idx += 1;
            continue;
        }

        break;
    }

    let explicit = args
        .get(idx)
        .is_some_and(|token| subcommands.contains(&token.as_str()));
    let asks_for_help_or_version = args[1.min(args.len())..]
        .iter()
        .any(|a| matches!(a.as_str(), "-h" | "--help" | "-V" | "--version"));
    if !explicit && !asks_for_help_or_version {
        args.insert(idx.min(args.len()), "archive".to_string());
    }

    args
}
