use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "quickresolve")]
#[command(about = "Resolve modules against a search path without probing directories that cannot hold them")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Search path directory, in order. Repeat for more.
    #[arg(long = "path", value_name = "DIR")]
    pub path: Vec<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub layout: Option<PathBuf>,

    /// Install flags, e.g. "noAutocache filterDirs".
    #[arg(long, value_name = "FLAGS")]
    pub flags: Option<String>,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Bundle top-level modules of the search path into a compressed archive.
    Archive {
        #[arg(value_name = "ARCHIVE")]
        archive: Option<PathBuf>,
    },
    /// Report whether a directory could hold modules.
    Analyze {
        dir: PathBuf,

        #[arg(long)]
        thorough: bool,
    },
    /// Resolve a dotted module name through the directory cache.
    Resolve { name: String },
    /// Print the search path with irrelevant directories removed.
    Filter,
    /// Print directory cache statistics after installation.
    Stats,
}
