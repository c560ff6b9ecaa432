//! # quickresolve
//!
//! Speeds up module resolution against a directory search path by skipping filesystem
//! probes that are certain to fail. Each search-path directory is listed once; after
//! that, "could `name` live here" is answered from memory and only real candidates
//! reach the load primitive.
//!
//! ## Architecture
//!
//! - **analyze**: directory relevance analysis (one listing per directory)
//! - **cache**: the directory content cache shared by all finders
//! - **finder**: cache-backed finder, the inert null finder, and their factory
//! - **install**: wiring the factory into a module system and tearing it down
//! - **host**: reference module system (search path, hook chain, bindings)
//! - **probe**: the filesystem load primitive and located units
//! - **layout**: recognized suffixes, package init files, name normalization
//! - **archive**: bundling top-level modules into a compressed archive
//! - **config** / **cli**: configuration resolution and command-line arguments
//!
//! Directories are assumed not to change while the process runs. A cached listing
//! is never re-validated; see [`install::QuickResolve::invalidate`] for the explicit
//! way to forget one.

pub mod analyze;
pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod finder;
pub mod host;
pub mod install;
pub mod layout;
pub mod probe;

pub use error::{Error, Result};
pub use finder::{CachePolicy, Finder, NullFinder};
pub use host::{ModuleSystem, Resolution};
pub use install::{InstallFlags, QuickResolve};
