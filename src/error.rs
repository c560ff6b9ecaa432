//! Error types for quickresolve.
//!
//! Library operations return `quickresolve::Result<T>`. The binary and the archive
//! builder wrap these in `anyhow` with context.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No directory on the search path provides the unit.
    #[error("no module named {name:?}")]
    NotFound { name: String },

    /// A finder was asked about a directory that has no cache entry and may not get one.
    #[error("cannot resolve {name:?}: finder for {} is out of sync with the cache: {reason}", dir.display())]
    Misconfigured {
        name: String,
        dir: PathBuf,
        reason: String,
    },

    /// A finder factory refused to serve a directory.
    #[error("cannot serve {}: {reason}", dir.display())]
    Declined { dir: PathBuf, reason: String },

    #[error("unknown install flag {0:?} (expected off, noCache, noAutocache or filterDirs)")]
    UnknownFlag(String),

    #[error("invalid module layout at {}: {reason}", path.display())]
    LayoutInvalid { path: PathBuf, reason: String },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn declined(dir: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Declined {
            dir: dir.into(),
            reason: reason.into(),
        }
    }

    /// True for the ordinary "not there" outcome, as opposed to a real failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
