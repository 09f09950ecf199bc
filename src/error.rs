//! # Error Types
//!
//! Engine error kinds surfaced across the build and query phases.
//! Fallible paths return `anyhow::Result`; these variants carry the
//! cases callers are expected to branch on via `downcast_ref`.

use std::fmt;
use std::path::PathBuf;

/// Error kinds raised by the indexing and query pipelines.
#[derive(Debug)]
pub enum Error {
    /// A field directive failed to parse.
    DirectiveSyntax(String),
    /// The directive set contained zero alternatives.
    DirectiveEmpty,
    /// An expansion distance could not be represented.
    InvalidEditDistance(String),
    /// The cluster edge table exceeded its memory budget.
    ClusterOutOfMemory {
        needed_bytes: usize,
        budget_bytes: usize,
    },
    /// The underlying sorted store failed to open, write, or publish.
    IndexIo(String),
    /// A query referenced an index path that does not exist.
    MissingIndex(PathBuf),
    /// The build was cancelled before publishing.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DirectiveSyntax(message) => {
                write!(f, "directive syntax error: {}", message)
            }
            Error::DirectiveEmpty => write!(f, "directive set contains no alternatives"),
            Error::InvalidEditDistance(message) => {
                write!(f, "invalid edit distance: {}", message)
            }
            Error::ClusterOutOfMemory {
                needed_bytes,
                budget_bytes,
            } => write!(
                f,
                "cluster edge table needs {} bytes but the budget is {} bytes",
                needed_bytes, budget_bytes
            ),
            Error::IndexIo(message) => write!(f, "index store error: {}", message),
            Error::MissingIndex(path) => {
                write!(f, "index does not exist at {}", path.display())
            }
            Error::Cancelled => write!(f, "build cancelled"),
        }
    }
}

impl std::error::Error for Error {}
