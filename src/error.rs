//! Error type shared by the archive builder, the extractor and the sources.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while creating, reading or extracting an archive.
#[derive(Debug, Error)]
pub enum Error {
    /// A filesystem operation on `path` failed.
    #[error("{}: {source}", path.display())]
    Fs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading or writing a byte stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The directory walk could not visit an entry.
    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    /// The archive is malformed or its data failed verification.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// The archive uses a feature this crate does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An entry name would resolve outside the destination root.
    #[error("unsafe entry name: {0:?}")]
    UnsafeEntryName(String),

    /// The archive handle was already closed.
    #[error("archive is closed")]
    Closed,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The remote server answered, but not in a usable way.
    #[error("remote source: {0}")]
    Remote(String),

    /// Several independent steps failed (e.g. finishing the writer and closing the file).
    #[error("{}", join_messages(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Fs {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArchive(msg.into())
    }

    /// The `io::ErrorKind` behind this error, if it came from the OS.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Fs { source, .. } => Some(source.kind()),
            Error::Io(e) => Some(e.kind()),
            Error::Walk(e) => e.io_error().map(io::Error::kind),
            Error::Multiple(errors) => errors.first().and_then(Error::io_kind),
            _ => None,
        }
    }

    /// Whether the error means a path did not exist.
    pub fn is_not_found(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::NotFound)
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
