//! Filesystem error taxonomy
//!
//! Every failure surfaced by [`DriveFs`](super::DriveFs) is one of these,
//! carrying the path the caller asked about.

use crate::drive::DriveError;

/// Filesystem operation errors
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid path: {path} ({reason})")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Invalid open mode: {0}")]
    InvalidMode(String),

    #[error("Directory expected: {0}")]
    DirectoryExpected(String),

    #[error("File expected: {0}")]
    FileExpected(String),

    #[error("Directory exists: {0}")]
    DirectoryExists(String),

    #[error("Destination exists: {0}")]
    DestinationExists(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Resource invalid: {path} ({reason})")]
    ResourceInvalid { path: String, reason: String },

    #[error("No URL for {path} ({reason})")]
    NoUrl { path: String, reason: &'static str },

    #[error("Remote store unavailable for {path}")]
    RemoteUnavailable {
        path: String,
        #[source]
        source: DriveError,
    },

    /// A later step of a multi-step operation failed after earlier remote
    /// changes were applied; the store is left in the intermediate state.
    #[error("Operation on {path} partially applied: {step} failed")]
    PartiallyApplied {
        path: String,
        step: &'static str,
        #[source]
        source: DriveError,
    },

    #[error("Local buffer error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Map a remote failure on `path` into the taxonomy
    pub fn from_remote(path: &str, err: DriveError) -> Self {
        match err {
            DriveError::NotFound(_) => FsError::ResourceNotFound(path.to_string()),
            source => FsError::RemoteUnavailable {
                path: path.to_string(),
                source,
            },
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        FsError::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    pub(crate) fn invalid_resource(path: &str, reason: impl Into<String>) -> Self {
        FsError::ResourceInvalid {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Map to an appropriate libc errno
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::ResourceNotFound(_) => libc::ENOENT,
            FsError::InvalidPath { .. } | FsError::InvalidMode(_) => libc::EINVAL,
            FsError::DirectoryExpected(_) => libc::ENOTDIR,
            FsError::FileExpected(_) => libc::EISDIR,
            FsError::DirectoryExists(_) | FsError::DestinationExists(_) => libc::EEXIST,
            FsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            FsError::ResourceInvalid { .. } => libc::EPERM,
            FsError::NoUrl { .. } => libc::ENODATA,
            FsError::RemoteUnavailable { .. } | FsError::PartiallyApplied { .. } | FsError::Io(_) => {
                libc::EIO
            }
        }
    }
}

/// Convert into `std::io::Error` for the `Read`/`Write` stream impls
impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Io(e) => e,
            FsError::ResourceNotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            other => std::io::Error::other(other),
        }
    }
}
