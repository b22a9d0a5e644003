//! Error types for the package cache, archive driver, and link manager.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Result alias used throughout this crate.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything that can go wrong laying out, installing, verifying, or
/// linking a cached package.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Passed through from std::io::Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Passed through from pm-process.
    #[error(transparent)]
    Process(#[from] pm_process::ProcessError),

    /// Passed through from Camino.
    #[error(transparent)]
    CaminoPathBuf(#[from] camino::FromPathBufError),

    /// Passed through from the zip crate.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// `install_path` exists and contains the install sentinel, but the
    /// recomputed directory hash doesn't match the body recorded in it.
    #[error("package at '{path}' is corrupt: sentinel recorded {expected}, recomputed {actual}")]
    Corrupt {
        /// The install path that failed verification.
        path: Utf8PathBuf,
        /// The hash recorded in `.packman.sha1`.
        expected: String,
        /// The hash just recomputed.
        actual: String,
    },

    /// Neither `.7z` nor `.zip` extraction succeeded for this archive.
    #[error("unrecognized archive extension for '{path}'")]
    UnknownArchiveFormat {
        /// The archive path whose extension wasn't `.7z` or `.zip`.
        path: Utf8PathBuf,
    },

    /// The `7za` tool couldn't be located.
    #[error("unable to locate a 7-Zip executable")]
    #[diagnostic(help(
        "set PM_7za_PATH to the full path of a 7za/7z binary, or install one on PATH"
    ))]
    SevenZipNotFound,

    /// `7za` exited with a non-zero status while packing or unpacking.
    #[error("7-Zip exited with status {status:?}\n{stderr}")]
    SevenZipFailed {
        /// The process exit status, if the process terminated normally.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// A requested path to create a link at is occupied by something that
    /// isn't a link this crate manages.
    #[error("'{path}' exists and is not a link this tool can manage")]
    LinkBlocked {
        /// The path that was requested as a link location.
        path: Utf8PathBuf,
    },

    /// `LinkManager::read` was asked to read a path that isn't a link.
    #[error("'{path}' is not a directory link")]
    NotALink {
        /// The path that was expected to be a link.
        path: Utf8PathBuf,
    },
}
