//! Error types for the transport abstraction and segmented downloader.

use miette::Diagnostic;
use thiserror::Error;

/// Result alias used throughout this crate.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Everything that can go wrong talking to a remote or running a
/// segmented download.
#[derive(Debug, Error, Diagnostic, Clone)]
pub enum TransportError {
    /// A `get`/`put`/`list` call failed mid-stream after the remote was
    /// reachable (corresponds to the spec's `TRANSPORT_IO`).
    #[error("I/O error talking to remote '{remote}': {details}")]
    Io {
        /// The namespaced remote name.
        remote: String,
        /// Underlying message.
        details: String,
    },

    /// The remote endpoint itself couldn't be reached at all
    /// (`TRANSPORT_UNREACHABLE`): DNS failure, connection refused, or every
    /// retry in the segmented downloader was exhausted.
    #[error("remote '{remote}' is unreachable: {details}")]
    Unreachable {
        /// The namespaced remote name.
        remote: String,
        /// Underlying message.
        details: String,
    },

    /// A capability (`put`/`list`) that a transport doesn't implement was
    /// invoked.
    #[error("remote '{remote}' does not support '{operation}'")]
    Unsupported {
        /// The namespaced remote name.
        remote: String,
        /// The capability that was requested.
        operation: &'static str,
    },

    /// A remote requires credentials and the configured environment
    /// variable wasn't set when it was first used.
    #[error("credentials for remote '{remote}' are missing: set {env_var}")]
    #[diagnostic(help(
        "export the environment variable this remote expects before retrying"
    ))]
    CredentialsMissing {
        /// The namespaced remote name.
        remote: String,
        /// The environment variable that was expected.
        env_var: String,
    },

    /// `put` without `force` found the object already present.
    #[error("object '{object}' already exists on remote '{remote}'")]
    FileExists {
        /// The namespaced remote name.
        remote: String,
        /// The object name that was occupied.
        object: String,
    },

    /// A URL template referenced a package-location template that wasn't
    /// configured, or the template itself failed to parse as a URL.
    #[error("invalid package-location URL for remote '{remote}': {details}")]
    InvalidUrl {
        /// The namespaced remote name.
        remote: String,
        /// Underlying message.
        details: String,
    },

    /// A GTL-like remote's API rejected a `put(public=true)` call outright;
    /// unlike [`TransportError::Unsupported`] the remote does support
    /// upload, just not a public one.
    #[error("remote '{remote}' rejects public uploads")]
    PublicUploadRejected {
        /// The namespaced remote name.
        remote: String,
    },
}

impl TransportError {
    /// True for the subset of errors a caller may reasonably retry (as
    /// opposed to a capability gap or a missing credential).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Io { .. } | TransportError::Unreachable { .. })
    }
}
