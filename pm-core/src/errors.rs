//! The top-level error enum aggregating every collaborator crate's error
//! type, plus the failure modes that only make sense at the orchestration
//! layer (remote cascade exhaustion, link materialization conflicts,
//! postscript/script failures).

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Result alias used throughout this crate and re-exported for the CLI.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Every error kind described in the error handling design, gathered under
/// one discriminated type so the CLI binary has a single place to map
/// kinds to exit codes and remediation text.
#[derive(Debug, Error, Diagnostic)]
pub enum CoreError {
    /// Passed through from manifest parsing/resolution.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] pm_manifest::ManifestError),

    /// Passed through from the cache/archive/link store.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] pm_store::StoreError),

    /// Passed through from a transport backend or the segmented downloader.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Transport(#[from] pm_transport::TransportError),

    /// Passed through from subprocess invocation (archive tool, postscript).
    #[error(transparent)]
    Process(#[from] pm_process::ProcessError),

    /// Passed through from the self-updater.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Updater(#[from] pm_updater::UpdaterError),

    /// Passed through from std::io::Error for ambient filesystem/env work
    /// that doesn't belong to a single collaborator (config loading,
    /// postscript path checks).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A dependency's remote cascade (per-child remotes plus the project
    /// cascade) was empty when a fetch was needed.
    #[error("dependency '{dependency}' has no remotes configured to fetch from")]
    #[diagnostic(help("add a <remote> to the project or a config.packman.xml"))]
    NoRemoteConfigured {
        /// The dependency that needed a remote.
        dependency: String,
    },

    /// No remote in the searched cascade had the object.
    #[error("package '{base}@{version}' was not found on any of: {}", searched.join(", "))]
    PackageNotFound {
        /// The package base name.
        base: String,
        /// The package version.
        version: String,
        /// The namespaced remote names that were searched, in order.
        searched: Vec<String>,
    },

    /// No remote had the label file and no usable local fallback existed.
    #[error("label '{name}' was not found on any of: {}", searched.join(", "))]
    LabelNotFound {
        /// The label name.
        name: String,
        /// The namespaced remote names that were searched, in order.
        searched: Vec<String>,
    },

    /// A dereferenced label's body didn't contain an `@` separator.
    #[error("label '{name}' dereferenced to a malformed token '{token}' (expected 'base@version')")]
    LabelMalformed {
        /// The label name.
        name: String,
        /// The raw body that failed to parse.
        token: String,
    },

    /// A needed credential environment variable was unset when a remote was
    /// first consulted.
    #[error("credentials for remote '{remote}' are missing: set {env_var}")]
    #[diagnostic(help("export the environment variable this remote's <credentials> element names"))]
    CredentialsMissing {
        /// The namespaced remote name.
        remote: String,
        /// The environment variable that was expected.
        env_var: String,
    },

    /// `push`/`publish` without `force` found the object already present.
    #[error("'{object}' already exists on remote '{remote}' (use --force to overwrite)")]
    FileExists {
        /// The namespaced remote name.
        remote: String,
        /// The object name that was occupied.
        object: String,
    },

    /// A postscript exited non-zero; the CLI propagates this exit code
    /// verbatim rather than mapping it to 1.
    #[error("postscript '{path}' exited with status {code}")]
    ScriptFailure {
        /// The postscript path that was run.
        path: Utf8PathBuf,
        /// Its exit code.
        code: i32,
    },

    /// A referenced postscript file doesn't exist.
    #[error("postscript '{path}' does not exist")]
    ScriptNotFound {
        /// The missing path.
        path: Utf8PathBuf,
    },

    /// A postscript `ENV{X}` token referenced a variable that isn't set.
    #[error("postscript references undefined environment variable '{var}'")]
    UndefinedPostscriptVar {
        /// The variable name.
        var: String,
    },

    /// A required environment variable for this operation was absent.
    #[error("required environment variable '{var}' is not set")]
    #[diagnostic(help("export {var} before running this command"))]
    MissingEnvVar {
        /// The variable name.
        var: String,
    },

    /// A bare remote name referenced by the CLI or a manifest could not be
    /// resolved to a known namespaced remote.
    #[error("remote '{name}' is not defined")]
    RemoteUndefined {
        /// The remote name as referenced.
        name: String,
    },

    /// A `--remote` / mirror target doesn't support the capability this
    /// operation needs (e.g. `put` on a read-only HTTP mirror).
    #[error("remote '{remote}' cannot be used for '{operation}'")]
    UnsupportedRemoteOperation {
        /// The namespaced remote name.
        remote: String,
        /// The capability that was requested.
        operation: &'static str,
    },

    /// Anything else: internal invariant violations that shouldn't be
    /// reachable through normal use.
    #[error("internal error: {0}")]
    Internal(String),
}
