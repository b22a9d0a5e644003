//! Error types for manifest parsing and dependency resolution.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Result alias used throughout this crate.
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Everything that can go wrong while parsing a manifest/config file or
/// resolving a parsed project against a platform/tag filter.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    /// The underlying XML tokenizer choked on malformed markup.
    #[error("failed to parse '{file}' at line {line}: {details}")]
    #[diagnostic(help("check the file is well-formed XML"))]
    XmlSyntax {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// Best-effort line number from the tokenizer.
        line: usize,
        /// Underlying message from the XML reader.
        details: String,
    },

    /// An element appeared that the current grammar doesn't know about.
    #[error("unexpected element <{element}> in '{file}' at line {line}")]
    #[diagnostic(help("the project grammar rejects unknown elements; check for a typo"))]
    UnknownElement {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// Best-effort line number.
        line: usize,
        /// The tag name that wasn't recognized.
        element: String,
    },

    /// An attribute appeared that the current element doesn't accept.
    #[error("unexpected attribute '{attribute}' on <{element}> in '{file}' at line {line}")]
    UnknownAttribute {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// Best-effort line number.
        line: usize,
        /// The enclosing element's tag name.
        element: String,
        /// The attribute name that wasn't recognized.
        attribute: String,
    },

    /// A required attribute was absent.
    #[error("<{element}> in '{file}' at line {line} is missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// Best-effort line number.
        line: usize,
        /// The enclosing element's tag name.
        element: String,
        /// The attribute that was required but absent.
        attribute: String,
    },

    /// An element showed up somewhere its parent requirement forbids.
    #[error("<{element}> in '{file}' at line {line} cannot appear outside <{expected_parent}>")]
    WrongParent {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// Best-effort line number.
        line: usize,
        /// The misplaced element's tag name.
        element: String,
        /// The parent element this element is only valid inside.
        expected_parent: String,
    },

    /// `$NAME` in an attribute value referenced an environment variable that
    /// isn't set in this process.
    #[error("attribute value in '{file}' references undefined environment variable '${var}'")]
    UndefinedEnvVar {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// The environment variable name that was referenced.
        var: String,
    },

    /// `${platform}` (or any other `${...}` token) in a resolved child's
    /// name/version/path referenced a variable this resolver doesn't know.
    #[error("unresolved variable '${var}' in resolved dependency '{dependency}'")]
    UnknownVariable {
        /// The dependency whose child contained the token.
        dependency: String,
        /// The variable name.
        var: String,
    },

    /// A remote name (e.g. `"mycompany"`) could not be matched to exactly
    /// one configured remote by namespace-suffix.
    #[error("remote '{name}' is not defined in any configuration file")]
    RemoteUndefined {
        /// The remote name as referenced by a dependency or the CLI.
        name: String,
    },

    /// A bare remote name matched more than one namespaced remote.
    #[error("remote '{name}' is ambiguous between: {}", candidates.join(", "))]
    RemoteAmbiguous {
        /// The remote name as referenced.
        name: String,
        /// The fully-namespaced candidates it could mean.
        candidates: Vec<String>,
    },

    /// A dependency name didn't match `[A-Za-z0-9_]+`, so it cannot be used
    /// to build the `PM_<DEP>_*` environment variable names.
    #[error("dependency name '{name}' in '{file}' is not a valid environment variable suffix")]
    InvalidDependencyName {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// The offending dependency name.
        name: String,
    },

    /// The same dependency name was declared twice in one project.
    #[error("duplicate dependency name '{name}' in '{file}'")]
    DuplicateDependency {
        /// Path to the offending file.
        file: Utf8PathBuf,
        /// The dependency name that repeated.
        name: String,
    },

    /// I/O failure reading the manifest/config file itself.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// `ManifestEditor` was asked to remove a dependency that isn't declared.
    #[error("dependency '{name}' is not declared in '{file}'")]
    DependencyNotFound {
        /// Path to the manifest.
        file: Utf8PathBuf,
        /// The dependency name that wasn't found.
        name: String,
    },

    /// `ManifestEditor::add_package` found a platform-equal `<package>`
    /// already present and `force` was not set.
    #[error("package already exists for dependency '{dependency}' on this platform set (use force to overwrite)")]
    AlreadyExists {
        /// The dependency the package would have been added to.
        dependency: String,
    },
}
