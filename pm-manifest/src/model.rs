//! In-memory representation of a parsed project/config manifest.

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;

/// The namespace a remote or config value originated from, in increasing
/// merge priority: a project-local manifest, the user's home-directory
/// config, then the install-scope config named by `PM_INSTALL_PATH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Namespace {
    /// Declared inline in the project manifest being resolved.
    Project,
    /// Declared in the user-scope `config.packman.xml`.
    User,
    /// Declared in the install-scope config file.
    Packman,
}

impl Namespace {
    /// The string used when building a remote's namespaced name.
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Project => "project",
            Namespace::User => "user",
            Namespace::Packman => "packman",
        }
    }
}

/// One of the four transport kinds a `<remote>` element can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    /// A remote resolved over a GTL-style RPC.
    Gtl,
    /// An S3-compatible object store.
    S3,
    /// Plain HTTP.
    Http,
    /// HTTPS (same transport as HTTP, different default scheme).
    Https,
}

impl RemoteKind {
    /// Parse the `type` attribute of a `<remote>` element.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gtl" => Some(Self::Gtl),
            "s3" => Some(Self::S3),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

/// Credentials declared on a `<credentials>` child of a `<remote>`.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Environment variable name holding the access id.
    pub id: String,
    /// Environment variable name holding the secret key.
    pub key: String,
    /// Optional URL to redirect a user to when credentials fail (S3 only).
    pub error_url: Option<String>,
}

/// A named, typed storage endpoint.
#[derive(Debug, Clone)]
pub struct Remote {
    /// The namespace this remote was declared under.
    pub namespace: Namespace,
    /// The local (un-namespaced) name, as declared.
    pub local_name: String,
    /// Transport kind.
    pub kind: RemoteKind,
    /// Package-location URL template; required for all non-GTL kinds.
    pub location_template: Option<String>,
    /// Credentials, if declared.
    pub credentials: Option<Credentials>,
    /// Error-redirect URL, if declared directly on the remote (GTL/S3).
    pub error_url: Option<String>,
}

impl Remote {
    /// The fully namespaced name, e.g. `"project:mycompany"`.
    pub fn namespaced_name(&self) -> String {
        format!("{}:{}", self.namespace.as_str(), self.local_name)
    }
}

/// A platform-qualified child of a `<package>`/`<source>`/`<label>` element:
/// the `platforms` attribute is a space-separated list of glob patterns
/// (`*`/`?`); an element with no `platforms` attribute is "unqualified".
#[derive(Debug, Clone, Default)]
pub struct PlatformSet {
    /// The raw space-separated patterns, in declaration order. Empty means
    /// "unqualified" (matches only a null platform request).
    pub patterns: Vec<String>,
}

impl PlatformSet {
    /// True if no `platforms` attribute was present at all.
    pub fn is_unqualified(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// A concrete package reference: a name/version pair plus optional
/// per-dependency remote override list.
#[derive(Debug, Clone)]
pub struct Package {
    /// Base name, before `${platform}` substitution.
    pub name: String,
    /// Version string, before `${platform}` substitution.
    pub version: String,
    /// Platform qualifier.
    pub platforms: PlatformSet,
    /// Remotes to search before the project-wide cascade, in order.
    pub remotes: Vec<String>,
}

/// A reference to a pre-existing local directory, bypassing the cache.
#[derive(Debug, Clone)]
pub struct Source {
    /// Path, resolved relative to the manifest file's directory unless
    /// already absolute.
    pub path: Utf8PathBuf,
    /// Platform qualifier.
    pub platforms: PlatformSet,
}

/// An indirection that dereferences, at resolve time, to a `base@version`
/// token.
#[derive(Debug, Clone)]
pub struct Label {
    /// The label's name, used as the local cache filename (`<name>.txt`)
    /// and the remote object name.
    pub name: String,
    /// Platform qualifier.
    pub platforms: PlatformSet,
    /// Remotes to search before the project-wide cascade, in order.
    pub remotes: Vec<String>,
    /// How long (in seconds) a local cached label body remains valid.
    pub cache_expiration: u64,
}

/// One of the three concrete child kinds a `<dependency>` can declare.
#[derive(Debug, Clone)]
pub enum DependencyChild {
    /// A direct package reference.
    Package(Package),
    /// A local filesystem path.
    Source(Source),
    /// An indirection through a label.
    Label(Label),
}

impl DependencyChild {
    /// The `platforms` qualifier shared by all three child kinds.
    pub fn platforms(&self) -> &PlatformSet {
        match self {
            DependencyChild::Package(p) => &p.platforms,
            DependencyChild::Source(s) => &s.platforms,
            DependencyChild::Label(l) => &l.platforms,
        }
    }
}

/// A named entry in a manifest, with zero or more platform-qualified
/// children of which exactly one is selected during resolution.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// The dependency's name; must match `[A-Za-z0-9_]+`.
    pub name: String,
    /// Where to materialize a directory symlink, if any.
    pub link_path: Option<Utf8PathBuf>,
    /// Where to materialize a directory copy, if any. If both `link_path`
    /// and `copy_path` are set, `link_path` wins (see DESIGN.md Open
    /// Question #1).
    pub copy_path: Option<Utf8PathBuf>,
    /// Declared tags, if any. `None` means "no `tags` attribute at all",
    /// which is distinct from an attribute that happened to produce an
    /// empty set.
    pub tags: Option<BTreeSet<String>>,
    /// All declared children, in declaration order.
    pub children: Vec<DependencyChild>,
}

/// Cache-wide policy, overridable by either config file.
#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    /// When a label is updated and previously pointed at an installed
    /// package, remove that package once the new label commits.
    pub remove_previous_package_on_label_update: Option<bool>,
}

/// A fully parsed project manifest (root `<project>` element).
#[derive(Debug, Clone)]
pub struct Project {
    /// Declared tools-version string, e.g. `"6.0"`.
    pub tools_version: String,
    /// Default remote cascade declared on the root element (space
    /// separated bare or namespaced names), in order.
    pub default_remotes: Vec<String>,
    /// All remotes declared in this file, keyed by namespaced name.
    pub remotes: BTreeMap<String, Remote>,
    /// All dependencies declared in this file, keyed by name, in
    /// declaration order (insertion order is preserved by using a `Vec` of
    /// names alongside the map -- see `dependency_order`).
    pub dependencies: BTreeMap<String, Dependency>,
    /// Declaration order of `dependencies`' keys; resolution and the
    /// fulfillment engine must walk dependencies in this order.
    pub dependency_order: Vec<String>,
    /// Path this project was parsed from, kept for relative-path
    /// resolution and diagnostics.
    pub source_path: Utf8PathBuf,
}

/// A fully parsed config file (root `<config>` element).
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Default remote cascade declared on the root element.
    pub default_remotes: Vec<String>,
    /// All remotes declared in this file, keyed by namespaced name.
    pub remotes: BTreeMap<String, Remote>,
    /// Cache policy, if a `<cache>` element was present.
    pub cache_policy: CachePolicy,
}
