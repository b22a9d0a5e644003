//! All the clap stuff for parsing/documenting the cli.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// A dependency package manager for external binary artifacts.
#[derive(Parser, Clone, Debug)]
#[clap(version)]
#[clap(bin_name = "packrat")]
pub struct Cli {
    /// Subcommand to run.
    #[clap(subcommand)]
    pub command: Commands,

    /// Verbose logging (debug level).
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Quiet logging (errors only).
    #[clap(long, short = 'q', global = true)]
    pub quiet: bool,

    /// No logging at all.
    #[clap(long, short = 's', global = true)]
    pub silent: bool,

    /// Write the resolved PM_<DEP>_* / PM_PATHS environment surface to this
    /// file as shell-sourceable `KEY=VALUE` lines, one per line.
    #[clap(long, global = true)]
    pub var_path: Option<Utf8PathBuf>,
}

impl Cli {
    /// Resolves `-v`/`-q`/`-s` and `PM_VERBOSITY` into a single level,
    /// favoring the most restrictive flag actually passed.
    pub fn log_level(&self) -> LevelFilter {
        if self.silent {
            return LevelFilter::OFF;
        }
        if self.quiet {
            return LevelFilter::ERROR;
        }
        if self.verbose {
            return LevelFilter::DEBUG;
        }
        match std::env::var("PM_VERBOSITY").ok().as_deref() {
            Some("silent") => LevelFilter::OFF,
            Some("quiet") => LevelFilter::ERROR,
            Some("verbose") => LevelFilter::DEBUG,
            _ => LevelFilter::WARN,
        }
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Report OK/CORRUPT status of every installed package, optionally
    /// removing corrupt ones.
    Cache {
        /// Remove any package found corrupt.
        #[clap(long)]
        remove_corrupt: bool,
    },
    /// Print the canonical directory (or file) hash of PATH.
    Hash {
        /// File or directory to hash.
        path: Utf8PathBuf,
    },
    /// Print help for a topic, or general help.
    Help {
        /// Topic to print help for.
        topic: Option<String>,
    },
    /// Install a single package outside of any manifest.
    Install {
        /// Package base name.
        name: String,
        /// Package version; required unless a label is used instead.
        version: Option<String>,
        /// Materialize a directory symlink here after install.
        #[clap(short = 'l', long)]
        link: Option<Utf8PathBuf>,
        /// Seconds a dereferenced label stays valid locally.
        #[clap(long = "cacheExpiration")]
        cache_expiration: Option<u64>,
        /// Remotes to search, in order, ahead of the configured cascade.
        #[clap(short = 'r', long = "remote")]
        remotes: Vec<String>,
        /// Project manifest to resolve per-dependency remotes from.
        #[clap(short = 'p', long = "project-file", visible_short_alias = 'f')]
        project: Option<Utf8PathBuf>,
        /// Postscript to run after install.
        #[clap(short = 'P', long = "postscript", visible_short_alias = 's')]
        postscript: Option<String>,
    },
    /// Create a directory symlink (junction on Windows).
    Link {
        /// Path the link is created at.
        link_path: Utf8PathBuf,
        /// Directory the link points at.
        target: Utf8PathBuf,
    },
    /// List installed packages, optionally filtered by name prefix.
    List {
        /// Only list packages whose name starts with this prefix.
        prefix: Option<String>,
        /// Remotes to also list objects from.
        #[clap(short = 'r', long = "remote")]
        remotes: Vec<String>,
    },
    /// Copy every package a project resolves to onto another remote.
    Mirror {
        /// Project manifest to resolve dependencies from.
        project: Utf8PathBuf,
        /// Remote to mirror packages onto.
        remote: String,
        /// Platforms to resolve for; the unqualified platform if none given.
        #[clap(short = 'p', long = "platform")]
        platforms: Vec<String>,
        /// Don't ask for confirmation before copying each package.
        #[clap(short = 'y', long)]
        yes: bool,
    },
    /// Pack a folder into a `.7z`/`.zip` archive.
    Pack {
        /// Folder to pack.
        input: Utf8PathBuf,
        /// Archive base name; defaults to the input folder's name.
        #[clap(short = 'n', long)]
        name: Option<String>,
        /// Output directory; defaults to the current directory.
        #[clap(short = 'o', long)]
        out: Option<Utf8PathBuf>,
    },
    /// Create or edit a project manifest.
    Project {
        #[clap(subcommand)]
        action: ProjectAction,
    },
    /// Pack a folder and push the result to one or more remotes.
    Publish {
        /// Folder to pack and publish.
        input: Utf8PathBuf,
        /// Archive base name; defaults to the input folder's name.
        #[clap(short = 'n', long)]
        name: Option<String>,
        /// Remotes to push to.
        #[clap(short = 'r', long = "remote")]
        remotes: Vec<String>,
        /// Overwrite an existing object on the remote.
        #[clap(short = 'f', long)]
        force: bool,
        /// Mark the uploaded object as publicly readable.
        #[clap(long = "make-public", visible_alias = "mp")]
        make_public: bool,
    },
    /// Resolve and fetch every dependency in a project manifest.
    Pull {
        /// Project manifest to resolve.
        project: Utf8PathBuf,
        /// Platform to resolve for; omit for the unqualified platform.
        #[clap(short = 'p', long)]
        platform: Option<String>,
        /// Only resolve dependencies carrying one of these tags.
        #[clap(short = 'i', long = "include-tag")]
        include_tags: Vec<String>,
        /// Skip dependencies carrying one of these tags.
        #[clap(short = 'e', long = "exclude-tag")]
        exclude_tags: Vec<String>,
        /// Remotes to search, in order, ahead of the project's own cascade.
        #[clap(short = 'r', long = "remote")]
        remotes: Vec<String>,
        /// Postscript to run once every dependency is fulfilled.
        #[clap(long = "postscript", visible_alias = "ps")]
        postscript: Option<String>,
    },
    /// Push an already-built archive to one or more remotes.
    Push {
        /// Archive to push.
        path: Utf8PathBuf,
        /// Remotes to push to.
        #[clap(short = 'r', long = "remote")]
        remotes: Vec<String>,
        /// Object name to use on the remote; defaults to the file name.
        #[clap(long = "remote-path", visible_alias = "rp")]
        remote_path: Option<String>,
        /// Overwrite an existing object on the remote.
        #[clap(short = 'f', long)]
        force: bool,
        /// Mark the uploaded object as publicly readable.
        #[clap(long = "make-public", visible_alias = "mp")]
        make_public: bool,
    },
    /// List every configured remote.
    Remotes,
    /// Run a named dependency's installed executable.
    Run {
        /// Dependency name (resolved against `deps.packman.xml` in the
        /// current directory).
        name: String,
        /// Arguments to pass through.
        args: Vec<String>,
    },
    /// Remove a directory link created by `link` or by a pulled dependency.
    Unlink {
        /// Link path to remove.
        path: Utf8PathBuf,
    },
    /// Self-update this tool.
    Update {
        /// Specific version to update to; defaults to the latest release.
        version: Option<String>,
        /// Update even if already on the target version.
        #[clap(short = 'f', long)]
        force: bool,
        /// Don't ask for confirmation.
        #[clap(short = 'y', long)]
        yes: bool,
    },
    /// Verify every installed dependency a project resolves to.
    Verify {
        /// Project manifest to resolve.
        project: Utf8PathBuf,
        /// Platform to resolve for; omit for the unqualified platform.
        #[clap(short = 'p', long)]
        platform: Option<String>,
        /// Remotes to search when an entry is missing and needs re-fetching.
        #[clap(short = 'r', long = "remote")]
        remotes: Vec<String>,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum ProjectAction {
    /// Create an empty project manifest.
    Create {
        /// Path to write the new manifest to.
        path: Utf8PathBuf,
    },
    /// Add a package dependency to a project manifest.
    DependencyAdd {
        /// Project manifest to edit.
        project: Utf8PathBuf,
        /// Dependency name.
        name: String,
        /// Package base name.
        package_name: String,
        /// Package version.
        version: String,
        /// Platform glob patterns this package applies to.
        #[clap(short = 'p', long = "platform")]
        platforms: Vec<String>,
        /// Overwrite a platform-equal package already declared.
        #[clap(short = 'f', long)]
        force: bool,
    },
    /// Remove a dependency from a project manifest.
    DependencyRemove {
        /// Project manifest to edit.
        project: Utf8PathBuf,
        /// Dependency name.
        name: String,
    },
}
