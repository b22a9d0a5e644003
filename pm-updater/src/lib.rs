#![deny(missing_docs)]

//! Self-updater for the packman CLI.
//!
//! Downloads the release archive for the running platform from the
//! configured release source (currently GitHub Releases) and replaces the
//! files under an install prefix in place, using the same backup-rename/
//! extract/rollback protocol regardless of platform. `config.packman.xml`
//! is never touched by this process; it's user configuration, not a
//! shipped file.

pub mod errors;
mod receipt;
mod release;
pub mod test;

pub use errors::*;
pub use release::*;

use std::env::{self, args};

use camino::{Utf8Path, Utf8PathBuf};
pub use semver::Version;

use pm_store::ArchiveDriver;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Version number for this release of pm-updater.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The install receipt's config file is never replaced or rolled back.
const EXCLUDED_FILE: &str = "config.packman.xml";

/// Provides information about the result of the upgrade operation
pub struct UpdateResult {
    /// The old version (pre-upgrade)
    pub old_version: Option<Version>,
    /// The new version (post-upgrade)
    pub new_version: Version,
    /// The tag the new version was created from
    pub new_version_tag: String,
    /// The root that the new version was installed to
    pub install_prefix: Utf8PathBuf,
}

/// Used to specify what version to upgrade to
#[derive(Clone)]
pub enum UpdateRequest {
    /// Always update to the latest
    Latest,
    /// Always update to the latest, allow prereleases
    LatestMaybePrerelease,
    /// Upgrade (or downgrade) to this specific version
    SpecificVersion(String),
    /// Upgrade (or downgrade) to this specific tag
    SpecificTag(String),
}

#[derive(Default)]
pub(crate) struct AuthorizationTokens {
    github: Option<String>,
    #[allow(dead_code)]
    gtl: Option<String>,
}

/// Tool used to produce this install receipt
#[derive(Clone)]
pub struct Provider {
    /// The name of the tool used to create this receipt
    pub source: String,
    /// The version of the above tool
    pub version: Version,
}

/// Struct representing an updater process
pub struct SelfUpdater {
    /// The name of the program to update, if specified
    pub name: Option<String>,
    /// Information about where updates should be fetched from
    pub source: Option<ReleaseSource>,
    /// What version should be updated to
    version_specifier: UpdateRequest,
    /// Information about the latest release; used to determine if an update is needed
    requested_release: Option<Release>,
    /// The current version number
    current_version: Option<Version>,
    /// Version of pm-updater (or a predecessor tool) that installed the current version
    current_version_installed_by: Option<Provider>,
    /// Information about the install prefix of the previous version
    install_prefix: Option<Utf8PathBuf>,
    /// A token to use to query releases from GitHub. If not supplied,
    /// the updater will perform unauthorized requests.
    tokens: AuthorizationTokens,
    /// When set to true, skips performing version checks and always assumes
    /// the software is out of date.
    always_update: bool,
    /// Whether to modify the system path when installing
    modify_path: bool,
}

impl Default for SelfUpdater {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfUpdater {
    /// Creates a new, empty updater. This struct lacks information
    /// necessary to perform the update, so at least the name and source fields
    /// will need to be filled in before the update can run.
    pub fn new() -> SelfUpdater {
        SelfUpdater {
            name: None,
            source: None,
            version_specifier: UpdateRequest::Latest,
            requested_release: None,
            current_version: None,
            current_version_installed_by: None,
            install_prefix: None,
            tokens: AuthorizationTokens::default(),
            always_update: false,
            modify_path: true,
        }
    }

    /// Creates a new updater with an explicitly-specified name.
    pub fn new_for(app_name: &str) -> SelfUpdater {
        let mut updater = SelfUpdater::new();
        updater.name = Some(app_name.to_owned());
        updater
    }

    /// Creates a new updater by attempting to autodetect the name
    /// of the current executable. This is only meant to be used by standalone
    /// updaters, not when this crate is used as a library in another program.
    pub fn new_for_updater_executable() -> UpdaterResult<SelfUpdater> {
        let Some(app_name) = get_app_name() else {
            return Err(UpdaterError::NoAppName {});
        };

        // Happens if the binary didn't get renamed properly
        if app_name == "pm-updater" {
            return Err(UpdaterError::UpdateSelf {});
        };

        Ok(SelfUpdater::new_for(&app_name))
    }

    /// Explicitly configures the release source as an alternative to
    /// reading it from the install receipt. This can be useful for tasks
    /// which want to query the new version without actually performing an
    /// upgrade.
    pub fn set_release_source(&mut self, source: ReleaseSource) -> &mut SelfUpdater {
        self.source = Some(source);
        self
    }

    /// Explicitly specifies the current version.
    pub fn set_current_version(&mut self, version: Version) -> UpdaterResult<&mut SelfUpdater> {
        self.current_version = Some(version);
        Ok(self)
    }

    /// Changes this updater's name to `app_name`, regardless of what it was
    /// initialized as and regardless of what was read from the receipt.
    pub fn set_name(&mut self, app_name: &str) -> &mut SelfUpdater {
        self.name = Some(app_name.to_owned());
        if let Some(source) = &self.source {
            let mut our_source = source.clone();
            our_source.app_name = app_name.to_owned();
            self.source = Some(our_source);
        }
        self
    }

    /// Configures the install path to use. This is only needed
    /// if installing without an explicit install prefix.
    pub fn set_install_dir(&mut self, path: impl Into<Utf8PathBuf>) -> &mut SelfUpdater {
        self.install_prefix = Some(path.into());
        self
    }

    /// Configures the updater's update strategy, replacing whatever was
    /// previously configured with the strategy in `version_specifier`.
    pub fn configure_version_specifier(
        &mut self,
        version_specifier: UpdateRequest,
    ) -> &mut SelfUpdater {
        self.version_specifier = version_specifier;
        self
    }

    /// Always upgrade, including when already running the latest version or when the current version isn't known
    pub fn always_update(&mut self, setting: bool) -> &mut SelfUpdater {
        self.always_update = setting;
        self
    }

    /// Determines if an update is needed by querying the newest version from
    /// the location specified in `source`.
    /// This includes a blocking network call, so it may be slow.
    /// This can only be performed if the `current_version` field has been
    /// set, either by loading the install receipt or by specifying it using
    /// `set_current_version`.
    /// Note that this also checks to see if the current executable is
    /// *eligible* for updates, by checking to see if it's the executable
    /// that the install receipt is for. In the case that the executable comes
    /// from a different source, it will return before the network call for a
    /// new version.
    pub async fn is_update_needed(&mut self) -> UpdaterResult<bool> {
        if self.always_update {
            return Ok(true);
        }

        if !self.check_receipt_is_for_this_executable()? {
            return Ok(false);
        }

        let Some(current_version) = self.current_version.to_owned() else {
            return Err(UpdaterError::NotConfigured {
                missing_field: "current_version".to_owned(),
            });
        };

        let release = match &self.requested_release {
            Some(r) => r,
            None => {
                self.fetch_release().await?;
                self.requested_release.as_ref().unwrap()
            }
        };

        // If we're doing "latest" semantics we need to check cur < new
        // If we're doing "specific" semantics we need to check cur != new
        let conclusion = match self.version_specifier {
            UpdateRequest::Latest | UpdateRequest::LatestMaybePrerelease => {
                current_version < release.version
            }
            UpdateRequest::SpecificVersion(_) | UpdateRequest::SpecificTag(_) => {
                current_version != release.version
            }
        };
        Ok(conclusion)
    }

    #[cfg(feature = "blocking")]
    /// Identical to [`SelfUpdater::is_update_needed`], but performed synchronously.
    pub fn is_update_needed_sync(&mut self) -> UpdaterResult<bool> {
        blocking_runtime().block_on(self.is_update_needed())
    }

    /// Returns the root of the install prefix, stripping the final `/bin`
    /// component if necessary. Works around a bug introduced in packrat
    /// (carried over into early releases of this tool) where this field was
    /// returned inconsistently in receipts for a few versions.
    pub fn install_prefix_root(&self) -> UpdaterResult<Utf8PathBuf> {
        let Some(install_prefix) = &self.install_prefix else {
            return Err(UpdaterError::NotConfigured {
                missing_field: "install_prefix".to_owned(),
            });
        };

        let mut install_root = install_prefix.to_owned();
        if let Some(provider) = &self.current_version_installed_by {
            let min = Version::parse("0.10.0-prerelease.1").expect("failed to parse min version?!");
            let max = Version::parse("0.15.0-prerelease.8").expect("failed to parse max version?!");
            if provider.source == "packrat" && provider.version >= min && provider.version < max
            {
                install_root = root_without_bin(&install_root);
            }
        }

        Ok(install_root)
    }

    /// Returns a normalized version of install_prefix_root, for comparison
    fn install_prefix_root_normalized(&self) -> UpdaterResult<Utf8PathBuf> {
        let raw_root = self.install_prefix_root()?;
        // The canonicalize path could fail if the path doesn't exist anymore;
        // catch that specific error here and return the original path.
        let canonicalized = if let Ok(path) = raw_root.canonicalize() {
            path
        } else {
            raw_root.into_std_path_buf()
        };
        let normalized = Utf8PathBuf::from_path_buf(canonicalized)
            .map_err(|path| UpdaterError::CaminoConversionFailed { path })?;
        Ok(normalized)
    }

    /// Attempts to perform an update. The return value specifies whether an
    /// update was actually performed or not; `None` indicates "no update was
    /// needed", while an error indicates that an update couldn't be performed
    /// due to an error.
    pub async fn run(&mut self) -> UpdaterResult<Option<UpdateResult>> {
        if !self.is_update_needed().await? {
            return Ok(None);
        }

        let release = match &self.requested_release {
            Some(r) => r,
            None => {
                self.fetch_release().await?;
                self.requested_release.as_ref().unwrap()
            }
        }
        .clone();

        let install_prefix = self.install_prefix_root()?;
        let app_name = self.name.clone().unwrap_or_default();

        let lock_path = install_prefix.join(format!("{app_name}.update.lock"));
        if lock_path.exists() {
            return Err(UpdaterError::UpdateInProgress {});
        }
        std::fs::write(&lock_path, b"")?;
        let result = self.apply_update(&release, &install_prefix, &app_name).await;
        let _ = std::fs::remove_file(&lock_path);

        Ok(Some(result?))
    }

    async fn apply_update(
        &self,
        release: &Release,
        install_prefix: &Utf8Path,
        app_name: &str,
    ) -> UpdaterResult<UpdateResult> {
        let asset = locate_release_asset(app_name, release)?;

        let tempdir = TempDir::new()?;
        let tempdir_path = Utf8PathBuf::try_from(tempdir.path().to_owned())?;
        let archive_path = tempdir_path.join(&asset.name);
        download_asset(asset, &archive_path).await?;

        let staging = tempdir_path.join("staging");
        let driver = ArchiveDriver::locate();
        driver
            .unpack(&archive_path, &staging)
            .map_err(UpdaterError::Store)?;

        let new_files = walk_files(&staging)?;
        if new_files.is_empty() {
            return Err(UpdaterError::InstallFailed {
                status: None,
                stdout: None,
                stderr: Some("downloaded release archive was empty".to_owned()),
            });
        }

        let mut backups: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::new();
        let mut created: Vec<Utf8PathBuf> = Vec::new();

        let outcome = self.replace_files(install_prefix, &staging, &new_files, &mut backups, &mut created);

        match outcome {
            Ok(()) => {
                for (_, backup) in backups.iter().rev() {
                    delete_backup(backup)?;
                }
                Ok(UpdateResult {
                    old_version: self.current_version.clone(),
                    new_version: release.version.clone(),
                    new_version_tag: release.tag_name.clone(),
                    install_prefix: install_prefix.to_owned(),
                })
            }
            Err(e) => {
                warn!("update failed, rolling back: {e}");
                for (original, backup) in backups.iter().rev() {
                    let _ = std::fs::remove_file(original);
                    std::fs::rename(backup, original)?;
                }
                for path in created.iter().rev() {
                    let _ = std::fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    /// Renames every file that's about to be replaced to `<file>.backup`,
    /// then copies the new tree over the install prefix. Any failure partway
    /// through leaves `backups`/`created` populated so the caller can roll
    /// back exactly what this call touched.
    fn replace_files(
        &self,
        install_prefix: &Utf8Path,
        staging: &Utf8Path,
        new_files: &[Utf8PathBuf],
        backups: &mut Vec<(Utf8PathBuf, Utf8PathBuf)>,
        created: &mut Vec<Utf8PathBuf>,
    ) -> UpdaterResult<()> {
        for relpath in new_files {
            if relpath.file_name() == Some(EXCLUDED_FILE) {
                continue;
            }
            let target = install_prefix.join(relpath);
            if target.exists() {
                let backup = backup_path(&target);
                std::fs::rename(&target, &backup)?;
                backups.push((target.clone(), backup));
            } else {
                created.push(target.clone());
            }
        }

        for relpath in new_files {
            if relpath.file_name() == Some(EXCLUDED_FILE) {
                continue;
            }
            let source = staging.join(relpath);
            let target = install_prefix.join(relpath);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copy_replacing(&source, &target)?;
        }

        Ok(())
    }

    #[cfg(feature = "blocking")]
    /// Identical to [`SelfUpdater::run`], but performed synchronously.
    pub fn run_sync(&mut self) -> UpdaterResult<Option<UpdateResult>> {
        blocking_runtime().block_on(self.run())
    }

    /// Queries for new releases and then returns the detected version.
    pub async fn query_new_version(&mut self) -> UpdaterResult<Option<&Version>> {
        self.fetch_release().await?;

        if let Some(release) = &self.requested_release {
            Ok(Some(&release.version))
        } else {
            Ok(None)
        }
    }
}

/// Copies `source` over `target`. On Windows, `target` may be the
/// currently-running executable; if so, it's removed with
/// [`self_replace::self_delete_at`]-compatible semantics by first renaming
/// it aside, since an in-use mapped executable can't be overwritten
/// directly. Everywhere else a plain copy (after the caller's prior rename
/// of any existing file) suffices.
fn copy_replacing(source: &Utf8Path, target: &Utf8Path) -> UpdaterResult<()> {
    #[cfg(windows)]
    {
        if is_current_exe(target) {
            let mut aside = target.as_os_str().to_os_string();
            aside.push(OsStr::new(".replacing"));
            let aside = Utf8PathBuf::try_from(std::path::PathBuf::from(aside))?;
            std::fs::copy(source, &aside)?;
            self_replace::self_replace(&aside).map_err(|_| UpdaterError::CleanupFailed {})?;
            let _ = std::fs::remove_file(&aside);
            return Ok(());
        }
    }
    std::fs::copy(source, target)?;
    Ok(())
}

#[cfg(windows)]
fn is_current_exe(path: &Utf8Path) -> bool {
    let Ok(current) = env::current_exe() else {
        return false;
    };
    let Ok(current) = current.canonicalize() else {
        return false;
    };
    path.canonicalize()
        .map(|p| p == current)
        .unwrap_or(false)
}

fn delete_backup(backup: &Utf8Path) -> UpdaterResult<()> {
    #[cfg(windows)]
    {
        if let Ok(current) = env::current_exe() {
            if let Ok(current) = current.canonicalize() {
                // The original (non-backup) name is one component shorter
                // than `backup` by the trailing ".backup" we appended.
                let original = Utf8PathBuf::from(backup.as_str().trim_end_matches(".backup"));
                if original
                    .canonicalize()
                    .map(|p| p == current)
                    .unwrap_or(false)
                {
                    // Our own backup was already consumed by self_replace in
                    // copy_replacing; nothing left to clean up here.
                    return Ok(());
                }
            }
        }
    }
    match std::fs::remove_file(backup) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn backup_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}.backup"))
}

/// Recursively lists every regular file under `root`, as paths relative to
/// `root`.
fn walk_files(root: &Utf8Path) -> UpdaterResult<Vec<Utf8PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_owned()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = Utf8PathBuf::try_from(entry.path())?;
            if path.is_dir() {
                stack.push(path);
            } else {
                let relpath = path
                    .strip_prefix(root)
                    .expect("walked entry must be under root")
                    .to_owned();
                out.push(relpath);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Picks the release asset matching this app and the running platform,
/// using the same `.7z`/`.zip` naming convention as the package store.
fn locate_release_asset<'a>(app_name: &str, release: &'a Release) -> UpdaterResult<&'a Asset> {
    let os_token = match env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let prefix = format!("{app_name}-");
    let candidates: Vec<&Asset> = release
        .assets
        .iter()
        .filter(|a| a.name.starts_with(&prefix) && (a.name.ends_with(".7z") || a.name.ends_with(".zip")))
        .collect();

    if let Some(exact) = candidates
        .iter()
        .find(|a| a.name.contains(os_token) && a.name.contains(env::consts::ARCH))
    {
        return Ok(exact);
    }
    if let Some(os_match) = candidates.iter().find(|a| a.name.contains(os_token)) {
        return Ok(os_match);
    }
    if candidates.len() == 1 {
        return Ok(candidates[0]);
    }

    Err(UpdaterError::NoInstallerForPackage {})
}

async fn download_asset(asset: &Asset, dest: &Utf8Path) -> UpdaterResult<()> {
    let client = reqwest::Client::new();
    let bytes = client
        .get(&asset.browser_download_url)
        .header(reqwest::header::ACCEPT, "application/octet-stream")
        .send()
        .await?
        .bytes()
        .await?;

    if bytes.is_empty() {
        return Err(UpdaterError::InstallFailed {
            status: None,
            stdout: None,
            stderr: Some("downloaded release asset was empty".to_owned()),
        });
    }

    std::fs::write(dest, &bytes)?;
    debug!("downloaded {} ({} bytes)", asset.name, bytes.len());
    Ok(())
}

#[cfg(feature = "blocking")]
fn blocking_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .worker_threads(1)
        .max_blocking_threads(128)
        .enable_all()
        .build()
        .expect("Initializing tokio runtime failed")
}

fn get_app_name() -> Option<String> {
    if let Ok(name) = env::var("PM_UPDATER_APP_NAME") {
        Some(name)
    } else if let Some(path) = args().next() {
        Utf8PathBuf::from(&path)
            .file_name()
            .map(|s| s.strip_suffix(".exe").unwrap_or(s))
            .map(|s| s.strip_suffix("-update").unwrap_or(s))
            .map(|s| s.to_owned())
    } else {
        None
    }
}

/// Returns an environment variable-compatible version of the app name.
pub fn app_name_to_env_var(app_name: &str) -> String {
    app_name.to_ascii_uppercase().replace('-', "_")
}

fn root_without_bin(path: &Utf8PathBuf) -> Utf8PathBuf {
    if path.file_name() == Some("bin") {
        if let Some(parent) = path.parent() {
            return parent.to_path_buf();
        }
    }
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use crate::SelfUpdater;
    use camino::Utf8PathBuf;

    #[test]
    fn test_install_dir_path_str() {
        let mut updater = SelfUpdater::new();
        updater.set_install_dir("/tmp");
        assert_eq!(updater.install_prefix, Some(Utf8PathBuf::from("/tmp")));
    }

    #[test]
    fn test_install_dir_path_string() {
        let mut updater = SelfUpdater::new();
        updater.set_install_dir("/tmp".to_string());
        assert_eq!(updater.install_prefix, Some(Utf8PathBuf::from("/tmp")));
    }

    #[test]
    fn new_for_sets_name() {
        let updater = SelfUpdater::new_for("mytool");
        assert_eq!(updater.name.as_deref(), Some("mytool"));
    }

    #[test]
    fn set_name_updates_source_app_name() {
        use crate::{ReleaseSource, ReleaseSourceType};
        let mut updater = SelfUpdater::new_for("mytool");
        updater.set_release_source(ReleaseSource {
            release_type: ReleaseSourceType::GitHub,
            owner: "example".to_owned(),
            name: "mytool".to_owned(),
            app_name: "mytool".to_owned(),
        });
        updater.set_name("othertool");
        assert_eq!(updater.source.as_ref().unwrap().app_name, "othertool");
    }
}
