//! On-disk layout, install/verify/remove, and label caching for the package
//! cache.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveDriver;
use crate::errors::{StoreError, StoreResult};
use crate::hash::HashEngine;

/// Name of the install sentinel written at the root of every cached
/// package's contents.
pub const SENTINEL_NAME: &str = ".packman.sha1";

/// Install status of a `(base, version)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    /// Nothing is installed at this slot.
    Missing,
    /// Installed and carrying a sentinel (or found at the legacy path).
    Installed,
    /// A `chk/` directory exists but its sentinel is missing.
    Corrupt,
}

/// Root of a package cache: `chk/<base>/<version>/`, a legacy
/// `<base>/<version>/` layout recognized for backward compatibility, and
/// `labels/<name>.txt`.
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    /// Opens a cache rooted at `root`. Does not require `root` to exist yet;
    /// `install` creates it on demand.
    pub fn new(root: impl Into<Utf8PathBuf>) -> CacheStore {
        CacheStore { root: root.into() }
    }

    /// The install path a `(base, version)` slot would use under the
    /// current (non-legacy) layout.
    pub fn install_path(&self, base: &str, version: &str) -> Utf8PathBuf {
        self.root.join("chk").join(base).join(version)
    }

    fn legacy_install_path(&self, base: &str, version: &str) -> Utf8PathBuf {
        self.root.join(base).join(version)
    }

    /// Reports whether `(base, version)` is installed, corrupt, or missing,
    /// and the path it is (or would be) installed at.
    pub fn status(&self, base: &str, version: &str) -> StoreResult<(PackageStatus, Utf8PathBuf)> {
        let modern = self.install_path(base, version);
        if modern.is_dir() {
            return Ok(if modern.join(SENTINEL_NAME).is_file() {
                (PackageStatus::Installed, modern)
            } else {
                (PackageStatus::Corrupt, modern)
            });
        }

        let legacy = self.legacy_install_path(base, version);
        if legacy.is_dir() {
            return Ok((PackageStatus::Installed, legacy));
        }

        Ok((PackageStatus::Missing, modern))
    }

    /// Runs the staging-and-atomic-rename install protocol: extracts
    /// `archive_path` into a sibling staging directory named with a random
    /// UUID, writes the sentinel, then renames it into `install_path`.
    ///
    /// If another process wins the race to install the same slot, this is a
    /// silent success: the staging directory is discarded and no error is
    /// raised.
    pub fn install(&self, archive_path: &Utf8Path, install_path: &Utf8Path) -> StoreResult<()> {
        let parent = install_path
            .parent()
            .expect("install_path always has a parent under the cache root");
        std::fs::create_dir_all(parent)?;

        let staging = parent.join(format!(".staging-{}", Uuid::new_v4()));
        let result = self.install_into_staging(archive_path, &staging, install_path);
        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        result
    }

    fn install_into_staging(
        &self,
        archive_path: &Utf8Path,
        staging: &Utf8Path,
        install_path: &Utf8Path,
    ) -> StoreResult<()> {
        let driver = ArchiveDriver::locate();
        driver.unpack(archive_path, staging)?;

        std::fs::write(staging.join(SENTINEL_NAME), b"")?;

        match std::fs::rename(staging, install_path) {
            Ok(()) => Ok(()),
            Err(err)
                if err.kind() == std::io::ErrorKind::AlreadyExists
                    || is_directory_not_empty(&err) =>
            {
                debug!("lost the install race for '{install_path}', using the winner's copy");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Recomputes the directory hash of `install_path`, excluding the
    /// sentinel, and compares it against the sentinel's recorded body.
    ///
    /// The sentinel in this layout is written empty (see `install`), so an
    /// empty body always matches; a non-empty sentinel (as written by an
    /// older tool version) is compared against the recomputed hash.
    pub fn verify(&self, install_path: &Utf8Path) -> StoreResult<()> {
        let sentinel_path = install_path.join(SENTINEL_NAME);
        let expected = std::fs::read_to_string(&sentinel_path).map_err(|_| StoreError::Corrupt {
            path: install_path.to_owned(),
            expected: String::new(),
            actual: String::new(),
        })?;
        let expected = expected.trim();
        if expected.is_empty() {
            return Ok(());
        }

        let actual = HashEngine::hash_dir(install_path, Some(SENTINEL_NAME))?;
        if actual == expected {
            Ok(())
        } else {
            Err(StoreError::Corrupt {
                path: install_path.to_owned(),
                expected: expected.to_owned(),
                actual,
            })
        }
    }

    /// Recursively removes `install_path`, granting write permission to and
    /// retrying any file that refuses deletion for being read-only.
    pub fn remove(&self, install_path: &Utf8Path) -> StoreResult<()> {
        if !install_path.exists() {
            return Ok(());
        }
        match std::fs::remove_dir_all(install_path) {
            Ok(()) => Ok(()),
            Err(_) => {
                clear_readonly_recursive(install_path)?;
                std::fs::remove_dir_all(install_path)?;
                Ok(())
            }
        }
    }

    /// Scans both the `chk/` and legacy layouts, returning a sorted,
    /// deduplicated list of installed `(base, version)` pairs.
    pub fn list_installed(&self) -> StoreResult<Vec<(String, String)>> {
        let mut found = std::collections::BTreeSet::new();
        self.scan_two_level(&self.root.join("chk"), &mut found)?;
        self.scan_two_level(&self.root, &mut found)?;
        Ok(found.into_iter().collect())
    }

    fn scan_two_level(
        &self,
        base_dir: &Utf8Path,
        found: &mut std::collections::BTreeSet<(String, String)>,
    ) -> StoreResult<()> {
        if !base_dir.is_dir() {
            return Ok(());
        }
        for base_entry in std::fs::read_dir(base_dir)? {
            let base_entry = base_entry?;
            let base_path = Utf8PathBuf::from_path_buf(base_entry.path())?;
            if !base_path.is_dir() || base_path.file_name() == Some("chk") {
                continue;
            }
            let Some(base_name) = base_path.file_name() else {
                continue;
            };
            for version_entry in std::fs::read_dir(&base_path)? {
                let version_entry = version_entry?;
                let version_path = Utf8PathBuf::from_path_buf(version_entry.path())?;
                if !version_path.is_dir() {
                    continue;
                }
                let Some(version_name) = version_path.file_name() else {
                    continue;
                };
                found.insert((base_name.to_owned(), version_name.to_owned()));
            }
        }
        Ok(())
    }

    fn labels_dir(&self) -> Utf8PathBuf {
        self.root.join("labels")
    }

    /// Path a label named `name` is (or would be) cached at.
    pub fn label_local_path(&self, name: &str) -> Utf8PathBuf {
        self.labels_dir().join(format!("{name}.txt"))
    }

    /// Reads a label's cached body (a `base@version` token) along with the
    /// file's modification time, if it exists.
    pub fn read_label(&self, name: &str) -> StoreResult<Option<(String, std::time::SystemTime)>> {
        let path = self.label_local_path(name);
        match std::fs::read_to_string(&path) {
            Ok(body) => {
                let modified = std::fs::metadata(&path)?.modified()?;
                Ok(Some((body.trim().to_owned(), modified)))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes a label's body atomically: a UUID-named temp file in the
    /// labels directory, then a rename into place. A losing racer's temp
    /// file is removed rather than left behind.
    pub fn write_label_atomic(&self, name: &str, body: &str) -> StoreResult<()> {
        let dir = self.labels_dir();
        std::fs::create_dir_all(&dir)?;
        let final_path = self.label_local_path(name);
        let tmp_path = dir.join(format!(".{name}-{}.tmp", Uuid::new_v4()));

        std::fs::write(&tmp_path, body)?;
        match std::fs::rename(&tmp_path, &final_path) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(err.into())
            }
        }
    }
}

#[cfg(unix)]
fn is_directory_not_empty(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc_enotempty())
}

#[cfg(unix)]
fn libc_enotempty() -> i32 {
    39
}

#[cfg(windows)]
fn is_directory_not_empty(err: &std::io::Error) -> bool {
    // ERROR_DIR_NOT_EMPTY / ERROR_ALREADY_EXISTS
    matches!(err.raw_os_error(), Some(145) | Some(183))
}

fn clear_readonly_recursive(path: &Utf8Path) -> StoreResult<()> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            clear_readonly_recursive(&Utf8PathBuf::from_path_buf(entry.path())?)?;
        }
    }
    let mut perms = metadata.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        if let Err(err) = std::fs::set_permissions(path, perms) {
            warn!("could not clear read-only bit on '{path}': {err}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p).unwrap()
    }

    fn make_archive(dir: &Utf8Path, archive_path: &Utf8Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("bin"), b"payload").unwrap();
        ArchiveDriver::locate().pack(dir, archive_path).unwrap();
    }

    #[test]
    fn status_is_missing_for_an_unknown_slot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(utf8(dir.path().to_path_buf()));
        let (status, _) = cache.status("foo", "1.0").unwrap();
        assert_eq!(status, PackageStatus::Missing);
    }

    #[test]
    fn install_then_status_reports_installed() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path().to_path_buf());
        let cache = CacheStore::new(root.clone());

        let src_dir = tempfile::tempdir().unwrap();
        let src = utf8(src_dir.path().to_path_buf()).join("src");
        let archive = root.join("foo@1.0.zip");
        make_archive(&src, &archive);

        let install_path = cache.install_path("foo", "1.0");
        cache.install(&archive, &install_path).unwrap();

        let (status, path) = cache.status("foo", "1.0").unwrap();
        assert_eq!(status, PackageStatus::Installed);
        assert_eq!(path, install_path);
        assert!(install_path.join("bin").exists());
        assert!(install_path.join(SENTINEL_NAME).exists());
    }

    #[test]
    fn legacy_layout_counts_as_installed() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path().to_path_buf());
        let cache = CacheStore::new(root.clone());

        let legacy = root.join("foo").join("1.0");
        std::fs::create_dir_all(&legacy).unwrap();

        let (status, path) = cache.status("foo", "1.0").unwrap();
        assert_eq!(status, PackageStatus::Installed);
        assert_eq!(path, legacy);
    }

    #[test]
    fn corrupt_when_sentinel_missing() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path().to_path_buf());
        let cache = CacheStore::new(root.clone());

        let install_path = cache.install_path("foo", "1.0");
        std::fs::create_dir_all(&install_path).unwrap();

        let (status, _) = cache.status("foo", "1.0").unwrap();
        assert_eq!(status, PackageStatus::Corrupt);
    }

    #[test]
    fn verify_passes_right_after_install() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path().to_path_buf());
        let cache = CacheStore::new(root.clone());

        let src_dir = tempfile::tempdir().unwrap();
        let src = utf8(src_dir.path().to_path_buf()).join("src");
        let archive = root.join("foo@1.0.zip");
        make_archive(&src, &archive);

        let install_path = cache.install_path("foo", "1.0");
        cache.install(&archive, &install_path).unwrap();

        cache.verify(&install_path).unwrap();
    }

    #[test]
    fn list_installed_merges_legacy_and_modern_layouts() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path().to_path_buf());
        let cache = CacheStore::new(root.clone());

        std::fs::create_dir_all(root.join("legacy-base").join("2.0")).unwrap();
        std::fs::create_dir_all(cache.install_path("modern-base", "3.0")).unwrap();

        let installed = cache.list_installed().unwrap();
        assert!(installed.contains(&("legacy-base".to_string(), "2.0".to_string())));
        assert!(installed.contains(&("modern-base".to_string(), "3.0".to_string())));
    }

    #[test]
    fn label_round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(utf8(dir.path().to_path_buf()));

        assert!(cache.read_label("thing").unwrap().is_none());

        cache.write_label_atomic("thing", "foo@1.2.3").unwrap();

        let (body, _) = cache.read_label("thing").unwrap().unwrap();
        assert_eq!(body, "foo@1.2.3");
    }

    #[test]
    fn remove_deletes_an_installed_package() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path().to_path_buf());
        let cache = CacheStore::new(root.clone());

        let install_path = cache.install_path("foo", "1.0");
        std::fs::create_dir_all(&install_path).unwrap();
        std::fs::write(install_path.join(SENTINEL_NAME), b"").unwrap();

        cache.remove(&install_path).unwrap();

        assert!(!install_path.exists());
    }
}
