//! Materializes a package version into a stable directory link.
//!
//! On Unix this is a plain symlink. On Windows a symlink requires a
//! privilege most accounts don't have, so creation falls back to a
//! directory junction (`mklink /J`), which any account can create.

use camino::{Utf8Path, Utf8PathBuf};
use pm_process::Cmd;
use tracing::debug;

use crate::errors::{StoreError, StoreResult};

/// Creates, reads, and destroys directory-level links pointing at installed
/// package versions.
pub struct LinkManager;

impl LinkManager {
    /// Returns the target an existing link at `link_path` points to, or
    /// `None` if nothing exists there yet.
    ///
    /// Returns [`StoreError::NotALink`] if `link_path` exists but is a
    /// plain file or directory rather than a link this crate manages.
    pub fn read(link_path: &Utf8Path) -> StoreResult<Option<Utf8PathBuf>> {
        let metadata = match std::fs::symlink_metadata(link_path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(link_path)?;
            return Ok(Some(Utf8PathBuf::from_path_buf(target)?));
        }

        if metadata.is_dir() {
            if let Some(target) = read_junction_target(link_path)? {
                return Ok(Some(target));
            }
        }

        Err(StoreError::NotALink {
            path: link_path.to_owned(),
        })
    }

    /// Points `link_path` at `target`, creating or repointing it.
    ///
    /// If `link_path` already links at `target` (compared case-insensitively,
    /// since junction targets can come back with different casing), this is
    /// a no-op. If it links elsewhere, the old link is destroyed first. If
    /// it's occupied by a real file or directory, fails with
    /// [`StoreError::LinkBlocked`].
    pub fn create(link_path: &Utf8Path, target: &Utf8Path) -> StoreResult<()> {
        if let Some(existing) = Self::read(link_path)? {
            if paths_eq(&existing, target) {
                return Ok(());
            }
            Self::destroy(link_path)?;
        } else if link_path.exists() {
            return Err(StoreError::LinkBlocked {
                path: link_path.to_owned(),
            });
        }

        if let Some(parent) = link_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match symlink_dir(target, link_path) {
            Ok(()) => Ok(()),
            Err(err) if is_privilege_error(&err) => {
                debug!("symlink creation denied, falling back to a junction");
                create_junction(link_path, target)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the link at `link_path`, if any. Never touches the target.
    pub fn destroy(link_path: &Utf8Path) -> StoreResult<()> {
        match std::fs::symlink_metadata(link_path) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                remove_symlink(link_path)?;
                Ok(())
            }
            Ok(metadata) if metadata.is_dir() => {
                if read_junction_target(link_path)?.is_some() {
                    remove_junction(link_path)?;
                    Ok(())
                } else {
                    Err(StoreError::LinkBlocked {
                        path: link_path.to_owned(),
                    })
                }
            }
            Ok(_) => Err(StoreError::LinkBlocked {
                path: link_path.to_owned(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn paths_eq(a: &Utf8Path, b: &Utf8Path) -> bool {
    a.as_str().eq_ignore_ascii_case(b.as_str())
}

fn is_privilege_error(err: &std::io::Error) -> bool {
    // Windows returns ERROR_PRIVILEGE_NOT_HELD (1314) when creating a
    // symlink without SeCreateSymbolicLinkPrivilege or developer mode.
    err.raw_os_error() == Some(1314)
}

#[cfg(unix)]
fn symlink_dir(target: &Utf8Path, link_path: &Utf8Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link_path)
}

#[cfg(windows)]
fn symlink_dir(target: &Utf8Path, link_path: &Utf8Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link_path)
}

#[cfg(unix)]
fn remove_symlink(link_path: &Utf8Path) -> StoreResult<()> {
    std::fs::remove_file(link_path)?;
    Ok(())
}

#[cfg(windows)]
fn remove_symlink(link_path: &Utf8Path) -> StoreResult<()> {
    std::fs::remove_dir(link_path)?;
    Ok(())
}

/// Shells out to `mklink /J`, since there's no stable std API for creating
/// a junction directly.
fn create_junction(link_path: &Utf8Path, target: &Utf8Path) -> StoreResult<()> {
    let mut cmd = Cmd::new("cmd", "create a directory junction");
    cmd.arg("/c")
        .arg("mklink")
        .arg("/J")
        .arg(link_path)
        .arg(target)
        .check(false);
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(StoreError::LinkBlocked {
            path: link_path.to_owned(),
        });
    }
    Ok(())
}

fn remove_junction(link_path: &Utf8Path) -> StoreResult<()> {
    std::fs::remove_dir(link_path)?;
    Ok(())
}

/// Junctions report as ordinary directories to `symlink_metadata`, so this
/// reads the reparse point target through `cmd /c dir /AL` to tell a
/// junction apart from a real directory. Returns `None` for a real
/// directory.
fn read_junction_target(link_path: &Utf8Path) -> StoreResult<Option<Utf8PathBuf>> {
    if !cfg!(windows) {
        return Ok(None);
    }

    let parent = link_path.parent().unwrap_or(link_path);
    let name = link_path.file_name().unwrap_or_default();

    let mut cmd = Cmd::new("cmd", "inspect a directory for a junction target");
    cmd.arg("/c").arg("dir").arg("/AL").arg(parent).check(false);
    let output = cmd.output()?;
    if !output.status.success() {
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if !line.contains(name) || !line.contains("<JUNCTION>") {
            continue;
        }
        if let Some(arrow) = line.find("[") {
            let target = line[arrow + 1..].trim_end_matches(']').trim();
            return Ok(Some(Utf8PathBuf::from(target)));
        }
    }
    Ok(None)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p).unwrap()
    }

    #[test]
    fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let target = root.join("v1");
        std::fs::create_dir(&target).unwrap();
        let link = root.join("current");

        LinkManager::create(&link, &target).unwrap();

        assert_eq!(LinkManager::read(&link).unwrap(), Some(target));
    }

    #[test]
    fn create_is_idempotent_for_same_target() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let target = root.join("v1");
        std::fs::create_dir(&target).unwrap();
        let link = root.join("current");

        LinkManager::create(&link, &target).unwrap();
        LinkManager::create(&link, &target).unwrap();

        assert_eq!(LinkManager::read(&link).unwrap(), Some(target));
    }

    #[test]
    fn create_repoints_an_existing_link() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let v1 = root.join("v1");
        let v2 = root.join("v2");
        std::fs::create_dir(&v1).unwrap();
        std::fs::create_dir(&v2).unwrap();
        let link = root.join("current");

        LinkManager::create(&link, &v1).unwrap();
        LinkManager::create(&link, &v2).unwrap();

        assert_eq!(LinkManager::read(&link).unwrap(), Some(v2));
    }

    #[test]
    fn create_is_blocked_by_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let target = root.join("v1");
        std::fs::create_dir(&target).unwrap();
        let link = root.join("current");
        std::fs::create_dir(&link).unwrap();

        let err = LinkManager::create(&link, &target).unwrap_err();
        assert!(matches!(err, StoreError::LinkBlocked { .. }));
    }

    #[test]
    fn destroy_removes_a_link_without_touching_its_target() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let target = root.join("v1");
        std::fs::create_dir(&target).unwrap();
        let link = root.join("current");
        LinkManager::create(&link, &target).unwrap();

        LinkManager::destroy(&link).unwrap();

        assert!(!link.exists());
        assert!(target.exists());
    }
}
