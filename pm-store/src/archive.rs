//! Packs and unpacks package archives.
//!
//! `.7z` is the preferred wire format and is produced and read by shelling
//! out to a `7za`-compatible binary (archive codecs are an explicit
//! out-of-scope collaborator, invoked as a pure file-in/file-out black box).
//! `.zip` is a fallback format handled natively with the `zip` crate so a
//! 7-Zip binary isn't required on the read path for mirrors that only ever
//! publish zips.

use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use pm_process::Cmd;
use tracing::{debug, warn};

use crate::errors::{StoreError, StoreResult};

/// Sizes reported back after a pack or unpack operation.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveReport {
    /// Total bytes of the archive file itself.
    pub archive_size: u64,
    /// Total bytes of the unpacked/packed directory contents.
    pub content_size: u64,
}

static SEVENZIP_PATH: OnceLock<Option<Utf8PathBuf>> = OnceLock::new();

/// Packs and unpacks folders to/from `.7z`/`.zip` archives.
pub struct ArchiveDriver {
    sevenzip: Option<Utf8PathBuf>,
}

impl ArchiveDriver {
    /// Resolves the 7-Zip binary location, memoized for the life of the
    /// process (mirrors the original tool's `locate_7z_command` cache).
    /// A driver can still be constructed, and still unpack/pack `.zip`
    /// archives, even if no 7-Zip binary is found; only `.7z` operations
    /// will fail with [`StoreError::SevenZipNotFound`].
    pub fn locate() -> ArchiveDriver {
        let sevenzip = SEVENZIP_PATH
            .get_or_init(|| {
                if let Ok(path) = std::env::var("PM_7za_PATH") {
                    let candidate = Utf8PathBuf::from(path);
                    if candidate.exists() {
                        return Some(candidate);
                    }
                }
                for candidate in bundled_candidates() {
                    if which(&candidate) {
                        return Some(Utf8PathBuf::from(candidate));
                    }
                }
                None
            })
            .clone();
        ArchiveDriver { sevenzip }
    }

    /// Packs `folder`'s contents into `archive_path`, dispatching on the
    /// archive's extension.
    pub fn pack(&self, folder: &Utf8Path, archive_path: &Utf8Path) -> StoreResult<ArchiveReport> {
        match archive_path.extension() {
            Some("7z") => self.pack_7z(folder, archive_path),
            Some("zip") => self.pack_zip(folder, archive_path),
            _ => Err(StoreError::UnknownArchiveFormat {
                path: archive_path.to_owned(),
            }),
        }
    }

    /// Unpacks `archive_path` into `dest_dir`, stripping a single redundant
    /// top-level folder if every entry shares one (the convention used by
    /// archives named `<base>@<version>[...]`).
    pub fn unpack(&self, archive_path: &Utf8Path, dest_dir: &Utf8Path) -> StoreResult<ArchiveReport> {
        std::fs::create_dir_all(dest_dir)?;
        match archive_path.extension() {
            Some("7z") => self.unpack_7z(archive_path, dest_dir),
            Some("zip") => self.unpack_zip(archive_path, dest_dir),
            _ => Err(StoreError::UnknownArchiveFormat {
                path: archive_path.to_owned(),
            }),
        }
    }

    fn sevenzip_path(&self) -> StoreResult<&Utf8Path> {
        self.sevenzip
            .as_deref()
            .ok_or(StoreError::SevenZipNotFound)
    }

    fn pack_7z(&self, folder: &Utf8Path, archive_path: &Utf8Path) -> StoreResult<ArchiveReport> {
        let sevenzip = self.sevenzip_path()?;
        if archive_path.exists() {
            std::fs::remove_file(archive_path)?;
        }
        let mut cmd = Cmd::new(sevenzip, "pack a package archive with 7-Zip");
        cmd.current_dir(folder)
            .arg("a")
            .arg("-y")
            .arg(archive_path)
            .arg(".")
            .check(false);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(StoreError::SevenZipFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(ArchiveReport {
            archive_size: std::fs::metadata(archive_path)?.len(),
            content_size: dir_size(folder)?,
        })
    }

    fn unpack_7z(&self, archive_path: &Utf8Path, dest_dir: &Utf8Path) -> StoreResult<ArchiveReport> {
        let sevenzip = self.sevenzip_path()?;
        let mut cmd = Cmd::new(sevenzip, "unpack a package archive with 7-Zip");
        cmd.arg("x")
            .arg("-y")
            .arg(format!("-o{dest_dir}"))
            .arg(archive_path)
            .check(false);
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(StoreError::SevenZipFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        strip_redundant_top_folder(dest_dir)?;
        Ok(ArchiveReport {
            archive_size: std::fs::metadata(archive_path)?.len(),
            content_size: dir_size(dest_dir)?,
        })
    }

    fn pack_zip(&self, folder: &Utf8Path, archive_path: &Utf8Path) -> StoreResult<ArchiveReport> {
        let file = std::fs::File::create(archive_path)?;
        let mut writer = zip::ZipWriter::new(file);
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for entry in walk(folder)? {
            let relpath = pathdiff::diff_utf8_paths(&entry, folder)
                .expect("walked entry must be under folder")
                .as_str()
                .replace('\\', "/");
            if entry.is_dir() {
                writer.add_directory(format!("{relpath}/"), options)?;
            } else {
                writer.start_file(relpath, options)?;
                let mut f = std::fs::File::open(&entry)?;
                std::io::copy(&mut f, &mut writer)?;
            }
        }
        writer.finish()?;
        Ok(ArchiveReport {
            archive_size: std::fs::metadata(archive_path)?.len(),
            content_size: dir_size(folder)?,
        })
    }

    fn unpack_zip(&self, archive_path: &Utf8Path, dest_dir: &Utf8Path) -> StoreResult<ArchiveReport> {
        let file = std::fs::File::open(archive_path)?;
        let mut zip = zip::ZipArchive::new(file)?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let Some(name) = entry.enclosed_name() else {
                warn!("skipping unsafe path in archive: {}", entry.name());
                continue;
            };
            let dest_path = Utf8PathBuf::from_path_buf(dest_dir.join(name))
                .map_err(|_| StoreError::UnknownArchiveFormat {
                    path: archive_path.to_owned(),
                })?;
            if entry.is_dir() {
                std::fs::create_dir_all(&dest_path)?;
            } else {
                if let Some(parent) = dest_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = std::fs::File::create(&dest_path)?;
                std::io::copy(&mut entry, &mut out)?;
            }
        }
        strip_redundant_top_folder(dest_dir)?;
        Ok(ArchiveReport {
            archive_size: std::fs::metadata(archive_path)?.len(),
            content_size: dir_size(dest_dir)?,
        })
    }
}

/// If `dest_dir` contains exactly one entry and it's a directory, hoist its
/// contents up one level and remove the now-empty wrapper. Mirrors the
/// convention of archives built from `<base>@<version>/...` trees.
fn strip_redundant_top_folder(dest_dir: &Utf8Path) -> StoreResult<()> {
    let mut entries = std::fs::read_dir(dest_dir)?;
    let Some(first) = entries.next() else {
        return Ok(());
    };
    if entries.next().is_some() {
        return Ok(());
    }
    let first = first?;
    let first_path = Utf8PathBuf::from_path_buf(first.path())
        .map_err(|p| StoreError::UnknownArchiveFormat { path: p })?;
    if !first_path.is_dir() {
        return Ok(());
    }

    debug!("stripping redundant top-level folder '{}'", first_path);
    for child in std::fs::read_dir(&first_path)? {
        let child = child?;
        let child_path = Utf8PathBuf::from_path_buf(child.path())?;
        let target = dest_dir.join(
            child_path
                .file_name()
                .expect("directory entries always have a file name"),
        );
        std::fs::rename(&child_path, &target)?;
    }
    std::fs::remove_dir(&first_path)?;
    Ok(())
}

fn dir_size(path: &Utf8Path) -> StoreResult<u64> {
    let mut total = 0;
    for entry in walk(path)? {
        if entry.is_file() {
            total += std::fs::metadata(&entry)?.len();
        }
    }
    Ok(total)
}

fn walk(root: &Utf8Path) -> StoreResult<Vec<Utf8PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_owned()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = Utf8PathBuf::from_path_buf(entry.path())?;
            if path.is_dir() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    Ok(out)
}

fn bundled_candidates() -> Vec<&'static str> {
    if cfg!(windows) {
        vec!["7za.exe", "7z.exe"]
    } else {
        vec!["7za", "7z"]
    }
}

fn which(program: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(program).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_redundant_top_folder_hoists_single_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let wrapper = root.join("foo@1.0");
        std::fs::create_dir(&wrapper).unwrap();
        std::fs::write(wrapper.join("bin"), b"x").unwrap();

        strip_redundant_top_folder(&root).unwrap();

        assert!(root.join("bin").exists());
        assert!(!wrapper.exists());
    }

    #[test]
    fn strip_redundant_top_folder_leaves_multiple_entries_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("a"), b"x").unwrap();
        std::fs::write(root.join("b"), b"y").unwrap();

        strip_redundant_top_folder(&root).unwrap();

        assert!(root.join("a").exists());
        assert!(root.join("b").exists());
    }

    #[test]
    fn zip_round_trips_a_directory() {
        let src_dir = tempfile::tempdir().unwrap();
        let src = Utf8PathBuf::from_path_buf(src_dir.path().to_path_buf()).unwrap();
        std::fs::write(src.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(src.join("sub")).unwrap();
        std::fs::write(src.join("sub").join("b.txt"), b"world").unwrap();

        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path =
            Utf8PathBuf::from_path_buf(archive_dir.path().join("out.zip")).unwrap();

        let driver = ArchiveDriver::locate();
        driver.pack(&src, &archive_path).unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(dest_dir.path().to_path_buf()).unwrap();
        driver.unpack(&archive_path, &dest).unwrap();

        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(dest.join("sub").join("b.txt")).unwrap(), b"world");
    }
}
