//! Canonical SHA-1 hashing of files and directory trees.
//!
//! The directory format is byte-stable across implementations: entries are
//! visited in sorted name order and folded into the hash as either
//! `dir '<relpath>'\0` or `file '<relpath>' <size> <hex-sha1>\0`.

use camino::{Utf8Path, Utf8PathBuf};
use sha1::{Digest, Sha1};

use crate::errors::StoreResult;

/// Stateless helper for hashing files and directory trees.
pub struct HashEngine;

impl HashEngine {
    /// Hashes `path`, dispatching to [`Self::hash_file`] or
    /// [`Self::hash_dir`] depending on what's there.
    pub fn hash_path(path: &Utf8Path, exclude: Option<&str>) -> StoreResult<String> {
        if path.is_dir() {
            Self::hash_dir(path, exclude)
        } else {
            Self::hash_file(path)
        }
    }

    /// Plain SHA-1 of a single file's contents.
    pub fn hash_file(path: &Utf8Path) -> StoreResult<String> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha1::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Canonical directory hash, rooted at `root`. `exclude`, if given, is a
    /// single relative path (forward-slashed) skipped at any depth -- used
    /// to hash an install directory's contents without its own sentinel.
    pub fn hash_dir(root: &Utf8Path, exclude: Option<&str>) -> StoreResult<String> {
        let mut hasher = Sha1::new();
        hash_dir_into(root, root, exclude, &mut hasher)?;
        Ok(hex::encode(hasher.finalize()))
    }
}

fn hash_dir_into(
    dir: &Utf8Path,
    root: &Utf8Path,
    exclude: Option<&str>,
    hasher: &mut Sha1,
) -> StoreResult<()> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        entries.push(Utf8PathBuf::from_path_buf(entry.path())?);
    }
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    for path in entries {
        let relpath = pathdiff::diff_utf8_paths(&path, root)
            .unwrap_or_else(|| path.clone())
            .as_str()
            .replace('\\', "/");
        if Some(relpath.as_str()) == exclude {
            continue;
        }

        let metadata = std::fs::symlink_metadata(&path)?;
        if metadata.file_type().is_symlink() {
            // A symlink is recorded as a dir entry but never followed.
            hasher.update(format!("dir '{relpath}'\0").as_bytes());
        } else if metadata.is_dir() {
            hasher.update(format!("dir '{relpath}'\0").as_bytes());
            hash_dir_into(&path, root, exclude, hasher)?;
        } else {
            let size = metadata.len();
            let file_hash = HashEngine::hash_file(&path)?;
            hasher.update(format!("file '{relpath}' {size} {file_hash}\0").as_bytes());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p).unwrap()
    }

    #[test]
    fn hash_is_stable_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        std::fs::write(root.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub").join("b.txt"), b"world").unwrap();

        let first = HashEngine::hash_dir(&root, None).unwrap();
        let second = HashEngine::hash_dir(&root, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hash_changes_when_a_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        std::fs::write(root.join("a.txt"), b"hello").unwrap();
        let before = HashEngine::hash_dir(&root, None).unwrap();

        std::fs::write(root.join("a.txt"), b"goodbye").unwrap();
        let after = HashEngine::hash_dir(&root, None).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn excluded_path_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        std::fs::write(root.join("a.txt"), b"hello").unwrap();

        let without_sentinel = HashEngine::hash_dir(&root, Some(".packman.sha1")).unwrap();

        std::fs::write(root.join(".packman.sha1"), b"anything").unwrap();
        let with_sentinel_excluded = HashEngine::hash_dir(&root, Some(".packman.sha1")).unwrap();

        assert_eq!(without_sentinel, with_sentinel_excluded);
    }

    #[test]
    fn hash_file_matches_known_sha1() {
        let dir = tempfile::tempdir().unwrap();
        let root = utf8(dir.path().to_path_buf());
        let file = root.join("f.txt");
        std::fs::write(&file, b"abc").unwrap();

        // sha1("abc") is a well-known test vector.
        assert_eq!(
            HashEngine::hash_file(&file).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }
}
