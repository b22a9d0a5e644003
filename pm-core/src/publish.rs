//! Packing and pushing archives to remotes: backs both the `publish`
//! command (pack a folder, then push the result) and the `push` command
//! (push an already-built archive as-is).

use camino::{Utf8Path, Utf8PathBuf};
use pm_store::archive::ArchiveDriver;
use tracing::info;
use uuid::Uuid;

use crate::context::Context;
use crate::errors::{CoreError, CoreResult};

/// One push's outcome: the object name it landed under on each remote, and
/// the location string the transport reported back (a URL or bucket key).
#[derive(Debug, Clone)]
pub struct PublishedObject {
    /// The namespaced remote name pushed to.
    pub remote: String,
    /// The object name used on that remote.
    pub object_name: String,
    /// The location the transport reports for the uploaded object.
    pub location: String,
}

/// Packs and/or pushes package archives to one or more remotes.
pub struct PublishPipeline;

impl PublishPipeline {
    /// Packs `folder`'s contents into a `.7z` named `<name>` in a scratch
    /// directory, then pushes it to every remote in `remotes`, returning once
    /// all pushes have been attempted. Used by `publish`.
    pub async fn pack_and_push(
        ctx: &Context,
        folder: &Utf8Path,
        name: &str,
        remotes: &[String],
        force: bool,
        public: bool,
    ) -> CoreResult<Vec<PublishedObject>> {
        if !folder.is_dir() {
            return Err(CoreError::Internal(format!(
                "'{folder}' is not a directory"
            )));
        }

        let scratch = std::env::temp_dir().join(format!("pm-publish-{}", Uuid::new_v4()));
        let scratch = Utf8PathBuf::from_path_buf(scratch)
            .map_err(|p| CoreError::Internal(format!("temp path '{}' is not UTF-8", p.display())))?;
        std::fs::create_dir_all(&scratch)?;
        let archive_path = scratch.join(format!("{name}.7z"));

        let driver = ArchiveDriver::locate();
        let report = driver.pack(folder, &archive_path)?;
        info!(
            "packed '{folder}' into '{archive_path}' ({} bytes, {} bytes unpacked)",
            report.archive_size, report.content_size
        );

        let result = Self::push(ctx, &archive_path, remotes, None, force, public).await;
        let _ = std::fs::remove_dir_all(&scratch);
        result
    }

    /// Pushes an already-built archive at `path` to every remote in
    /// `remotes`, using `remote_path` as the object name if given, or the
    /// archive's own file name otherwise. Used by both `publish` (after
    /// packing) and `push` (given a pre-built archive directly).
    ///
    /// `force=false` and an existing object on a remote is
    /// [`CoreError::FileExists`] for that remote; the pipeline still
    /// attempts every other remote in `remotes` before returning the first
    /// such error encountered.
    pub async fn push(
        ctx: &Context,
        path: &Utf8Path,
        remotes: &[String],
        remote_path: Option<&str>,
        force: bool,
        public: bool,
    ) -> CoreResult<Vec<PublishedObject>> {
        if !path.is_file() {
            return Err(CoreError::Internal(format!("'{path}' is not a file")));
        }
        let object_name = remote_path.map(str::to_owned).unwrap_or_else(|| {
            path.file_name()
                .expect("archive path always has a file name")
                .to_owned()
        });

        if remotes.is_empty() {
            return Err(CoreError::NoRemoteConfigured {
                dependency: object_name,
            });
        }

        let mut published = Vec::with_capacity(remotes.len());
        let mut first_error = None;

        for name in remotes {
            let namespaced = match ctx.remotes.resolve_name(name) {
                Ok(n) => n,
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            let transport = match ctx.remotes.transport_for(&namespaced) {
                Ok(t) => t,
                Err(err) => {
                    first_error.get_or_insert(err);
                    continue;
                }
            };

            if !force {
                match transport.head(&object_name).await {
                    Ok(true) => {
                        first_error.get_or_insert(CoreError::FileExists {
                            remote: namespaced.clone(),
                            object: object_name.clone(),
                        });
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        first_error.get_or_insert(CoreError::Transport(err));
                        continue;
                    }
                }
            }

            match transport.put(path, &object_name, public).await {
                Ok(location) => {
                    info!("pushed '{object_name}' to '{namespaced}' ({location})");
                    published.push(PublishedObject {
                        remote: namespaced,
                        object_name: object_name.clone(),
                        location,
                    });
                }
                Err(err) => {
                    first_error.get_or_insert(CoreError::Transport(err));
                }
            }
        }

        match first_error {
            Some(err) if published.is_empty() => Err(err),
            _ => Ok(published),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pm_store::cache::CacheStore;
    use std::collections::HashMap;

    fn context() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CacheStore::new(root);
        let cascade = crate::remote::RemoteCascade::new(HashMap::new(), vec![]);
        (dir, Context::new(store, cascade, Context::noop_progress()))
    }

    #[tokio::test]
    async fn push_with_no_remotes_is_no_remote_configured() {
        let (dir, ctx) = context();
        let archive = Utf8PathBuf::from_path_buf(dir.path().join("pkg.7z")).unwrap();
        std::fs::write(&archive, b"not a real archive").unwrap();
        let err = PublishPipeline::push(&ctx, &archive, &[], None, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoRemoteConfigured { .. }));
    }

    #[tokio::test]
    async fn push_rejects_a_missing_file() {
        let (dir, ctx) = context();
        let missing = Utf8PathBuf::from_path_buf(dir.path().join("nope.7z")).unwrap();
        let err = PublishPipeline::push(&ctx, &missing, &["anything".to_owned()], None, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
