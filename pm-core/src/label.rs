//! The label-dereference pass: turns a mutable [`Label`] child into a
//! concrete [`Package`] by resolving its remote-cached `base@version`
//! token, honoring local staleness and the `removePreviousPackageOnLabelUpdate`
//! cache policy.

use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use pm_manifest::model::{Label, Package, PlatformSet};
use pm_store::cache::{CacheStore, PackageStatus};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::remote::RemoteCascade;

/// Dereferences `label` to a concrete [`Package`], consulting the local
/// cache first and falling back to it (with a diagnostic) if every remote
/// in the search order comes up empty.
///
/// `remove_previous_on_update` mirrors [`pm_manifest::model::CachePolicy`]'s
/// `remove_previous_package_on_label_update`: when true and the label's
/// body actually changes, the package the old body pointed at is removed
/// from the cache once the new body has committed.
pub async fn dereference(
    store: &CacheStore,
    cascade: &RemoteCascade,
    label: &Label,
    remove_previous_on_update: bool,
) -> CoreResult<Package> {
    let search_order = cascade.cascade_for(&label.remotes)?;
    let local = store.read_label(&label.name)?;

    if let Some((body, modified)) = &local {
        if is_fresh(*modified, label.cache_expiration) {
            debug!("label '{}' is fresh locally, skipping remote lookup", label.name);
            return parse_token(&label.name, body).map(|(base, version)| to_package(label, base, version));
        }
    }

    let object_name = format!("{}.txt", label.name);
    for remote_name in &search_order {
        let transport = cascade.transport_for(remote_name)?;
        if !transport.head(&object_name).await? {
            continue;
        }

        let raw_tmp_path = std::env::temp_dir().join(format!("pm-label-{}.txt", Uuid::new_v4()));
        let tmp_path = Utf8PathBuf::from_path_buf(raw_tmp_path)
            .map_err(|p| CoreError::Internal(format!("temp path '{}' is not UTF-8", p.display())))?;
        transport
            .get(&object_name, &tmp_path, pm_transport::noop())
            .await?;
        let new_body = std::fs::read_to_string(&tmp_path)?;
        let _ = std::fs::remove_file(&tmp_path);
        let new_body = new_body.trim().to_owned();

        if remove_previous_on_update {
            if let Some((old_body, _)) = &local {
                if old_body != &new_body {
                    remove_previous_package(store, old_body);
                }
            }
        }

        store.write_label_atomic(&label.name, &new_body)?;
        let (base, version) = parse_token(&label.name, &new_body)?;
        return Ok(to_package(label, base, version));
    }

    if let Some((body, _)) = local {
        warn!(
            "label '{}' was not found on any of {:?}; falling back to the stale local copy",
            label.name, search_order
        );
        let (base, version) = parse_token(&label.name, &body)?;
        return Ok(to_package(label, base, version));
    }

    Err(CoreError::LabelNotFound {
        name: label.name.clone(),
        searched: search_order,
    })
}

fn is_fresh(modified: SystemTime, cache_expiration: u64) -> bool {
    match modified.elapsed() {
        Ok(age) => age <= Duration::from_secs(cache_expiration),
        Err(_) => true,
    }
}

fn parse_token(label_name: &str, token: &str) -> CoreResult<(String, String)> {
    match token.split_once('@') {
        Some((base, version)) => Ok((base.to_owned(), version.to_owned())),
        None => Err(CoreError::LabelMalformed {
            name: label_name.to_owned(),
            token: token.to_owned(),
        }),
    }
}

fn to_package(label: &Label, base: String, version: String) -> Package {
    Package {
        name: base,
        version,
        platforms: PlatformSet {
            patterns: label.platforms.patterns.clone(),
        },
        remotes: label.remotes.clone(),
    }
}

fn remove_previous_package(store: &CacheStore, old_token: &str) {
    let Some((base, version)) = old_token.split_once('@') else {
        return;
    };
    match store.status(base, version) {
        Ok((PackageStatus::Installed, install_path)) => {
            if let Err(err) = store.remove(&install_path) {
                warn!("failed to remove previous package '{base}@{version}' after label update: {err}");
            }
        }
        Ok(_) => {}
        Err(err) => warn!("failed to check status of previous package '{base}@{version}': {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn label(name: &str, cache_expiration: u64) -> Label {
        Label {
            name: name.to_owned(),
            platforms: PlatformSet::default(),
            remotes: vec![],
            cache_expiration,
        }
    }

    #[tokio::test]
    async fn fresh_local_label_skips_remotes() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CacheStore::new(root);
        store.write_label_atomic("mylabel", "foo@1.0").unwrap();

        let cascade = RemoteCascade::new(HashMap::new(), vec![]);
        let lbl = label("mylabel", 300);
        let package = dereference(&store, &cascade, &lbl, false).await.unwrap();
        assert_eq!(package.name, "foo");
        assert_eq!(package.version, "1.0");
    }

    #[tokio::test]
    async fn missing_everywhere_is_label_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CacheStore::new(root);
        let cascade = RemoteCascade::new(HashMap::new(), vec![]);
        let lbl = label("nope", 300);
        let err = dereference(&store, &cascade, &lbl, false).await.unwrap_err();
        assert!(matches!(err, CoreError::LabelNotFound { .. }));
    }

    #[test]
    fn malformed_token_without_at_is_an_error() {
        let err = parse_token("mylabel", "not-a-token").unwrap_err();
        assert!(matches!(err, CoreError::LabelMalformed { .. }));
    }
}
