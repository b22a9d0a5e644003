//! Loads and merges the user-scope and install-scope `config.packman.xml`
//! files into one [`Config`], independently of environment variables or
//! `$HOME` so it stays unit-testable (see `merge`).

use camino::{Utf8Path, Utf8PathBuf};
use pm_manifest::model::{CachePolicy, Config as ManifestConfig};
use tracing::debug;

use crate::errors::{CoreError, CoreResult};

/// Environment variable naming the cache root.
pub const ENV_PACKAGES_ROOT: &str = "PM_PACKAGES_ROOT";
/// Environment variable naming the install directory (self-update and the
/// install-scope config file both live here).
pub const ENV_INSTALL_PATH: &str = "PM_INSTALL_PATH";

/// Config filename consulted at both the user and install scope.
pub const CONFIG_FILE_NAME: &str = "config.packman.xml";

/// Merges `base` then each of `overlays` in order: for [`CachePolicy`]
/// fields, the last non-null value wins; for the remote cascade, lists are
/// concatenated (not deduped -- a later scope's remote can legitimately
/// re-list an earlier one to reorder cascade preference) and remote maps
/// are merged key-wise with later scopes overwriting earlier ones.
pub fn merge(base: ManifestConfig, overlays: impl IntoIterator<Item = ManifestConfig>) -> ManifestConfig {
    let mut merged = base;
    for overlay in overlays {
        if overlay.cache_policy.remove_previous_package_on_label_update.is_some() {
            merged.cache_policy.remove_previous_package_on_label_update =
                overlay.cache_policy.remove_previous_package_on_label_update;
        }
        merged.default_remotes.extend(overlay.default_remotes);
        merged.remotes.extend(overlay.remotes);
    }
    merged
}

/// Reads and parses `path` as a config file, returning `Ok(None)` if the
/// file doesn't exist at all (not every scope is required to have one).
fn load_config_file(path: &Utf8Path) -> CoreResult<Option<ManifestConfig>> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(Some(pm_manifest::parser::parse_config(path, &data)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// The user-scope config path: `<home>/config.packman.xml`, or `None` if
/// the home directory can't be determined.
pub fn user_config_path() -> CoreResult<Option<Utf8PathBuf>> {
    let Some(home) = homedir::my_home().map_err(|e| CoreError::Internal(e.to_string()))? else {
        return Ok(None);
    };
    let home = Utf8PathBuf::from_path_buf(home)
        .map_err(|p| CoreError::Internal(format!("home directory '{}' is not UTF-8", p.display())))?;
    Ok(Some(home.join(CONFIG_FILE_NAME)))
}

/// The install-scope config path, derived from `PM_INSTALL_PATH`, or
/// `None` if that variable isn't set.
pub fn install_config_path() -> Option<Utf8PathBuf> {
    std::env::var(ENV_INSTALL_PATH)
        .ok()
        .map(|dir| Utf8PathBuf::from(dir).join(CONFIG_FILE_NAME))
}

/// Loads defaults, then the user-scope file (if present), then the
/// install-scope file (if `PM_INSTALL_PATH` is set and the file exists),
/// merging in that increasing-priority order.
pub fn load() -> CoreResult<ManifestConfig> {
    let mut overlays = Vec::new();

    if let Some(user_path) = user_config_path()? {
        if let Some(cfg) = load_config_file(&user_path)? {
            debug!("merged user-scope config from '{user_path}'");
            overlays.push(cfg);
        }
    }

    if let Some(install_path) = install_config_path() {
        if let Some(cfg) = load_config_file(&install_path)? {
            debug!("merged install-scope config from '{install_path}'");
            overlays.push(cfg);
        }
    }

    Ok(merge(ManifestConfig::default(), overlays))
}

/// Reads the required cache root from `PM_PACKAGES_ROOT`.
pub fn packages_root() -> CoreResult<Utf8PathBuf> {
    std::env::var(ENV_PACKAGES_ROOT)
        .map(Utf8PathBuf::from)
        .map_err(|_| CoreError::MissingEnvVar {
            var: ENV_PACKAGES_ROOT.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cfg(remove_prev: Option<bool>, remotes: &[&str]) -> ManifestConfig {
        ManifestConfig {
            default_remotes: remotes.iter().map(|s| s.to_string()).collect(),
            remotes: BTreeMap::new(),
            cache_policy: CachePolicy {
                remove_previous_package_on_label_update: remove_prev,
            },
        }
    }

    #[test]
    fn later_non_null_policy_wins() {
        let base = cfg(Some(false), &["a"]);
        let user = cfg(None, &["b"]);
        let install = cfg(Some(true), &["c"]);
        let merged = merge(base, vec![user, install]);
        assert_eq!(merged.cache_policy.remove_previous_package_on_label_update, Some(true));
        assert_eq!(merged.default_remotes, vec!["a", "b", "c"]);
    }

    #[test]
    fn absent_overlay_policy_preserves_base() {
        let base = cfg(Some(true), &[]);
        let overlay = cfg(None, &[]);
        let merged = merge(base, vec![overlay]);
        assert_eq!(merged.cache_policy.remove_previous_package_on_label_update, Some(true));
    }
}
