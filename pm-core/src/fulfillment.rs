//! Resolves a project's dependencies against the cache and remote cascade,
//! installing anything missing, materializing each dependency's
//! link/copy target, recursing into nested manifests, and emitting the
//! `PM_<DEP>_*`/`PM_PATHS` environment surface.

use std::collections::{BTreeSet, HashSet, VecDeque};

use camino::{Utf8Path, Utf8PathBuf};
use pm_manifest::model::{DependencyChild, Package, Project};
use pm_manifest::resolver::{self, ResolvedDependency};
use pm_process::Cmd;
use pm_store::cache::PackageStatus;
use pm_store::link::LinkManager;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::errors::{CoreError, CoreResult};
use crate::label;

/// What a `pull` produced: the environment surface and the ordered list of
/// visible paths (link target, copy target, or cache path) for every
/// dependency actually processed, across the top-level manifest and any
/// manifests recursed into.
#[derive(Debug, Default)]
pub struct FulfillmentReport {
    /// `(name, value)` pairs in emission order: `PM_<DEP>_VERSION` then
    /// `PM_<DEP>_PATH` per dependency, then `PM_PATHS` last.
    pub env_vars: Vec<(String, String)>,
    /// The visible path of each processed dependency, in resolution order.
    pub paths: Vec<Utf8PathBuf>,
}

/// Orchestrates resolve -> cache-check -> fetch -> install -> materialize
/// -> recurse for a whole project.
pub struct FulfillmentEngine;

impl FulfillmentEngine {
    /// Runs the full pipeline described in the fulfillment engine design:
    /// dependencies are processed in declaration order, deduplicated by
    /// name across the top-level manifest and any nested `deps.packman.xml`
    /// encountered inside an installed package, using a work queue rather
    /// than true recursion.
    #[allow(clippy::too_many_arguments)]
    pub async fn pull(
        ctx: &Context,
        project: &Project,
        platform: Option<&str>,
        include_tags: Option<BTreeSet<String>>,
        exclude_tags: Option<BTreeSet<String>>,
        remove_previous_on_label_update: bool,
        postscript: Option<&str>,
    ) -> CoreResult<FulfillmentReport> {
        let mut seen = HashSet::new();
        let mut report = FulfillmentReport::default();
        let mut queue: VecDeque<Project> = VecDeque::new();
        queue.push_back(project.clone());

        while let Some(current) = queue.pop_front() {
            for name in &current.dependency_order {
                if !seen.insert(name.clone()) {
                    continue;
                }
                let Some(dep) = current.dependencies.get(name) else {
                    continue;
                };
                let Some(resolved) =
                    resolver::resolve(dep, platform, include_tags.as_ref(), exclude_tags.as_ref())?
                else {
                    continue;
                };

                let (version, content_path, sentinel) = match &resolved.child {
                    DependencyChild::Source(source) => {
                        let sentinel = format!(
                            ".source-{}",
                            source.path.file_name().unwrap_or("dependency")
                        );
                        (String::new(), source.path.clone(), sentinel)
                    }
                    DependencyChild::Package(pkg) => {
                        let install_path =
                            fetch_and_install(ctx, &current.default_remotes, pkg).await?;
                        let sentinel = format!(".{}@{}", pkg.name, pkg.version);
                        (pkg.version.clone(), install_path, sentinel)
                    }
                    DependencyChild::Label(lbl) => {
                        let pkg = label::dereference(
                            &ctx.store,
                            &ctx.remotes,
                            lbl,
                            remove_previous_on_label_update,
                        )
                        .await?;
                        let install_path =
                            fetch_and_install(ctx, &current.default_remotes, &pkg).await?;
                        let sentinel = format!(".{}@{}", pkg.name, pkg.version);
                        (pkg.version, install_path, sentinel)
                    }
                };

                let visible_path = materialize(&resolved, &content_path, &sentinel)?;

                let version_var = env_var_name(name, "VERSION");
                let path_var = env_var_name(name, "PATH");
                let forward_slashed = forward_slash(&visible_path);

                std::env::set_var(&version_var, &version);
                std::env::set_var(&path_var, &forward_slashed);
                report.env_vars.push((version_var, version));
                report.env_vars.push((path_var, forward_slashed));
                report.paths.push(visible_path.clone());

                if let Some(nested) = find_nested_manifest(&content_path) {
                    let data = std::fs::read_to_string(&nested)?;
                    let nested_project = pm_manifest::parser::parse_project(&nested, &data)?;
                    queue.push_back(nested_project);
                }
            }
        }

        let joined = report
            .paths
            .iter()
            .map(|p| forward_slash(p))
            .collect::<Vec<_>>()
            .join(";");
        std::env::set_var("PM_PATHS", &joined);
        report.env_vars.push(("PM_PATHS".to_owned(), joined));

        if let Some(raw) = postscript {
            run_postscript(raw)?;
        }

        Ok(report)
    }
}

/// Ensures `(pkg.name, pkg.version)` is installed in the cache, fetching it
/// from the first remote in `child.remotes ++ project_default_remotes ++
/// cascade.default_order` that has it. Returns the install path.
///
/// A `Corrupt` status is treated as `Missing` after removing the stale
/// directory. Already-`Installed` packages perform zero remote calls.
pub async fn fetch_and_install(
    ctx: &Context,
    project_default_remotes: &[String],
    pkg: &Package,
) -> CoreResult<Utf8PathBuf> {
    let (status, install_path) = ctx.store.status(&pkg.name, &pkg.version)?;
    let status = if status == PackageStatus::Corrupt {
        warn!(
            "package '{}@{}' is corrupt, removing and re-fetching",
            pkg.name, pkg.version
        );
        ctx.store.remove(&install_path)?;
        PackageStatus::Missing
    } else {
        status
    };
    if status == PackageStatus::Installed {
        return Ok(install_path);
    }

    let combined: Vec<String> = pkg
        .remotes
        .iter()
        .chain(project_default_remotes.iter())
        .cloned()
        .collect();
    let searched = ctx.remotes.cascade_for(&combined)?;
    if searched.is_empty() {
        return Err(CoreError::NoRemoteConfigured {
            dependency: format!("{}@{}", pkg.name, pkg.version),
        });
    }

    for remote_name in &searched {
        let transport = ctx.remotes.transport_for(remote_name)?;
        let Some(object_name) = transport.locate_package(&pkg.name, &pkg.version).await? else {
            continue;
        };
        let ext = object_name.rsplit('.').next().unwrap_or("7z");
        let raw_archive_path = std::env::temp_dir().join(format!(
            "{}@{}-{}.{ext}",
            pkg.name,
            pkg.version,
            Uuid::new_v4()
        ));
        let archive_path = Utf8PathBuf::from_path_buf(raw_archive_path)
            .map_err(|p| CoreError::Internal(format!("temp path '{}' is not UTF-8", p.display())))?;

        transport
            .get(&object_name, &archive_path, ctx.progress.clone())
            .await?;
        let result = ctx.store.install(&archive_path, &install_path);
        let _ = std::fs::remove_file(&archive_path);
        result?;
        info!("installed '{}@{}' from '{remote_name}'", pkg.name, pkg.version);
        return Ok(install_path);
    }

    Err(CoreError::PackageNotFound {
        base: pkg.name.clone(),
        version: pkg.version.clone(),
        searched,
    })
}

/// Applies a resolved dependency's `linkPath`/`copyPath` (link wins if both
/// are set), returning the path now visible to the user. With neither set,
/// the cache/source path itself is the visible path.
pub fn materialize(
    resolved: &ResolvedDependency,
    content_path: &Utf8Path,
    sentinel: &str,
) -> CoreResult<Utf8PathBuf> {
    if let Some(link_path) = &resolved.link_path {
        LinkManager::create(link_path, content_path)?;
        Ok(link_path.clone())
    } else if let Some(copy_path) = &resolved.copy_path {
        copy_if_different(content_path, copy_path, sentinel)?;
        Ok(copy_path.clone())
    } else {
        Ok(content_path.to_owned())
    }
}

fn copy_if_different(src: &Utf8Path, dst: &Utf8Path, sentinel: &str) -> CoreResult<()> {
    let sentinel_path = dst.join(sentinel);
    if sentinel_path.is_file() {
        return Ok(());
    }
    if dst.exists() {
        std::fs::remove_dir_all(dst)?;
    }
    copy_dir_recursive(src, dst)?;
    std::fs::write(&sentinel_path, b"")?;
    Ok(())
}

fn copy_dir_recursive(src: &Utf8Path, dst: &Utf8Path) -> CoreResult<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let entry_path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|p| CoreError::Internal(format!("path '{}' is not UTF-8", p.display())))?;
        let target = dst.join(
            entry_path
                .file_name()
                .expect("directory entries always have a file name"),
        );
        if entry_path.is_dir() {
            copy_dir_recursive(&entry_path, &target)?;
        } else {
            std::fs::copy(&entry_path, &target)?;
        }
    }
    Ok(())
}

fn find_nested_manifest(content_path: &Utf8Path) -> Option<Utf8PathBuf> {
    let candidate = content_path.join("deps.packman.xml");
    candidate.is_file().then_some(candidate)
}

fn forward_slash(path: &Utf8Path) -> String {
    path.as_str().replace('\\', "/")
}

/// The dependency-name token used in `PM_<DEP>_VERSION`/`PM_<DEP>_PATH`:
/// the name verbatim with non-alphanumerics replaced by underscores.
pub fn env_var_name(dependency: &str, suffix: &str) -> String {
    let token: String = dependency
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("PM_{token}_{suffix}")
}

/// Substitutes `ENV{X}` tokens in a postscript argument from the process
/// environment, then runs it: `.py` files are handed to `python3`
/// directly, anything else runs through the OS shell.
pub fn run_postscript(raw: &str) -> CoreResult<()> {
    let substituted = substitute_env_tokens(raw)?;
    let path = Utf8PathBuf::from(substituted);
    if !path.exists() {
        return Err(CoreError::ScriptNotFound { path });
    }

    let mut cmd = if path.extension() == Some("py") {
        let mut cmd = Cmd::new("python3", "run a postscript");
        cmd.arg(path.as_str());
        cmd
    } else if cfg!(windows) {
        let mut cmd = Cmd::new("cmd", "run a postscript");
        cmd.arg("/C").arg(path.as_str());
        cmd
    } else {
        let mut cmd = Cmd::new("sh", "run a postscript");
        cmd.arg("-c").arg(path.as_str());
        cmd
    };
    cmd.check(false);

    let status = cmd.status()?;
    if !status.success() {
        return Err(CoreError::ScriptFailure {
            path,
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

fn substitute_env_tokens(raw: &str) -> CoreResult<String> {
    const PREFIX: &str = "ENV{";
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find(PREFIX) {
        out.push_str(&rest[..start]);
        let after_prefix = &rest[start + PREFIX.len()..];
        let Some(end) = after_prefix.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let var = &after_prefix[..end];
        let value = std::env::var(var).map_err(|_| CoreError::UndefinedPostscriptVar { var: var.to_owned() })?;
        out.push_str(&value);
        rest = &after_prefix[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_replaces_non_alphanumerics() {
        assert_eq!(env_var_name("my-dep.v2", "VERSION"), "PM_my_dep_v2_VERSION");
    }

    #[test]
    fn substitute_env_tokens_replaces_known_var() {
        std::env::set_var("PM_TEST_TOKEN", "value");
        let out = substitute_env_tokens("prefix-ENV{PM_TEST_TOKEN}-suffix").unwrap();
        assert_eq!(out, "prefix-value-suffix");
    }

    #[test]
    fn substitute_env_tokens_errors_on_missing_var() {
        let err = substitute_env_tokens("ENV{PM_DEFINITELY_UNSET_TOKEN}").unwrap_err();
        assert!(matches!(err, CoreError::UndefinedPostscriptVar { .. }));
    }

    #[test]
    fn copy_if_different_skips_recopy_when_sentinel_present() {
        let src_dir = tempfile::tempdir().unwrap();
        let src = Utf8PathBuf::from_path_buf(src_dir.path().to_path_buf()).unwrap();
        std::fs::write(src.join("a.txt"), b"hello").unwrap();

        let dst_dir = tempfile::tempdir().unwrap();
        let dst = Utf8PathBuf::from_path_buf(dst_dir.path().join("out")).unwrap();

        copy_if_different(&src, &dst, ".foo@1.0").unwrap();
        assert_eq!(std::fs::read(dst.join("a.txt")).unwrap(), b"hello");

        std::fs::write(src.join("a.txt"), b"changed").unwrap();
        copy_if_different(&src, &dst, ".foo@1.0").unwrap();
        assert_eq!(std::fs::read(dst.join("a.txt")).unwrap(), b"hello");
    }
}
