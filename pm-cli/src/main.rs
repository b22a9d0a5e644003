#![deny(missing_docs)]

//! Command-line interface for the dependency package manager.

mod cli;
mod progress;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use cli::{Cli, Commands, ProjectAction};
use comfy_table::Table;
use console::Term;
use miette::IntoDiagnostic;
use pm_core::errors::CoreError;
use pm_core::{Context, CoreResult, FulfillmentEngine, PublishPipeline};
use pm_manifest::model::{Dependency, DependencyChild, Label, Package, PlatformSet, Project};
use pm_manifest::{parse_project, ManifestEditor};
use pm_store::cache::{CacheStore, PackageStatus};
use pm_store::{ArchiveDriver, HashEngine, LinkManager};
use pm_updater::{ReleaseSource, ReleaseSourceType, SelfUpdater};

fn main() {
    let cli = Cli::parse();
    let log_level = cli.log_level();
    axocli::CliAppBuilder::new("packrat")
        .verbose(log_level)
        .start(cli, real_main);
}

fn real_main(app: &axocli::CliApp<Cli>) -> Result<(), miette::Report> {
    let cli = &app.config;
    match run(cli) {
        Ok(()) => Ok(()),
        Err(CoreError::ScriptFailure { path, code }) => {
            eprintln!("postscript '{path}' exited with status {code}");
            std::process::exit(code);
        }
        Err(err) => Err(err.into()),
    }
}

fn run(cli: &Cli) -> CoreResult<()> {
    match &cli.command {
        Commands::Cache { remove_corrupt } => cmd_cache(*remove_corrupt),
        Commands::Hash { path } => cmd_hash(path),
        Commands::Help { topic } => cmd_help(topic.as_deref()),
        Commands::Install {
            name,
            version,
            link,
            cache_expiration,
            remotes,
            project,
            postscript,
        } => cmd_install(
            name,
            version.as_deref(),
            *cache_expiration,
            link.as_deref(),
            remotes,
            project.as_deref(),
            postscript.as_deref(),
        ),
        Commands::Link { link_path, target } => cmd_link(link_path, target),
        Commands::List { prefix, remotes } => cmd_list(prefix.as_deref(), remotes),
        Commands::Mirror { project, remote, platforms, yes } => cmd_mirror(project, remote, platforms, *yes),
        Commands::Pack { input, name, out } => cmd_pack(input, name.as_deref(), out.as_deref()),
        Commands::Project { action } => cmd_project(action),
        Commands::Publish { input, name, remotes, force, make_public } => {
            cmd_publish(input, name.as_deref(), remotes, *force, *make_public)
        }
        Commands::Pull { project, platform, include_tags, exclude_tags, remotes, postscript } => {
            cmd_pull(cli, project, platform.as_deref(), include_tags, exclude_tags, remotes, postscript.as_deref())
        }
        Commands::Push { path, remotes, remote_path, force, make_public } => {
            cmd_push(path, remotes, remote_path.as_deref(), *force, *make_public)
        }
        Commands::Remotes => cmd_remotes(),
        Commands::Run { name, args } => cmd_run(name, args),
        Commands::Unlink { path } => cmd_unlink(path),
        Commands::Update { version, force, yes } => cmd_update(version.as_deref(), *force, *yes),
        Commands::Verify { project, platform, remotes } => cmd_verify(project, platform.as_deref(), remotes),
    }
}

fn build_context(project_remotes: BTreeMap<String, pm_manifest::model::Remote>) -> CoreResult<Context> {
    let remotes = project_remotes.into_iter().collect();
    Context::from_environment(remotes, Arc::new(progress::TerminalProgress::new()))
}

fn load_project(path: &Utf8Path) -> CoreResult<Project> {
    let data = std::fs::read_to_string(path)?;
    Ok(parse_project(path, &data)?)
}

fn write_var_file(cli: &Cli, env_vars: &[(String, String)]) -> CoreResult<()> {
    let Some(var_path) = &cli.var_path else {
        return Ok(());
    };
    let mut body = String::new();
    for (k, v) in env_vars {
        body.push_str(k);
        body.push('=');
        body.push_str(v);
        body.push('\n');
    }
    std::fs::write(var_path, body)?;
    Ok(())
}

fn cmd_pull(
    cli: &Cli,
    project_path: &Utf8Path,
    platform: Option<&str>,
    include_tags: &[String],
    exclude_tags: &[String],
    extra_remotes: &[String],
    postscript: Option<&str>,
) -> CoreResult<()> {
    let mut project = load_project(project_path)?;
    project.default_remotes = extra_remotes.iter().cloned().chain(project.default_remotes.clone()).collect();

    let ctx = build_context(project.remotes.clone().into_iter().collect())?;
    let include = non_empty_set(include_tags);
    let exclude = non_empty_set(exclude_tags);

    let report = ctx.block_on(FulfillmentEngine::pull(
        &ctx,
        &project,
        platform,
        include,
        exclude,
        false,
        postscript,
    ))?;

    write_var_file(cli, &report.env_vars)?;
    for path in &report.paths {
        println!("{path}");
    }
    Ok(())
}

fn non_empty_set(tags: &[String]) -> Option<BTreeSet<String>> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.iter().cloned().collect())
    }
}

/// With an explicit `VERSION`, installs that exact package. Without one,
/// `name` is assumed to be a label: it's dereferenced through the same
/// `pm_core::label::dereference` pass a manifest-embedded `<label>` child
/// goes through, using `cache_expiration` (default 0, i.e. always
/// re-checked) to decide whether a locally cached label body is still
/// fresh.
fn cmd_install(
    name: &str,
    version: Option<&str>,
    cache_expiration: Option<u64>,
    link: Option<&Utf8Path>,
    extra_remotes: &[String],
    project: Option<&Utf8Path>,
    postscript: Option<&str>,
) -> CoreResult<()> {
    let project_remotes = match project {
        Some(p) => load_project(p)?.remotes,
        None => BTreeMap::new(),
    };
    let ctx = build_context(project_remotes)?;

    let pkg = match version {
        Some(version) => Package {
            name: name.to_owned(),
            version: version.to_owned(),
            platforms: PlatformSet::default(),
            remotes: extra_remotes.to_vec(),
        },
        None => {
            let label = Label {
                name: name.to_owned(),
                platforms: PlatformSet::default(),
                remotes: extra_remotes.to_vec(),
                cache_expiration: cache_expiration.unwrap_or(0),
            };
            ctx.block_on(pm_core::label::dereference(&ctx.store, &ctx.remotes, &label, false))?
        }
    };

    let install_path = ctx.block_on(pm_core::fulfillment::fetch_and_install(&ctx, &[], &pkg))?;

    if let Some(link_path) = link {
        LinkManager::create(link_path, &install_path)?;
        println!("{link_path}");
    } else {
        println!("{install_path}");
    }

    if let Some(raw) = postscript {
        std::env::set_var(pm_core::fulfillment::env_var_name(name, "VERSION"), &pkg.version);
        std::env::set_var(pm_core::fulfillment::env_var_name(name, "PATH"), install_path.as_str());
        pm_core::fulfillment::run_postscript(raw)?;
    }
    Ok(())
}

fn cmd_verify(project_path: &Utf8Path, platform: Option<&str>, extra_remotes: &[String]) -> CoreResult<()> {
    let project = load_project(project_path)?;
    let ctx = build_context(project.remotes.clone().into_iter().collect())?;

    let mut table = Table::new();
    table.set_header(vec!["dependency", "status"]);

    for name in &project.dependency_order {
        let Some(dep) = project.dependencies.get(name) else { continue };
        let Some(resolved) = pm_manifest::resolve(dep, platform, None, None)? else {
            continue;
        };
        let pkg = match resolved.child {
            DependencyChild::Package(p) => p,
            DependencyChild::Source(_) => {
                table.add_row(vec![name.as_str(), "source (not cached)"]);
                continue;
            }
            DependencyChild::Label(l) => {
                ctx.block_on(pm_core::label::dereference(&ctx.store, &ctx.remotes, &l, false))?
            }
        };

        let combined: Vec<String> = pkg.remotes.iter().chain(extra_remotes.iter()).cloned().collect();
        let install_path = ctx.block_on(pm_core::fulfillment::fetch_and_install(&ctx, &combined, &pkg))?;
        let status = match ctx.store.verify(&install_path) {
            Ok(()) => "OK".to_owned(),
            Err(err) => format!("CORRUPT ({err})"),
        };
        table.add_row(vec![name.as_str(), &status]);
    }

    println!("{table}");
    Ok(())
}

fn cmd_mirror(project_path: &Utf8Path, remote: &str, platforms: &[String], yes: bool) -> CoreResult<()> {
    let project = load_project(project_path)?;
    let ctx = build_context(project.remotes.clone().into_iter().collect())?;
    let target = ctx.remotes.resolve_name(remote)?;
    let target_transport = ctx.remotes.transport_for(&target)?;

    let platform_list: Vec<Option<&str>> = if platforms.is_empty() {
        vec![None]
    } else {
        platforms.iter().map(|p| Some(p.as_str())).collect()
    };

    let mut copied = 0;
    let mut skipped = 0;
    for platform in platform_list {
        for name in &project.dependency_order {
            let Some(dep) = project.dependencies.get(name) else { continue };
            let Some(resolved) = pm_manifest::resolve(dep, platform, None, None)? else {
                continue;
            };
            let DependencyChild::Package(pkg) = resolved.child else {
                continue;
            };

            let object_name = format!("{}@{}.7z", pkg.name, pkg.version);
            if ctx.block_on(target_transport.head(&object_name))? {
                skipped += 1;
                continue;
            }

            if !yes && !confirm(&format!("copy '{}@{}' to '{target}'?", pkg.name, pkg.version))? {
                skipped += 1;
                continue;
            }

            let combined: Vec<String> = pkg.remotes.clone();
            let install_path = ctx.block_on(pm_core::fulfillment::fetch_and_install(&ctx, &combined, &pkg))?;
            let driver = ArchiveDriver::locate();
            let scratch = Utf8PathBuf::from_path_buf(std::env::temp_dir().join(format!(
                "pm-mirror-{}",
                uuid::Uuid::new_v4()
            )))
            .map_err(|p| CoreError::Internal(format!("temp path '{}' is not UTF-8", p.display())))?;
            std::fs::create_dir_all(&scratch)?;
            let archive_path = scratch.join(&object_name);
            driver.pack(&install_path, &archive_path)?;
            ctx.block_on(target_transport.put(&archive_path, &object_name, false))?;
            let _ = std::fs::remove_dir_all(&scratch);
            copied += 1;
        }
    }

    println!("mirrored {copied} package(s), skipped {skipped}");
    Ok(())
}

fn confirm(prompt: &str) -> CoreResult<bool> {
    use std::io::Write;
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn cmd_publish(
    input: &Utf8Path,
    name: Option<&str>,
    remotes: &[String],
    force: bool,
    make_public: bool,
) -> CoreResult<()> {
    let ctx = build_context(BTreeMap::new())?;
    let name = name.map(str::to_owned).unwrap_or_else(|| {
        input.file_name().unwrap_or("package").to_owned()
    });
    let published = ctx.block_on(PublishPipeline::pack_and_push(&ctx, input, &name, remotes, force, make_public))?;
    for obj in published {
        println!("{} -> {} ({})", obj.object_name, obj.remote, obj.location);
    }
    Ok(())
}

fn cmd_push(
    path: &Utf8Path,
    remotes: &[String],
    remote_path: Option<&str>,
    force: bool,
    make_public: bool,
) -> CoreResult<()> {
    let ctx = build_context(BTreeMap::new())?;
    let published = ctx.block_on(PublishPipeline::push(&ctx, path, remotes, remote_path, force, make_public))?;
    for obj in published {
        println!("{} -> {} ({})", obj.object_name, obj.remote, obj.location);
    }
    Ok(())
}

fn cmd_pack(input: &Utf8Path, name: Option<&str>, out: Option<&Utf8Path>) -> CoreResult<()> {
    let name = name.map(str::to_owned).unwrap_or_else(|| {
        input.file_name().unwrap_or("package").to_owned()
    });
    let out_dir = out.map(Utf8Path::to_owned).unwrap_or_else(|| Utf8Path::new(".").to_owned());
    std::fs::create_dir_all(&out_dir)?;
    let archive_path = out_dir.join(format!("{name}.7z"));
    let driver = ArchiveDriver::locate();
    let report = driver.pack(input, &archive_path)?;
    println!("{archive_path} ({} bytes)", report.archive_size);
    Ok(())
}

fn cmd_hash(path: &Utf8Path) -> CoreResult<()> {
    let hash = if path.is_dir() {
        HashEngine::hash_dir(path, None)?
    } else {
        HashEngine::hash_file(path)?
    };
    println!("{hash}");
    Ok(())
}

fn cmd_link(link_path: &Utf8Path, target: &Utf8Path) -> CoreResult<()> {
    LinkManager::create(link_path, target)?;
    Ok(())
}

fn cmd_unlink(path: &Utf8Path) -> CoreResult<()> {
    LinkManager::destroy(path)?;
    Ok(())
}

fn cmd_list(prefix: Option<&str>, extra_remotes: &[String]) -> CoreResult<()> {
    let root = pm_core::config::packages_root()?;
    let store = CacheStore::new(root);
    let mut table = Table::new();
    table.set_header(vec!["name", "version", "source"]);

    for (name, version) in store.list_installed()? {
        if prefix.is_some_and(|p| !name.starts_with(p)) {
            continue;
        }
        table.add_row(vec![name, version, "local".to_owned()]);
    }

    if !extra_remotes.is_empty() {
        let ctx = build_context(BTreeMap::new())?;
        for remote_name in extra_remotes {
            let namespaced = ctx.remotes.resolve_name(remote_name)?;
            let transport = ctx.remotes.transport_for(&namespaced)?;
            let objects = ctx.block_on(transport.list(prefix.unwrap_or("")))?;
            for object in objects {
                table.add_row(vec![object, String::new(), namespaced.clone()]);
            }
        }
    }

    println!("{table}");
    Ok(())
}

fn cmd_cache(remove_corrupt: bool) -> CoreResult<()> {
    let root = pm_core::config::packages_root()?;
    let store = CacheStore::new(root);

    let mut ok = 0;
    let mut corrupt = 0;
    let mut removed = 0;
    for (name, version) in store.list_installed()? {
        let (status, install_path) = store.status(&name, &version)?;
        match status {
            PackageStatus::Installed => {
                ok += 1;
                println!("OK      {name}@{version}");
            }
            PackageStatus::Corrupt => {
                corrupt += 1;
                println!("CORRUPT {name}@{version}");
                if remove_corrupt {
                    store.remove(&install_path)?;
                    removed += 1;
                }
            }
            PackageStatus::Missing => {}
        }
    }

    println!("{ok} ok, {corrupt} corrupt, {removed} removed");
    Ok(())
}

fn cmd_remotes() -> CoreResult<()> {
    let ctx = build_context(BTreeMap::new())?;
    let mut table = Table::new();
    table.set_header(vec!["name", "type", "location"]);
    for (name, remote) in ctx.remotes.all() {
        table.add_row(vec![
            name.clone(),
            format!("{:?}", remote.kind),
            remote.location_template.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn cmd_run(name: &str, args: &[String]) -> CoreResult<()> {
    let manifest_path = Utf8Path::new("deps.packman.xml");
    let project = load_project(manifest_path)?;
    let ctx = build_context(project.remotes.clone().into_iter().collect())?;

    ctx.block_on(FulfillmentEngine::pull(&ctx, &project, None, None, None, false, None))?;

    let path_var = pm_core::fulfillment::env_var_name(name, "PATH");
    let install_path = std::env::var(&path_var).map_err(|_| CoreError::Internal(format!(
        "dependency '{name}' was not resolved by '{manifest_path}'"
    )))?;
    let install_path = Utf8PathBuf::from(install_path);

    let exe_name = if cfg!(windows) { format!("{name}.exe") } else { name.to_owned() };
    let candidates = [install_path.join("bin").join(&exe_name), install_path.join(&exe_name)];
    let Some(exe_path) = candidates.iter().find(|p| p.is_file()) else {
        return Err(CoreError::Internal(format!(
            "no executable named '{exe_name}' found under '{install_path}'"
        )));
    };

    let mut cmd = pm_process::Cmd::new(exe_path.as_std_path(), format!("run '{name}'"));
    for arg in args {
        cmd.arg(arg);
    }
    cmd.check(false);
    let status = cmd.status()?;
    std::process::exit(status.code().unwrap_or(1));
}

fn cmd_update(version: Option<&str>, force: bool, yes: bool) -> CoreResult<()> {
    if !yes && !confirm("update packrat now?")? {
        println!("update cancelled");
        return Ok(());
    }

    let current_version = semver::Version::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|e| CoreError::Internal(format!("packrat's own version is unparseable: {e}")))?;

    let mut updater = SelfUpdater::new_for("packrat");
    updater.always_update(force);
    updater.set_current_version(current_version).map_err(CoreError::Updater)?;
    updater.set_release_source(ReleaseSource {
        release_type: ReleaseSourceType::GitHub,
        owner: "example".to_owned(),
        name: "packrat".to_owned(),
        app_name: "packrat".to_owned(),
    });
    if let Some(version) = version {
        updater.configure_version_specifier(pm_updater::UpdateRequest::SpecificVersion(version.to_owned()));
    }

    match updater.run_sync().map_err(CoreError::Updater)? {
        Some(result) => println!("updated to {}", result.new_version),
        None => println!("already up to date"),
    }
    Ok(())
}

fn cmd_project(action: &ProjectAction) -> CoreResult<()> {
    match action {
        ProjectAction::Create { path } => {
            let project = Project {
                tools_version: "6.0".to_owned(),
                default_remotes: vec![],
                remotes: BTreeMap::new(),
                dependencies: BTreeMap::new(),
                dependency_order: vec![],
                source_path: path.clone(),
            };
            ManifestEditor::write_to(&project, path)?;
            Ok(())
        }
        ProjectAction::DependencyAdd {
            project,
            name,
            package_name,
            version,
            platforms,
            force,
        } => {
            let mut parsed = load_project(project)?;
            if !parsed.dependencies.contains_key(name) {
                ManifestEditor::add_dependency(
                    &mut parsed,
                    Dependency {
                        name: name.clone(),
                        link_path: None,
                        copy_path: None,
                        tags: None,
                        children: vec![],
                    },
                );
            }
            let pkg = Package {
                name: package_name.clone(),
                version: version.clone(),
                platforms: PlatformSet { patterns: platforms.clone() },
                remotes: vec![],
            };
            ManifestEditor::add_package(&mut parsed, name, pkg, *force)?;
            ManifestEditor::write_to(&parsed, project)?;
            Ok(())
        }
        ProjectAction::DependencyRemove { project, name } => {
            let mut parsed = load_project(project)?;
            ManifestEditor::remove_dependency(&mut parsed, name);
            ManifestEditor::write_to(&parsed, project)?;
            Ok(())
        }
    }
}

fn cmd_help(topic: Option<&str>) -> CoreResult<()> {
    match topic {
        Some(topic) => println!("no detailed help is available for '{topic}' yet; see `packrat --help`."),
        None => {
            let _ = Term::stdout().write_line("run `packrat <command> --help` for details on a given command.");
        }
    }
    Ok(())
}
