//! Programmatic, idempotent mutation of an already-parsed [`Project`],
//! plus serialization of the in-memory tree back out to a manifest file.
//!
//! This is deliberately not a round-trip editor: it doesn't preserve
//! comments, attribute order, or whitespace from the original file. A
//! manifest edited through here is rewritten in a fixed, canonical layout.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use camino::Utf8Path;

use crate::errors::{ManifestError, ManifestResult};
use crate::model::{Dependency, DependencyChild, Package, PlatformSet, Project};

/// Programmatic add/remove of dependencies and packages, matching the
/// element tables in [`crate::parser`].
pub struct ManifestEditor;

impl ManifestEditor {
    /// Adds `dep` to `project`, replacing any existing dependency of the
    /// same name. Idempotent: adding the same dependency twice leaves the
    /// project in the same state as adding it once.
    pub fn add_dependency(project: &mut Project, dep: Dependency) {
        if !project.dependencies.contains_key(&dep.name) {
            project.dependency_order.push(dep.name.clone());
        }
        project.dependencies.insert(dep.name.clone(), dep);
    }

    /// Removes the dependency named `name`, if present. A no-op (not an
    /// error) when no such dependency exists.
    pub fn remove_dependency(project: &mut Project, name: &str) {
        if project.dependencies.remove(name).is_some() {
            project.dependency_order.retain(|n| n != name);
        }
    }

    /// Adds `package` as a child of dependency `dependency_name`.
    ///
    /// If a `<package>` child already exists with an equal [`PlatformSet`]
    /// (same patterns, order-independent), `force` decides the outcome:
    /// `true` replaces it in place, `false` returns
    /// [`ManifestError::AlreadyExists`].
    pub fn add_package(
        project: &mut Project,
        dependency_name: &str,
        package: Package,
        force: bool,
    ) -> ManifestResult<()> {
        let dep = project
            .dependencies
            .get_mut(dependency_name)
            .ok_or_else(|| ManifestError::DependencyNotFound {
                file: project.source_path.clone(),
                name: dependency_name.to_owned(),
            })?;

        let existing = dep.children.iter_mut().find(|child| match child {
            DependencyChild::Package(p) => platform_sets_equal(&p.platforms, &package.platforms),
            _ => false,
        });

        match existing {
            Some(child) if force => {
                *child = DependencyChild::Package(package);
                Ok(())
            }
            Some(_) => Err(ManifestError::AlreadyExists {
                dependency: dependency_name.to_owned(),
            }),
            None => {
                dep.children.push(DependencyChild::Package(package));
                Ok(())
            }
        }
    }

    /// Removes whichever child of `dependency_name` has an equal
    /// [`PlatformSet`] to `platforms`, regardless of whether it's a
    /// package, source, or label. A no-op if no such dependency or child
    /// exists.
    pub fn remove_package(project: &mut Project, dependency_name: &str, platforms: &PlatformSet) {
        if let Some(dep) = project.dependencies.get_mut(dependency_name) {
            dep.children
                .retain(|child| !platform_sets_equal(child.platforms(), platforms));
        }
    }

    /// Serializes `project` in canonical form and writes it to
    /// `project.source_path`.
    pub fn write(project: &Project) -> ManifestResult<()> {
        Self::write_to(project, &project.source_path)
    }

    /// Serializes `project` in canonical form and writes it to `path`,
    /// independently of `project.source_path` (used by `packrat project
    /// init` and tests against a scratch file).
    pub fn write_to(project: &Project, path: &Utf8Path) -> ManifestResult<()> {
        let xml = serialize_project(project);
        std::fs::write(path, xml)?;
        Ok(())
    }
}

fn platform_sets_equal(a: &PlatformSet, b: &PlatformSet) -> bool {
    let a: BTreeSet<&str> = a.patterns.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.patterns.iter().map(String::as_str).collect();
    a == b
}

fn escape_attr(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, " {name}=\"{}\"", escape_attr(value));
}

fn serialize_project(project: &Project) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<project");
    if !project.tools_version.is_empty() {
        push_attr(&mut out, "toolsVersion", &project.tools_version);
    }
    if !project.default_remotes.is_empty() {
        push_attr(&mut out, "remotes", &project.default_remotes.join(" "));
    }
    out.push_str(">\n");

    for remote in project.remotes.values() {
        write_remote(&mut out, "  ", remote);
    }

    for name in &project.dependency_order {
        let Some(dep) = project.dependencies.get(name) else {
            continue;
        };
        write_dependency(&mut out, dep);
    }

    out.push_str("</project>\n");
    out
}

fn write_remote(out: &mut String, indent: &str, remote: &crate::model::Remote) {
    let _ = write!(out, "{indent}<remote");
    push_attr(out, "name", &remote.local_name);
    push_attr(
        out,
        "type",
        match remote.kind {
            crate::model::RemoteKind::Gtl => "gtl",
            crate::model::RemoteKind::S3 => "s3",
            crate::model::RemoteKind::Http => "http",
            crate::model::RemoteKind::Https => "https",
        },
    );
    if let Some(template) = &remote.location_template {
        push_attr(out, "packageLocation", template);
    }
    if let Some(error_url) = &remote.error_url {
        push_attr(out, "errorUrl", error_url);
    }
    match &remote.credentials {
        Some(creds) => {
            out.push_str(">\n");
            let _ = write!(out, "{indent}  <credentials");
            push_attr(out, "id", &creds.id);
            push_attr(out, "key", &creds.key);
            if let Some(error_url) = &creds.error_url {
                push_attr(out, "errorUrl", error_url);
            }
            out.push_str("/>\n");
            let _ = write!(out, "{indent}</remote>\n");
        }
        None => out.push_str("/>\n"),
    }
}

fn write_dependency(out: &mut String, dep: &Dependency) {
    out.push_str("  <dependency");
    push_attr(out, "name", &dep.name);
    if let Some(link_path) = &dep.link_path {
        push_attr(out, "linkPath", link_path.as_str());
    }
    if let Some(copy_path) = &dep.copy_path {
        push_attr(out, "copyPath", copy_path.as_str());
    }
    if let Some(tags) = &dep.tags {
        let joined = tags.iter().cloned().collect::<Vec<_>>().join(" ");
        push_attr(out, "tags", &joined);
    }

    if dep.children.is_empty() {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");
    for child in &dep.children {
        write_child(out, child);
    }
    out.push_str("  </dependency>\n");
}

fn write_child(out: &mut String, child: &DependencyChild) {
    match child {
        DependencyChild::Package(p) => {
            out.push_str("    <package");
            push_attr(out, "name", &p.name);
            push_attr(out, "version", &p.version);
            write_platforms(out, &p.platforms);
            write_remotes_attr(out, &p.remotes);
            out.push_str("/>\n");
        }
        DependencyChild::Source(s) => {
            out.push_str("    <source");
            push_attr(out, "path", s.path.as_str());
            write_platforms(out, &s.platforms);
            out.push_str("/>\n");
        }
        DependencyChild::Label(l) => {
            out.push_str("    <label");
            push_attr(out, "name", &l.name);
            write_platforms(out, &l.platforms);
            write_remotes_attr(out, &l.remotes);
            if l.cache_expiration != 0 {
                push_attr(out, "cacheExpiration", &l.cache_expiration.to_string());
            }
            out.push_str("/>\n");
        }
    }
}

fn write_platforms(out: &mut String, platforms: &PlatformSet) {
    if !platforms.patterns.is_empty() {
        push_attr(out, "platforms", &platforms.patterns.join(" "));
    }
}

fn write_remotes_attr(out: &mut String, remotes: &[String]) {
    if !remotes.is_empty() {
        push_attr(out, "remotes", &remotes.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_project;
    use camino::Utf8PathBuf;

    fn sample_project() -> Project {
        let xml = r#"
            <project toolsVersion="6.0" remotes="cloudfront">
                <remote name="cloudfront" type="http" packageLocation="https://example.test/${name}@${version}.zip"/>
                <dependency name="foo">
                    <package name="foo" version="1.0" platforms="windows-*"/>
                </dependency>
            </project>
        "#;
        parse_project(Utf8Path::new("proj.packman.xml"), xml).unwrap()
    }

    #[test]
    fn add_dependency_is_idempotent() {
        let mut project = sample_project();
        let dep = Dependency {
            name: "bar".to_owned(),
            link_path: None,
            copy_path: None,
            tags: None,
            children: vec![],
        };
        ManifestEditor::add_dependency(&mut project, dep.clone());
        ManifestEditor::add_dependency(&mut project, dep);
        assert_eq!(project.dependency_order, vec!["foo".to_owned(), "bar".to_owned()]);
        assert_eq!(project.dependencies.len(), 2);
    }

    #[test]
    fn remove_dependency_missing_is_a_no_op() {
        let mut project = sample_project();
        ManifestEditor::remove_dependency(&mut project, "does-not-exist");
        assert_eq!(project.dependencies.len(), 1);
    }

    #[test]
    fn add_package_rejects_platform_collision_without_force() {
        let mut project = sample_project();
        let dup = Package {
            name: "foo".to_owned(),
            version: "2.0".to_owned(),
            platforms: PlatformSet {
                patterns: vec!["windows-*".to_owned()],
            },
            remotes: vec![],
        };
        let err = ManifestEditor::add_package(&mut project, "foo", dup, false).unwrap_err();
        assert!(matches!(err, ManifestError::AlreadyExists { .. }));
    }

    #[test]
    fn add_package_with_force_replaces_in_place() {
        let mut project = sample_project();
        let replacement = Package {
            name: "foo".to_owned(),
            version: "2.0".to_owned(),
            platforms: PlatformSet {
                patterns: vec!["windows-*".to_owned()],
            },
            remotes: vec![],
        };
        ManifestEditor::add_package(&mut project, "foo", replacement, true).unwrap();
        let dep = &project.dependencies["foo"];
        assert_eq!(dep.children.len(), 1);
        match &dep.children[0] {
            DependencyChild::Package(p) => assert_eq!(p.version, "2.0"),
            _ => panic!("expected a package child"),
        }
    }

    #[test]
    fn add_package_to_unknown_dependency_errors() {
        let mut project = sample_project();
        let pkg = Package {
            name: "foo".to_owned(),
            version: "1.0".to_owned(),
            platforms: PlatformSet::default(),
            remotes: vec![],
        };
        let err = ManifestEditor::add_package(&mut project, "missing", pkg, false).unwrap_err();
        assert!(matches!(err, ManifestError::DependencyNotFound { .. }));
    }

    #[test]
    fn round_trips_through_serialization_and_reparse() {
        let project = sample_project();
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("proj.packman.xml")).unwrap();
        ManifestEditor::write_to(&project, &path).unwrap();
        let data = std::fs::read_to_string(&path).unwrap();
        let reparsed = parse_project(&path, &data).unwrap();
        assert_eq!(reparsed.tools_version, "6.0");
        assert_eq!(reparsed.dependency_order, vec!["foo".to_owned()]);
        assert!(reparsed.remotes.contains_key("project:cloudfront"));
    }
}
