//! Project and config grammars, built on top of the shared [`xml`] table
//! validator.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::reader::Reader;
use tracing::warn;

use crate::errors::{ManifestError, ManifestResult};
use crate::model::{
    CachePolicy, Config, Credentials, Dependency, DependencyChild, Label, Namespace, Package,
    PlatformSet, Project, Remote, RemoteKind, Source,
};
use crate::xml::{Attrs, ElementSpec, ElementTable, ParseEvent, TableParser};

const PROJECT_TABLE: ElementTable = &[
    ElementSpec {
        name: "project",
        required_attrs: &[],
        optional_attrs: &["toolsVersion", "remotes"],
        required_parent: None,
    },
    ElementSpec {
        name: "remote",
        required_attrs: &["name", "type"],
        optional_attrs: &["packageLocation", "errorUrl"],
        required_parent: Some("project"),
    },
    ElementSpec {
        name: "credentials",
        required_attrs: &["id", "key"],
        optional_attrs: &["errorUrl"],
        required_parent: Some("remote"),
    },
    ElementSpec {
        name: "dependency",
        required_attrs: &["name"],
        optional_attrs: &["linkPath", "copyPath", "tags"],
        required_parent: Some("project"),
    },
    ElementSpec {
        name: "package",
        required_attrs: &["name", "version"],
        optional_attrs: &["platforms", "remotes"],
        required_parent: Some("dependency"),
    },
    ElementSpec {
        name: "source",
        required_attrs: &["path"],
        optional_attrs: &["platforms"],
        required_parent: Some("dependency"),
    },
    ElementSpec {
        name: "label",
        required_attrs: &["name"],
        optional_attrs: &["platforms", "remotes", "cacheExpiration"],
        required_parent: Some("dependency"),
    },
];

const CONFIG_TABLE: ElementTable = &[
    ElementSpec {
        name: "config",
        required_attrs: &[],
        optional_attrs: &["remotes"],
        required_parent: None,
    },
    ElementSpec {
        name: "remote",
        required_attrs: &["name", "type"],
        optional_attrs: &["packageLocation", "errorUrl"],
        required_parent: Some("config"),
    },
    ElementSpec {
        name: "credentials",
        required_attrs: &["id", "key"],
        optional_attrs: &["errorUrl"],
        required_parent: Some("remote"),
    },
    ElementSpec {
        name: "cache",
        required_attrs: &[],
        optional_attrs: &["removePreviousPackageOnLabelUpdate"],
        required_parent: Some("config"),
    },
];

/// Highest `toolsVersion` this implementation understands. A manifest
/// declaring a newer version is accepted with a warning, not an error.
const SUPPORTED_TOOLS_VERSION: &str = "7.0";

fn split_platforms(attrs: &Attrs) -> PlatformSet {
    let patterns = attrs
        .get("platforms")
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default();
    PlatformSet { patterns }
}

fn split_remotes(attrs: &Attrs) -> Vec<String> {
    attrs
        .get("remotes")
        .map(|s| s.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

fn parse_remote(namespace: Namespace, attrs: &Attrs) -> Option<Remote> {
    let kind = RemoteKind::parse(attrs.get("type")?)?;
    Some(Remote {
        namespace,
        local_name: attrs.get("name")?.clone(),
        kind,
        location_template: attrs.get("packageLocation").cloned(),
        credentials: None,
        error_url: attrs.get("errorUrl").cloned(),
    })
}

fn resolve_relative(base_dir: &Utf8Path, raw: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(raw);
    if path.is_absolute() {
        path.to_owned()
    } else {
        base_dir.join(path)
    }
}

/// Parse a project manifest's raw XML text.
pub fn parse_project(file: &Utf8Path, data: &str) -> ManifestResult<Project> {
    let base_dir = file.parent().unwrap_or(Utf8Path::new(".")).to_owned();
    let mut reader = Reader::from_str(data);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut tp = TableParser::new(file, true, PROJECT_TABLE);

    let mut tools_version = String::new();
    let mut default_remotes = Vec::new();
    let mut remotes: BTreeMap<String, Remote> = BTreeMap::new();
    let mut dependencies: BTreeMap<String, Dependency> = BTreeMap::new();
    let mut dependency_order: Vec<String> = Vec::new();

    let mut current_remote: Option<Remote> = None;
    let mut current_dependency: Option<Dependency> = None;

    loop {
        match tp.next_event(&mut reader, &mut buf)? {
            ParseEvent::Eof => break,
            ParseEvent::Start {
                name,
                line,
                attrs,
                empty,
            } => match name.as_str() {
                "project" => {
                    tools_version = attrs.get("toolsVersion").cloned().unwrap_or_default();
                    if !tools_version.is_empty()
                        && version_newer(&tools_version, SUPPORTED_TOOLS_VERSION)
                    {
                        warn!(
                            "manifest '{}' declares toolsVersion {} which is newer than the {} this build understands",
                            file, tools_version, SUPPORTED_TOOLS_VERSION
                        );
                    }
                    default_remotes = split_remotes(&attrs);
                }
                "remote" => {
                    let remote = parse_remote(Namespace::Project, &attrs).ok_or_else(|| {
                        ManifestError::MissingAttribute {
                            file: file.to_owned(),
                            line,
                            element: "remote".to_owned(),
                            attribute: "type".to_owned(),
                        }
                    })?;
                    if empty {
                        remotes.insert(remote.namespaced_name(), remote);
                    } else {
                        current_remote = Some(remote);
                    }
                }
                "credentials" => {
                    let creds = Credentials {
                        id: attrs.get("id").cloned().unwrap_or_default(),
                        key: attrs.get("key").cloned().unwrap_or_default(),
                        error_url: attrs.get("errorUrl").cloned(),
                    };
                    if let Some(remote) = current_remote.as_mut() {
                        remote.credentials = Some(creds);
                    }
                }
                "dependency" => {
                    let dep_name = attrs.get("name").cloned().unwrap_or_default();
                    if !is_valid_dependency_name(&dep_name) {
                        return Err(ManifestError::InvalidDependencyName {
                            file: file.to_owned(),
                            name: dep_name,
                        });
                    }
                    if dependencies.contains_key(&dep_name) {
                        return Err(ManifestError::DuplicateDependency {
                            file: file.to_owned(),
                            name: dep_name,
                        });
                    }
                    let tags = attrs.get("tags").map(|s| {
                        s.split_whitespace()
                            .map(str::to_owned)
                            .collect::<BTreeSet<_>>()
                    });
                    let dep = Dependency {
                        name: dep_name,
                        link_path: attrs
                            .get("linkPath")
                            .map(|p| resolve_relative(&base_dir, p)),
                        copy_path: attrs
                            .get("copyPath")
                            .map(|p| resolve_relative(&base_dir, p)),
                        tags,
                        children: Vec::new(),
                    };
                    if empty {
                        dependency_order.push(dep.name.clone());
                        dependencies.insert(dep.name.clone(), dep);
                    } else {
                        current_dependency = Some(dep);
                    }
                }
                "package" => {
                    let child = DependencyChild::Package(Package {
                        name: attrs.get("name").cloned().unwrap_or_default(),
                        version: attrs.get("version").cloned().unwrap_or_default(),
                        platforms: split_platforms(&attrs),
                        remotes: split_remotes(&attrs),
                    });
                    if let Some(dep) = current_dependency.as_mut() {
                        dep.children.push(child);
                    }
                }
                "source" => {
                    let child = DependencyChild::Source(Source {
                        path: resolve_relative(
                            &base_dir,
                            attrs.get("path").map(String::as_str).unwrap_or(""),
                        ),
                        platforms: split_platforms(&attrs),
                    });
                    if let Some(dep) = current_dependency.as_mut() {
                        dep.children.push(child);
                    }
                }
                "label" => {
                    let cache_expiration = attrs
                        .get("cacheExpiration")
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(0);
                    let child = DependencyChild::Label(Label {
                        name: attrs.get("name").cloned().unwrap_or_default(),
                        platforms: split_platforms(&attrs),
                        remotes: split_remotes(&attrs),
                        cache_expiration,
                    });
                    if let Some(dep) = current_dependency.as_mut() {
                        dep.children.push(child);
                    }
                }
                _ => {}
            },
            ParseEvent::End { name, .. } => match name.as_str() {
                "remote" => {
                    if let Some(remote) = current_remote.take() {
                        remotes.insert(remote.namespaced_name(), remote);
                    }
                }
                "dependency" => {
                    if let Some(dep) = current_dependency.take() {
                        dependency_order.push(dep.name.clone());
                        dependencies.insert(dep.name.clone(), dep);
                    }
                }
                _ => {}
            },
        }
    }

    Ok(Project {
        tools_version,
        default_remotes,
        remotes,
        dependencies,
        dependency_order,
        source_path: file.to_owned(),
    })
}

/// Parse a config file's raw XML text. Unknown elements/attributes are
/// silently ignored (`fail_on_unhandled_data = false`), matching the
/// original tool's `ConfigParser`.
pub fn parse_config(file: &Utf8Path, data: &str) -> ManifestResult<Config> {
    let mut reader = Reader::from_str(data);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut tp = TableParser::new(file, false, CONFIG_TABLE);

    let mut default_remotes = Vec::new();
    let mut remotes: BTreeMap<String, Remote> = BTreeMap::new();
    let mut cache_policy = CachePolicy::default();
    let mut current_remote: Option<Remote> = None;

    loop {
        match tp.next_event(&mut reader, &mut buf)? {
            ParseEvent::Eof => break,
            ParseEvent::Start {
                name,
                attrs,
                empty,
                ..
            } => match name.as_str() {
                "config" => {
                    default_remotes = split_remotes(&attrs);
                }
                "remote" => {
                    if let Some(remote) = parse_remote(Namespace::User, &attrs) {
                        if empty {
                            remotes.insert(remote.namespaced_name(), remote);
                        } else {
                            current_remote = Some(remote);
                        }
                    }
                }
                "credentials" => {
                    let creds = Credentials {
                        id: attrs.get("id").cloned().unwrap_or_default(),
                        key: attrs.get("key").cloned().unwrap_or_default(),
                        error_url: attrs.get("errorUrl").cloned(),
                    };
                    if let Some(remote) = current_remote.as_mut() {
                        remote.credentials = Some(creds);
                    }
                }
                "cache" => {
                    cache_policy.remove_previous_package_on_label_update = attrs
                        .get("removePreviousPackageOnLabelUpdate")
                        .map(|s| s == "true");
                }
                _ => {}
            },
            ParseEvent::End { name, .. } => {
                if name == "remote" {
                    if let Some(remote) = current_remote.take() {
                        remotes.insert(remote.namespaced_name(), remote);
                    }
                }
            }
        }
    }

    Ok(Config {
        default_remotes,
        remotes,
        cache_policy,
    })
}

fn is_valid_dependency_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Crude dotted-version comparison used only to decide whether to emit the
/// "unsupported toolsVersion" warning; not a general semver comparator.
fn version_newer(candidate: &str, supported: &str) -> bool {
    let c: Vec<u64> = candidate.split('.').filter_map(|p| p.parse().ok()).collect();
    let s: Vec<u64> = supported.split('.').filter_map(|p| p.parse().ok()).collect();
    c > s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_project() {
        let xml = r#"
            <project toolsVersion="6.0" remotes="cloudfront">
                <remote name="cloudfront" type="http" packageLocation="https://example.test/${name}@${version}.zip"/>
                <dependency name="foo">
                    <package name="foo" version="1.0" platforms="windows-*"/>
                    <package name="foo" version="1.0"/>
                </dependency>
            </project>
        "#;
        let project = parse_project(Utf8Path::new("proj.packman.xml"), xml).unwrap();
        assert_eq!(project.tools_version, "6.0");
        assert_eq!(project.dependency_order, vec!["foo".to_owned()]);
        let dep = &project.dependencies["foo"];
        assert_eq!(dep.children.len(), 2);
        assert!(project.remotes.contains_key("project:cloudfront"));
    }

    #[test]
    fn rejects_unknown_element() {
        let xml = r#"<project><bogus/></project>"#;
        let err = parse_project(Utf8Path::new("proj.packman.xml"), xml).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownElement { .. }));
    }

    #[test]
    fn rejects_invalid_dependency_name() {
        let xml = r#"<project><dependency name="bad name"><source path="."/></dependency></project>"#;
        let err = parse_project(Utf8Path::new("proj.packman.xml"), xml).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDependencyName { .. }));
    }

    #[test]
    fn config_ignores_unknown_data() {
        let xml = r#"<config unknownAttr="1"><futureElement/><cache removePreviousPackageOnLabelUpdate="true"/></config>"#;
        let config = parse_config(Utf8Path::new("config.packman.xml"), xml).unwrap();
        assert_eq!(
            config.cache_policy.remove_previous_package_on_label_update,
            Some(true)
        );
    }
}
