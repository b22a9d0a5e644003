//! Tag filtering, platform matching and `${platform}` substitution: turns a
//! declared [`Dependency`] (with all its platform-qualified children) into
//! at most one resolved child for a given platform/tag-filter request.

use std::collections::BTreeSet;

use tracing::info;

use crate::errors::{ManifestError, ManifestResult};
use crate::model::{Dependency, DependencyChild, Label, Package, Source};

/// A dependency collapsed down to the single child selected for a platform,
/// or `None` if no child matched.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    /// Original dependency name.
    pub name: String,
    /// Copied from the declaring [`Dependency`].
    pub link_path: Option<camino::Utf8PathBuf>,
    /// Copied from the declaring [`Dependency`].
    pub copy_path: Option<camino::Utf8PathBuf>,
    /// The one child that survived tag filtering and platform matching,
    /// with `${platform}` already substituted into its name/version/path.
    pub child: DependencyChild,
}

/// Resolve `dep` against `platform` (`None` means "no platform specified on
/// the command line") and an optional tag include/exclude filter.
///
/// Mirrors the original tool's two-step `is_filtered_in` then
/// `get_best_match_for_platform` pipeline exactly, including the
/// non-obvious precedence rules documented on each helper below.
pub fn resolve(
    dep: &Dependency,
    platform: Option<&str>,
    include_tags: Option<&BTreeSet<String>>,
    exclude_tags: Option<&BTreeSet<String>>,
) -> ManifestResult<Option<ResolvedDependency>> {
    if !is_filtered_in(dep, include_tags, exclude_tags) {
        return Ok(None);
    }
    let Some(candidate) = best_match_for_platform(dep, platform) else {
        return Ok(None);
    };
    let child = substitute_platform(&dep.name, candidate, platform)?;
    Ok(Some(ResolvedDependency {
        name: dep.name.clone(),
        link_path: dep.link_path.clone(),
        copy_path: dep.copy_path.clone(),
        child,
    }))
}

/// True iff `dep` should be considered at all, given the include/exclude
/// tag filters.
///
/// `include_tags = Some(_)` (even an empty set) excludes every untagged
/// dependency by default; a dependency that declares at least one tag in
/// `include_tags` flips back to included. `exclude_tags` is checked last
/// and can override an inclusion back out. A dependency declaring no tags
/// at all always passes when only `exclude_tags` is active.
fn is_filtered_in(
    dep: &Dependency,
    include_tags: Option<&BTreeSet<String>>,
    exclude_tags: Option<&BTreeSet<String>>,
) -> bool {
    let filters_active = include_tags.is_some() || exclude_tags.map_or(false, |t| !t.is_empty());
    if !filters_active {
        return true;
    }
    let mut add = include_tags.is_none();
    if let Some(tags) = &dep.tags {
        if let Some(include) = include_tags {
            if tags.iter().any(|t| include.contains(t)) {
                info!("including dependency '{}' due to tag match", dep.name);
                add = true;
            }
        }
        if let Some(exclude) = exclude_tags {
            if tags.iter().any(|t| exclude.contains(t)) {
                info!("excluding dependency '{}' due to tag match", dep.name);
                add = false;
            }
        }
    }
    add
}

/// Pick the child that best matches `platform`.
///
/// Priority, highest first:
/// 1. An unqualified child (no `platforms` attribute), when `platform` is
///    `None` -- exact match, search stops immediately.
/// 2. Among qualified children, one whose pattern list contains `platform`
///    verbatim -- exact match, search stops immediately.
/// 3. Among qualified children, the one whose longest wildcard pattern has
///    the `*` furthest into the string (ties keep the first one found) and
///    whose glob actually matches `platform`.
/// 4. An unqualified child, as a fallback, when `platform` is `Some(_)` and
///    nothing qualified matched.
///
/// An unqualified child only ever satisfies (1) or (4); it can never be
/// the "exact" match for a concrete platform.
fn best_match_for_platform<'d>(
    dep: &'d Dependency,
    platform: Option<&str>,
) -> Option<&'d DependencyChild> {
    let mut candidate: Option<&DependencyChild> = None;
    let mut candidate_match_pos: i64 = 0;

    for child in &dep.children {
        let platforms = child.platforms();
        if platforms.is_unqualified() {
            if platform.is_none() {
                return Some(child);
            }
            if candidate_match_pos > 0 {
                continue;
            }
            candidate = Some(child);
        } else if let Some(platform) = platform {
            if platforms.patterns.iter().any(|p| p == platform) {
                return Some(child);
            }
            for pattern in &platforms.patterns {
                let pos = wildcard_prefix_len(pattern);
                if pos > candidate_match_pos && glob_match(pattern, platform) {
                    candidate = Some(child);
                    candidate_match_pos = pos;
                }
            }
        }
    }
    candidate
}

/// Length of the literal prefix before the first `*` or `?` in a pattern,
/// used to rank wildcard specificity: the longer the fixed prefix, the
/// more specific the match. A pattern with no wildcard at all (shouldn't
/// occur here since exact matches return earlier) ranks by its full length.
fn wildcard_prefix_len(pattern: &str) -> i64 {
    pattern
        .find(['*', '?'])
        .unwrap_or(pattern.len()) as i64
}

/// Translate a `*`/`?` platform wildcard into an anchored regex-free glob
/// match. `*` matches any run of characters, `?` matches exactly one.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn helper(pattern: &[u8], candidate: &[u8]) -> bool {
        match (pattern.first(), candidate.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                helper(&pattern[1..], candidate)
                    || (!candidate.is_empty() && helper(pattern, &candidate[1..]))
            }
            (Some(b'?'), Some(_)) => helper(&pattern[1..], &candidate[1..]),
            (Some(p), Some(c)) if p == c => helper(&pattern[1..], &candidate[1..]),
            _ => false,
        }
    }
    helper(pattern.as_bytes(), candidate.as_bytes())
}

/// Substitute `${platform}`/`$platform` into the name/version/path of a
/// resolved child, returning a fresh owned copy (the declared template is
/// left untouched so re-resolution against a different platform works).
fn substitute_platform(
    dependency: &str,
    child: &DependencyChild,
    platform: Option<&str>,
) -> ManifestResult<DependencyChild> {
    let platform_str = platform.unwrap_or("");
    let subst = |template: &str| substitute_platform_var(dependency, template, platform_str);
    match child {
        DependencyChild::Package(pkg) => Ok(DependencyChild::Package(Package {
            name: subst(&pkg.name)?,
            version: subst(&pkg.version)?,
            platforms: pkg.platforms.clone(),
            remotes: pkg.remotes.clone(),
        })),
        DependencyChild::Source(src) => Ok(DependencyChild::Source(Source {
            path: subst(src.path.as_str())?.into(),
            platforms: src.platforms.clone(),
        })),
        DependencyChild::Label(label) => Ok(DependencyChild::Label(Label {
            name: subst(&label.name)?,
            platforms: label.platforms.clone(),
            remotes: label.remotes.clone(),
            cache_expiration: label.cache_expiration,
        })),
    }
}

/// The only template variable a resolved child's name/version/path may
/// reference is `platform`; any other `${...}` token is an error.
fn substitute_platform_var(
    dependency: &str,
    template: &str,
    platform: &str,
) -> ManifestResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let braced = matches!(chars.peek(), Some((_, '{')));
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if braced {
            match chars.next() {
                Some((_, '}')) => {}
                _ => {
                    return Err(ManifestError::UnknownVariable {
                        dependency: dependency.to_owned(),
                        var: name,
                    })
                }
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        if name == "platform" {
            out.push_str(platform);
        } else {
            return Err(ManifestError::UnknownVariable {
                dependency: dependency.to_owned(),
                var: name,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlatformSet;

    fn pkg(name: &str, version: &str, platforms: &[&str]) -> DependencyChild {
        DependencyChild::Package(Package {
            name: name.to_owned(),
            version: version.to_owned(),
            platforms: PlatformSet {
                patterns: platforms.iter().map(|s| s.to_string()).collect(),
            },
            remotes: Vec::new(),
        })
    }

    fn dep_with(children: Vec<DependencyChild>, tags: Option<BTreeSet<String>>) -> Dependency {
        Dependency {
            name: "foo".to_owned(),
            link_path: None,
            copy_path: None,
            tags,
            children,
        }
    }

    #[test]
    fn exact_platform_match_wins() {
        let dep = dep_with(
            vec![
                pkg("foo", "1.0", &["windows-*"]),
                pkg("foo", "2.0", &["linux-x86_64"]),
            ],
            None,
        );
        let resolved = resolve(&dep, Some("linux-x86_64"), None, None)
            .unwrap()
            .unwrap();
        match resolved.child {
            DependencyChild::Package(p) => assert_eq!(p.version, "2.0"),
            _ => panic!("expected package"),
        }
    }

    #[test]
    fn wildcard_specificity_breaks_ties() {
        let dep = dep_with(
            vec![pkg("foo", "1.0", &["*"]), pkg("foo", "2.0", &["linux-*"])],
            None,
        );
        let resolved = resolve(&dep, Some("linux-x86_64"), None, None)
            .unwrap()
            .unwrap();
        match resolved.child {
            DependencyChild::Package(p) => assert_eq!(p.version, "2.0"),
            _ => panic!("expected package"),
        }
    }

    #[test]
    fn question_mark_only_pattern_still_matches() {
        let dep = dep_with(vec![pkg("foo", "1.0", &["lin?x-x86_64"])], None);
        let resolved = resolve(&dep, Some("linux-x86_64"), None, None)
            .unwrap()
            .unwrap();
        match resolved.child {
            DependencyChild::Package(p) => assert_eq!(p.version, "1.0"),
            _ => panic!("expected package"),
        }
    }

    #[test]
    fn unqualified_child_is_exact_match_for_null_platform() {
        let dep = dep_with(
            vec![pkg("foo", "1.0", &["windows-*"]), pkg("foo", "2.0", &[])],
            None,
        );
        let resolved = resolve(&dep, None, None, None).unwrap().unwrap();
        match resolved.child {
            DependencyChild::Package(p) => assert_eq!(p.version, "2.0"),
            _ => panic!("expected package"),
        }
    }

    #[test]
    fn empty_include_tags_excludes_untagged_dependency() {
        let dep = dep_with(vec![pkg("foo", "1.0", &[])], None);
        let include: BTreeSet<String> = BTreeSet::new();
        let resolved = resolve(&dep, None, Some(&include), None).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn exclude_overrides_include() {
        let mut tags = BTreeSet::new();
        tags.insert("beta".to_owned());
        tags.insert("large".to_owned());
        let dep = dep_with(vec![pkg("foo", "1.0", &[])], Some(tags));
        let mut include = BTreeSet::new();
        include.insert("beta".to_owned());
        let mut exclude = BTreeSet::new();
        exclude.insert("large".to_owned());
        let resolved = resolve(&dep, None, Some(&include), Some(&exclude)).unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn platform_template_substitution() {
        let dep = dep_with(vec![pkg("foo-${platform}", "1.0", &["linux-x86_64"])], None);
        let resolved = resolve(&dep, Some("linux-x86_64"), None, None)
            .unwrap()
            .unwrap();
        match resolved.child {
            DependencyChild::Package(p) => assert_eq!(p.name, "foo-linux-x86_64"),
            _ => panic!("expected package"),
        }
    }

    #[test]
    fn unknown_template_variable_errors() {
        let dep = dep_with(vec![pkg("foo-${bogus}", "1.0", &[])], None);
        let err = resolve(&dep, None, None, None).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownVariable { .. }));
    }
}
