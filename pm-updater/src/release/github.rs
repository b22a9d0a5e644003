//! Fetching and processing from GitHub Releases

use super::{Asset, Release};
use crate::{app_name_to_env_var, errors::*};
use reqwest::header::{ACCEPT, USER_AGENT};
use semver::Version;
use serde::Deserialize;
use std::env;
use url::Url;

fn github_api(app_name: &str) -> UpdaterResult<String> {
    let formatted_app_name = app_name_to_env_var(app_name);
    let ghe_env_var = format!("{}_UPDATER_GHE_BASE_URL", formatted_app_name);
    let github_env_var = format!("{}_UPDATER_GITHUB_BASE_URL", formatted_app_name);

    if env::var(&ghe_env_var).is_ok() && env::var(&github_env_var).is_ok() {
        return Err(UpdaterError::MultipleGitHubAPIs {
            ghe_env_var,
            github_env_var,
        });
    }

    if let Ok(value) = env::var(&ghe_env_var) {
        let parsed = Url::parse(&value)?;
        Ok(parsed.join("api/v3")?.to_string())
    } else if let Ok(value) = env::var(&github_env_var) {
        let parsed = Url::parse(&value)?;
        let Some(domain) = parsed.domain() else {
            return Err(UpdaterError::GitHubDomainParseError {
                env_var: github_env_var,
                ghe_env_var,
                url: value,
            });
        };
        let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();
        Ok(format!("{}://api.{}{}", parsed.scheme(), domain, port))
    } else {
        Ok("https://api.github.com".to_string())
    }
}

/// True if this asset's name looks like a release archive for `app_name`,
/// using the same `.7z`/`.zip` wire convention as the rest of the package
/// store, as opposed to a checksum file or unrelated attachment.
fn is_release_asset(app_name: &str, asset_name: &str) -> bool {
    asset_name.starts_with(&format!("{app_name}-"))
        && (asset_name.ends_with(".7z") || asset_name.ends_with(".zip"))
}

/// A struct representing a specific GitHub Release
#[derive(Clone, Debug, Deserialize)]
pub struct GithubRelease {
    /// The tag this release represents
    pub tag_name: String,
    /// The name of the release
    pub name: String,
    /// The URL at which this release lists
    pub url: String,
    /// All assets associated with this release
    pub assets: Vec<GithubAsset>,
    /// Whether or not this release is a prerelease
    pub prerelease: bool,
}

/// Represents a specific asset inside a GitHub Release.
#[derive(Clone, Debug, Deserialize)]
pub struct GithubAsset {
    /// The URL at which this asset can be found
    pub url: String,
    /// The URL at which this asset can be downloaded
    pub browser_download_url: String,
    /// This asset's name
    pub name: String,
}

pub(crate) async fn get_latest_github_release(
    name: &str,
    owner: &str,
    app_name: &str,
    token: &Option<String>,
) -> UpdaterResult<Option<Release>> {
    let client = reqwest::Client::new();
    let api: String = github_api(app_name)?;
    let mut request = client
        .get(format!("{api}/repos/{owner}/{name}/releases/latest"))
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, format!("pm-updater/{}", env!("CARGO_PKG_VERSION")));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let gh_release: GithubRelease = request
        .send()
        .await?
        .error_for_status()
        .map_err(|_| UpdaterError::NoStableReleases {
            app_name: app_name.to_owned(),
        })?
        .json()
        .await?;

    // Ensure that this release contains a release tarball; if not, it may be
    // a mismarked "latest" release that's not installable by us. Returning
    // None here lets the caller fall back to iterating every release.
    if !gh_release
        .assets
        .iter()
        .any(|asset| is_release_asset(app_name, &asset.name))
    {
        return Ok(None);
    }

    Release::try_from_github(app_name, gh_release).map(Some)
}

pub(crate) async fn get_specific_github_tag(
    name: &str,
    owner: &str,
    app_name: &str,
    tag: &str,
    token: &Option<String>,
) -> UpdaterResult<Release> {
    let client = reqwest::Client::new();
    let api: String = github_api(app_name)?;
    let mut request = client
        .get(format!("{api}/repos/{owner}/{name}/releases/tags/{tag}"))
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, format!("pm-updater/{}", env!("CARGO_PKG_VERSION")));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let gh_release: GithubRelease = request
        .send()
        .await?
        .error_for_status()
        .map_err(|_| UpdaterError::VersionNotFound {
            name: name.to_owned(),
            app_name: app_name.to_owned(),
            version: tag.to_owned(),
        })?
        .json()
        .await?;

    Release::try_from_github(app_name, gh_release)
}

pub(crate) async fn get_specific_github_version(
    name: &str,
    owner: &str,
    app_name: &str,
    version: &Version,
    token: &Option<String>,
) -> UpdaterResult<Release> {
    let releases = get_github_releases(name, owner, app_name, token).await?;
    let release = releases.into_iter().find(|r| &r.version == version);

    if let Some(release) = release {
        Ok(release)
    } else {
        Err(UpdaterError::VersionNotFound {
            name: name.to_owned(),
            app_name: app_name.to_owned(),
            version: version.to_string(),
        })
    }
}

pub(crate) async fn get_github_releases(
    name: &str,
    owner: &str,
    app_name: &str,
    token: &Option<String>,
) -> UpdaterResult<Vec<Release>> {
    let client = reqwest::Client::new();
    let api: String = github_api(app_name)?;
    let mut url = format!("{api}/repos/{owner}/{name}/releases");
    let mut pages_remain = true;
    let mut data: Vec<Release> = vec![];

    while pages_remain {
        let resp = get_releases(&client, &url, token).await?;

        let headers = resp.headers();
        let link_header = &headers.get(reqwest::header::LINK).as_ref().map(|v| {
            v.to_str()
                .expect("Link header was not ASCII")
                .to_string()
        });

        let mut body: Vec<Release> = resp
            .json::<Vec<GithubRelease>>()
            .await?
            .into_iter()
            .filter_map(|gh| Release::try_from_github(app_name, gh).ok())
            .collect();
        data.append(&mut body);

        pages_remain = if let Some(link_header) = link_header {
            if link_header.contains("rel=\"next\"") {
                url = get_next_url(link_header).expect("detected a next link but it was a lie");
                true
            } else {
                false
            }
        } else {
            false
        };
    }

    Ok(data
        .into_iter()
        .filter(|r| r.assets.iter().any(|asset| is_release_asset(app_name, &asset.name)))
        .collect())
}

// The format of the header looks like so:
// ```
// <https://api.github.com/repositories/1300192/issues?page=2>; rel="prev", <https://api.github.com/repositories/1300192/issues?page=4>; rel="next", <https://api.github.com/repositories/1300192/issues?page=515>; rel="last", <https://api.github.com/repositories/1300192/issues?page=1>; rel="first"
// ```
fn get_next_url(link_header: &str) -> Option<String> {
    let links = link_header.split(',').collect::<Vec<_>>();
    for entry in links {
        if entry.contains("next") {
            let mut link = entry.split(';').collect::<Vec<_>>()[0]
                .to_string()
                .trim()
                .to_string();
            link.remove(0);
            link.pop();
            return Some(link);
        }
    }
    None
}

pub(crate) async fn get_releases(
    client: &reqwest::Client,
    url: &str,
    token: &Option<String>,
) -> UpdaterResult<reqwest::Response> {
    let mut request = client
        .get(url)
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, format!("pm-updater/{}", env!("CARGO_PKG_VERSION")))
        .header("X-GitHub-Api-Version", "2022-11-28");
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    Ok(request.send().await?.error_for_status()?)
}

impl Release {
    /// Constructs a release from GitHub Releases data.
    pub(crate) fn try_from_github(_package_name: &str, release: GithubRelease) -> UpdaterResult<Release> {
        let version = Version::parse(release.tag_name.trim_start_matches('v'))?;
        Ok(Release {
            tag_name: release.tag_name,
            version,
            name: release.name,
            url: String::new(),
            assets: release
                .assets
                .into_iter()
                .map(|asset| Asset {
                    url: asset.url,
                    browser_download_url: asset.browser_download_url,
                    name: asset.name,
                })
                .collect(),
            prerelease: release.prerelease,
        })
    }
}

#[cfg(test)]
mod test {
    use super::{get_next_url, github_api};
    use std::env;

    #[test]
    fn test_link_header_parse() {
        let sample = r#"
    <https://api.github.com/repositories/1300192/issues?page=2>; rel="prev", <https://api.github.com/repositories/1300192/issues?page=4>; rel="next", <https://api.github.com/repositories/1300192/issues?page=515>; rel="last", <https://api.github.com/repositories/1300192/issues?page=1>; rel="first"
    "#;

        let result = get_next_url(sample);
        assert!(result.is_some());
        assert_eq!(
            "https://api.github.com/repositories/1300192/issues?page=4",
            result.unwrap()
        );
    }

    #[test]
    fn test_link_header_parse_next_missing() {
        let sample = r#"
    <https://api.github.com/repositories/1300192/issues?page=2>; rel="prev", <https://api.github.com/repositories/1300192/issues?page=515>; rel="last", <https://api.github.com/repositories/1300192/issues?page=1>; rel="first"
    "#;

        let result = get_next_url(sample);
        assert!(result.is_none());
    }

    #[test]
    fn test_link_header_parse_empty_header() {
        let sample = "";

        let result = get_next_url(sample);
        assert!(result.is_none());
    }

    #[test]
    fn test_github_api_no_env_var() {
        env::remove_var("NOENVVARAPP_UPDATER_GITHUB_BASE_URL");
        let result = github_api("noenvvarapp").unwrap();

        assert_eq!(result, "https://api.github.com");
    }

    #[test]
    fn test_github_api_overwrite() {
        env::set_var("OVERWRITEAPP_UPDATER_GITHUB_BASE_URL", "https://magic.com");
        let result = github_api("overwriteapp").unwrap();
        env::remove_var("OVERWRITEAPP_UPDATER_GITHUB_BASE_URL");

        assert_eq!(result, "https://api.magic.com");
    }

    #[test]
    fn test_github_api_overwrite_ip() {
        env::set_var("IPAPP_UPDATER_GITHUB_BASE_URL", "https://127.0.0.1");
        let result = github_api("ipapp");
        env::remove_var("IPAPP_UPDATER_GITHUB_BASE_URL");
        assert!(result.is_err());
    }

    #[test]
    fn test_github_api_overwrite_port() {
        env::set_var("PORTAPP_UPDATER_GITHUB_BASE_URL", "https://magic.com:8000");
        let result = github_api("portapp").unwrap();
        env::remove_var("PORTAPP_UPDATER_GITHUB_BASE_URL");

        assert_eq!(result, "https://api.magic.com:8000");
    }

    #[test]
    fn test_github_api_overwrite_bad_value() {
        env::set_var("BADAPP_UPDATER_GITHUB_BASE_URL", "this is not a url");
        let result = github_api("badapp");
        env::remove_var("BADAPP_UPDATER_GITHUB_BASE_URL");
        assert!(result.is_err());
    }

    #[test]
    fn test_ghe_api_no_env_var() {
        env::remove_var("NOGHEAPP_UPDATER_GHE_BASE_URL");
        let result = github_api("nogheapp").unwrap();

        assert_eq!(result, "https://api.github.com");
    }

    #[test]
    fn test_ghe_api_overwrite() {
        env::set_var("GHEAPP_UPDATER_GHE_BASE_URL", "https://magic.com");
        let result = github_api("gheapp").unwrap();
        env::remove_var("GHEAPP_UPDATER_GHE_BASE_URL");

        assert_eq!(result, "https://magic.com/api/v3");
    }

    #[test]
    fn test_ghe_ip_api_overwrite() {
        env::set_var("GHEIPAPP_UPDATER_GHE_BASE_URL", "https://127.0.0.1");
        let result = github_api("gheipapp").unwrap();
        env::remove_var("GHEIPAPP_UPDATER_GHE_BASE_URL");

        assert_eq!(result, "https://127.0.0.1/api/v3");
    }
}
