use std::fmt;

use serde::Deserialize;

use crate::{errors::*, AuthorizationTokens, SelfUpdater, UpdateRequest, Version};

pub(crate) mod github;

/// A struct representing a specific release.
#[derive(Clone, Debug)]
pub struct Release {
    /// The tag this release represents
    pub tag_name: String,
    /// The version this release represents
    pub version: Version,
    /// The name of the release
    pub name: String,
    /// The URL at which this release lists
    pub url: String,
    /// All assets associated with this release
    pub assets: Vec<Asset>,
    /// Whether or not this release is a prerelease
    pub prerelease: bool,
}

/// Represents a specific asset inside a release.
#[derive(Clone, Debug)]
pub struct Asset {
    /// The URL at which this asset can be found
    pub url: String,
    /// The URL at which this asset can be downloaded
    pub browser_download_url: String,
    /// This asset's name
    pub name: String,
}

/// Where this app's releases are hosted
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseSourceType {
    /// GitHub Releases
    GitHub,
}

impl fmt::Display for ReleaseSourceType {
    /// Returns a string representation of this ReleaseSourceType.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::GitHub => write!(f, "github"),
        }
    }
}

/// Information about the source of this app's releases
#[derive(Clone, Debug, Deserialize)]
pub struct ReleaseSource {
    /// Which hosting service to query for new releases
    pub release_type: ReleaseSourceType,
    /// Owner, in GitHub name-with-owner format
    pub owner: String,
    /// Name, in GitHub name-with-owner format
    pub name: String,
    /// The app's name; this can be distinct from the repository name above
    pub app_name: String,
}

impl SelfUpdater {
    /// Configures the updater to use a specific GitHub token when performing
    /// requests. This is useful in circumstances where the user may encounter
    /// rate limits, and is necessary to access private repositories.
    /// This must have the `repo` scope enabled.
    pub fn set_github_token(&mut self, token: &str) -> &mut SelfUpdater {
        self.tokens.github = Some(token.to_owned());

        self
    }

    pub(crate) async fn fetch_release(&mut self) -> UpdaterResult<()> {
        let Some(app_name) = &self.name else {
            return Err(UpdaterError::NotConfigured {
                missing_field: "app_name".to_owned(),
            });
        };
        let Some(source) = &self.source else {
            return Err(UpdaterError::NotConfigured {
                missing_field: "source".to_owned(),
            });
        };

        let release = match self.version_specifier.to_owned() {
            UpdateRequest::Latest => {
                get_latest_stable_release(&source.name, &source.owner, &source.app_name, &self.tokens)
                    .await?
            }
            UpdateRequest::LatestMaybePrerelease => {
                get_latest_maybe_prerelease(
                    &source.name,
                    &source.owner,
                    &source.app_name,
                    &self.tokens,
                )
                .await?
            }
            UpdateRequest::SpecificTag(version) => {
                get_specific_tag(
                    &source.name,
                    &source.owner,
                    &source.app_name,
                    &version,
                    &self.tokens,
                )
                .await?
            }
            UpdateRequest::SpecificVersion(version) => {
                get_specific_version(
                    &source.name,
                    &source.owner,
                    &source.app_name,
                    &version.parse::<Version>()?,
                    &self.tokens,
                )
                .await?
            }
        };

        let Some(release) = release else {
            return Err(UpdaterError::NoStableReleases {
                app_name: app_name.to_owned(),
            });
        };

        self.requested_release = Some(release);

        Ok(())
    }
}

pub(crate) async fn get_specific_version(
    name: &str,
    owner: &str,
    app_name: &str,
    version: &Version,
    tokens: &AuthorizationTokens,
) -> UpdaterResult<Option<Release>> {
    let release =
        github::get_specific_github_version(name, owner, app_name, version, &tokens.github)
            .await?;

    Ok(Some(release))
}

pub(crate) async fn get_specific_tag(
    name: &str,
    owner: &str,
    app_name: &str,
    tag: &str,
    tokens: &AuthorizationTokens,
) -> UpdaterResult<Option<Release>> {
    let release =
        github::get_specific_github_tag(name, owner, app_name, tag, &tokens.github).await?;

    Ok(Some(release))
}

pub(crate) async fn get_release_list(
    name: &str,
    owner: &str,
    app_name: &str,
    tokens: &AuthorizationTokens,
) -> UpdaterResult<Vec<Release>> {
    github::get_github_releases(name, owner, app_name, &tokens.github).await
}

/// Get the latest stable release
pub(crate) async fn get_latest_stable_release(
    name: &str,
    owner: &str,
    app_name: &str,
    tokens: &AuthorizationTokens,
) -> UpdaterResult<Option<Release>> {
    // GitHub has an API to request the latest stable release directly,
    // which saves us from paginating through the full release list below.
    if let Ok(Some(release)) =
        github::get_latest_github_release(name, owner, app_name, &tokens.github).await
    {
        return Ok(Some(release));
    }

    let releases = get_release_list(name, owner, app_name, tokens).await?;
    Ok(releases
        .into_iter()
        .filter(|r| !r.prerelease)
        .max_by_key(|r| r.version.clone()))
}

/// Get the latest release, allowing for prereleases
pub(crate) async fn get_latest_maybe_prerelease(
    name: &str,
    owner: &str,
    app_name: &str,
    tokens: &AuthorizationTokens,
) -> UpdaterResult<Option<Release>> {
    let releases = get_release_list(name, owner, app_name, tokens).await?;
    Ok(releases.into_iter().max_by_key(|r| r.version.clone()))
}
