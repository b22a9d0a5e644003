//! Remote name resolution (bare-name suffix match across namespaces) and
//! lazy, memoized [`Transport`] construction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pm_manifest::model::{Remote, RemoteKind};
use pm_transport::{Credentials, GtlTransport, HttpTransport, S3Transport, Transport};

use crate::errors::{CoreError, CoreResult};

/// All remotes known to a run (merged from the project manifest and both
/// config scopes), plus the default cascade order, and a cache of the
/// [`Transport`] objects already built for remotes that have actually been
/// used.
pub struct RemoteCascade {
    remotes: HashMap<String, Remote>,
    default_order: Vec<String>,
    transports: Mutex<HashMap<String, Arc<dyn Transport>>>,
}

impl RemoteCascade {
    /// Builds a cascade from the namespaced remote map and the declared
    /// default order (which may itself contain bare names still needing
    /// resolution).
    pub fn new(remotes: HashMap<String, Remote>, default_order: Vec<String>) -> Self {
        Self {
            remotes,
            default_order,
            transports: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a possibly-bare remote name to its namespaced form.
    ///
    /// A name already containing `:` is assumed namespaced and must exist
    /// verbatim. A bare name is matched by suffix across every configured
    /// namespace (`project:`, `user:`, `packman:`); zero matches is
    /// [`CoreError::RemoteUndefined`], more than one is a resolution
    /// failure surfaced as the manifest crate's ambiguity error.
    pub fn resolve_name(&self, name: &str) -> CoreResult<String> {
        if name.contains(':') {
            return if self.remotes.contains_key(name) {
                Ok(name.to_string())
            } else {
                Err(CoreError::RemoteUndefined {
                    name: name.to_string(),
                })
            };
        }

        let mut candidates: Vec<&String> = self
            .remotes
            .keys()
            .filter(|namespaced| namespaced.ends_with(&format!(":{name}")))
            .collect();
        candidates.sort();

        match candidates.len() {
            0 => Err(CoreError::RemoteUndefined {
                name: name.to_string(),
            }),
            1 => Ok(candidates[0].clone()),
            _ => Err(CoreError::Manifest(pm_manifest::ManifestError::RemoteAmbiguous {
                name: name.to_string(),
                candidates: candidates.into_iter().cloned().collect(),
            })),
        }
    }

    /// The resolved cascade for a dependency: its own per-child remotes (in
    /// declared order), followed by the resolved project/config default
    /// order. Names are resolved but not deduplicated -- a remote named
    /// twice is simply consulted twice, which is harmless since `head` is
    /// idempotent.
    pub fn cascade_for(&self, dependency_remotes: &[String]) -> CoreResult<Vec<String>> {
        let mut out = Vec::with_capacity(dependency_remotes.len() + self.default_order.len());
        for name in dependency_remotes.iter().chain(self.default_order.iter()) {
            out.push(self.resolve_name(name)?);
        }
        Ok(out)
    }

    /// Looks up a remote's declared record without resolving or building a
    /// transport for it.
    pub fn remote(&self, namespaced_name: &str) -> Option<&Remote> {
        self.remotes.get(namespaced_name)
    }

    /// Every configured remote, namespaced name alongside its record. Used
    /// by the `remotes` CLI command; iteration order is unspecified.
    pub fn all(&self) -> impl Iterator<Item = (&String, &Remote)> {
        self.remotes.iter()
    }

    /// Returns the (possibly newly constructed) transport for a namespaced
    /// remote name, resolving its credentials from the environment on this
    /// first use and caching the result for the lifetime of this cascade.
    pub fn transport_for(&self, namespaced_name: &str) -> CoreResult<Arc<dyn Transport>> {
        if let Some(existing) = self.transports.lock().unwrap().get(namespaced_name) {
            return Ok(existing.clone());
        }

        let remote = self.remotes.get(namespaced_name).ok_or_else(|| CoreError::RemoteUndefined {
            name: namespaced_name.to_string(),
        })?;

        let transport = build_transport(namespaced_name, remote)?;
        self.transports
            .lock()
            .unwrap()
            .insert(namespaced_name.to_string(), transport.clone());
        Ok(transport)
    }
}

fn resolve_credentials(namespaced_name: &str, remote: &Remote) -> CoreResult<Option<Credentials>> {
    let Some(creds) = &remote.credentials else {
        return Ok(None);
    };
    let id = std::env::var(&creds.id).map_err(|_| CoreError::CredentialsMissing {
        remote: namespaced_name.to_string(),
        env_var: creds.id.clone(),
    })?;
    let key = std::env::var(&creds.key).map_err(|_| CoreError::CredentialsMissing {
        remote: namespaced_name.to_string(),
        env_var: creds.key.clone(),
    })?;
    Ok(Some(Credentials { id, key }))
}

/// Splits an S3-style location template's authority into `(bucket,
/// endpoint)`: the first DNS label is the bucket, the remainder is the
/// endpoint host the bucket is virtually-hosted under.
fn split_s3_authority(template: &str) -> CoreResult<(String, String, String)> {
    let url = url::Url::parse(template).map_err(|e| {
        CoreError::Transport(pm_transport::TransportError::InvalidUrl {
            remote: template.to_string(),
            details: e.to_string(),
        })
    })?;
    let host = url.host_str().ok_or_else(|| {
        CoreError::Transport(pm_transport::TransportError::InvalidUrl {
            remote: template.to_string(),
            details: "URL has no host".to_string(),
        })
    })?;
    let Some((bucket, endpoint)) = host.split_once('.') else {
        return Err(CoreError::Transport(pm_transport::TransportError::InvalidUrl {
            remote: template.to_string(),
            details: format!("host '{host}' has no bucket subdomain"),
        }));
    };
    // region is conventionally the second label of an AWS S3 endpoint
    // (s3.<region>.amazonaws.com); default to the whole endpoint if the
    // convention doesn't hold, which still produces a stable signature.
    let region = endpoint
        .split('.')
        .nth(1)
        .unwrap_or(endpoint)
        .to_string();
    Ok((bucket.to_string(), endpoint.to_string(), region))
}

fn build_transport(namespaced_name: &str, remote: &Remote) -> CoreResult<Arc<dyn Transport>> {
    let credentials = resolve_credentials(namespaced_name, remote)?;
    match remote.kind {
        RemoteKind::Http | RemoteKind::Https => {
            let template = remote.location_template.clone().ok_or_else(|| {
                CoreError::Transport(pm_transport::TransportError::InvalidUrl {
                    remote: namespaced_name.to_string(),
                    details: "HTTP/HTTPS remotes require a package-location template".to_string(),
                })
            })?;
            Ok(Arc::new(HttpTransport::new(namespaced_name, template)))
        }
        RemoteKind::S3 => {
            let template = remote.location_template.clone().ok_or_else(|| {
                CoreError::Transport(pm_transport::TransportError::InvalidUrl {
                    remote: namespaced_name.to_string(),
                    details: "S3-like remotes require a package-location template".to_string(),
                })
            })?;
            let (bucket, endpoint, region) = split_s3_authority(&template)?;
            let credentials = credentials.ok_or_else(|| CoreError::CredentialsMissing {
                remote: namespaced_name.to_string(),
                env_var: "PM_S3_ID/PM_S3_KEY".to_string(),
            })?;
            Ok(Arc::new(S3Transport::new(
                namespaced_name,
                bucket,
                endpoint,
                region,
                credentials,
            )))
        }
        RemoteKind::Gtl => {
            let api_base_url = remote.location_template.clone().unwrap_or_else(|| {
                format!("https://{namespaced_name}.gtl.invalid/api/v1")
            });
            let credentials = credentials.ok_or_else(|| CoreError::CredentialsMissing {
                remote: namespaced_name.to_string(),
                env_var: "PM_GTL_ID/PM_GTL_KEY".to_string(),
            })?;
            Ok(Arc::new(GtlTransport::new(namespaced_name, api_base_url, credentials)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pm_manifest::model::Namespace;

    fn remote(namespace: Namespace, local_name: &str) -> Remote {
        Remote {
            namespace,
            local_name: local_name.to_string(),
            kind: RemoteKind::Http,
            location_template: Some("https://example.invalid/${name}@${version}.7z".to_string()),
            credentials: None,
            error_url: None,
        }
    }

    #[test]
    fn bare_name_resolves_by_unique_suffix() {
        let mut remotes = HashMap::new();
        remotes.insert("project:mycompany".to_string(), remote(Namespace::Project, "mycompany"));
        let cascade = RemoteCascade::new(remotes, vec![]);
        assert_eq!(cascade.resolve_name("mycompany").unwrap(), "project:mycompany");
    }

    #[test]
    fn ambiguous_bare_name_errors() {
        let mut remotes = HashMap::new();
        remotes.insert("project:mycompany".to_string(), remote(Namespace::Project, "mycompany"));
        remotes.insert("user:mycompany".to_string(), remote(Namespace::User, "mycompany"));
        let cascade = RemoteCascade::new(remotes, vec![]);
        assert!(matches!(
            cascade.resolve_name("mycompany"),
            Err(CoreError::Manifest(pm_manifest::ManifestError::RemoteAmbiguous { .. }))
        ));
    }

    #[test]
    fn split_s3_authority_extracts_bucket_and_region() {
        let (bucket, endpoint, region) =
            split_s3_authority("https://my-bucket.s3.us-east-1.amazonaws.com/${name}@${version}.7z").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(endpoint, "s3.us-east-1.amazonaws.com");
        assert_eq!(region, "us-east-1");
    }
}
