//! GTL-like transport: a small RPC client rather than a literal storage
//! protocol. `head`/`get` resolve an object name through a `resolve`
//! endpoint that returns a short-lived download URL and the object's
//! size; downloads past [`SEGMENTED_THRESHOLD`] are handed to the
//! segmented downloader instead of a single streamed GET. Public upload
//! is rejected by the API itself, not by this client -- `put(public=true)`
//! returns [`TransportError::PublicUploadRejected`] before a request is
//! even sent.

use async_trait::async_trait;
use camino::Utf8Path;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::download::segmented_download;
use crate::errors::{TransportError, TransportResult};
use crate::progress::SharedProgressSink;
use crate::transport::{Credentials, Transport};

/// Downloads at or above this size are routed through the segmented
/// downloader instead of a single streamed GET.
pub const SEGMENTED_THRESHOLD: u64 = 8 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct ResolveRequest<'a> {
    object_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    /// `None` when the object doesn't exist in this remote's namespace.
    url: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    object_name: &'a str,
    public: bool,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    location: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    object_names: Vec<String>,
}

/// Talks to a GTL-like API rooted at `api_base_url`, e.g.
/// `https://gtl.example.invalid/api/v1`.
pub struct GtlTransport {
    name: String,
    api_base_url: String,
    credentials: Credentials,
    client: Client,
}

impl GtlTransport {
    /// Builds a transport rooted at `api_base_url`, authenticated with
    /// `credentials` (`PM_GTL_ID`/`PM_GTL_KEY`, resolved lazily by the
    /// caller before this is constructed).
    pub fn new(
        name: impl Into<String>,
        api_base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            name: name.into(),
            api_base_url: api_base_url.into(),
            credentials,
            client: Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url.trim_end_matches('/'), path)
    }

    fn io_err(&self, details: impl std::fmt::Display) -> TransportError {
        TransportError::Io {
            remote: self.name.clone(),
            details: details.to_string(),
        }
    }

    fn unreachable_err(&self, details: impl std::fmt::Display) -> TransportError {
        TransportError::Unreachable {
            remote: self.name.clone(),
            details: details.to_string(),
        }
    }

    async fn resolve(&self, object_name: &str) -> TransportResult<ResolveResponse> {
        let resp = self
            .client
            .post(self.endpoint("resolve"))
            .basic_auth(&self.credentials.id, Some(&self.credentials.key))
            .json(&ResolveRequest { object_name })
            .send()
            .await
            .map_err(|e| self.unreachable_err(e))?;
        if !resp.status().is_success() {
            return Err(self.io_err(format!("resolve returned {}", resp.status())));
        }
        resp.json::<ResolveResponse>()
            .await
            .map_err(|e| self.io_err(e))
    }
}

#[async_trait]
impl Transport for GtlTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self, object_name: &str) -> TransportResult<bool> {
        Ok(self.resolve(object_name).await?.url.is_some())
    }

    async fn get(
        &self,
        object_name: &str,
        local_path: &Utf8Path,
        progress: SharedProgressSink,
    ) -> TransportResult<()> {
        let resolved = self.resolve(object_name).await?;
        let Some(url) = resolved.url else {
            return Err(self.io_err(format!("object '{object_name}' not found")));
        };
        let size = resolved.size.unwrap_or(0);

        if size >= SEGMENTED_THRESHOLD {
            return segmented_download(&self.name, self.client.clone(), &url, size, local_path, progress)
                .await;
        }

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable_err(e))?;
        if !resp.status().is_success() {
            return Err(self.io_err(format!("GET {url} returned {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| self.io_err(e))?;
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| self.io_err(e))?;
        file.write_all(&bytes).await.map_err(|e| self.io_err(e))?;
        file.flush().await.map_err(|e| self.io_err(e))?;
        progress.on_progress(bytes.len() as u64, bytes.len() as u64);
        progress.on_finish();
        Ok(())
    }

    async fn put(
        &self,
        local_path: &Utf8Path,
        object_name: &str,
        public: bool,
    ) -> TransportResult<String> {
        if public {
            return Err(TransportError::PublicUploadRejected {
                remote: self.name.clone(),
            });
        }
        let body = tokio::fs::read(local_path).await.map_err(|e| self.io_err(e))?;
        let resp = self
            .client
            .post(self.endpoint("upload"))
            .basic_auth(&self.credentials.id, Some(&self.credentials.key))
            .query(&UploadRequest {
                object_name,
                public,
            })
            .body(body)
            .send()
            .await
            .map_err(|e| self.unreachable_err(e))?;
        if !resp.status().is_success() {
            return Err(self.io_err(format!("upload returned {}", resp.status())));
        }
        let parsed: UploadResponse = resp.json().await.map_err(|e| self.io_err(e))?;
        Ok(parsed.location)
    }

    async fn list(&self, prefix: &str) -> TransportResult<Vec<String>> {
        let resp = self
            .client
            .get(self.endpoint("list"))
            .basic_auth(&self.credentials.id, Some(&self.credentials.key))
            .query(&[("prefix", prefix)])
            .send()
            .await
            .map_err(|e| self.unreachable_err(e))?;
        if !resp.status().is_success() {
            return Err(self.io_err(format!("list returned {}", resp.status())));
        }
        let parsed: ListResponse = resp.json().await.map_err(|e| self.io_err(e))?;
        Ok(parsed.object_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let t = GtlTransport::new(
            "gtl:test",
            "https://gtl.example.invalid/api/",
            Credentials {
                id: "id".into(),
                key: "key".into(),
            },
        );
        assert_eq!(t.endpoint("resolve"), "https://gtl.example.invalid/api/resolve");
    }
}
