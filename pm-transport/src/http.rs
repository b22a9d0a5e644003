//! Plain HTTP/HTTPS transport: objects live at `{base_url}/{object_name}`.
//!
//! `head` is a literal HTTP HEAD; `get` streams the body straight to disk,
//! reporting progress from `Content-Length` when the server sends one and
//! falling back to [`ProgressSink::on_progress_unknown_total`] for chunked
//! responses. `put`/`list` aren't implemented -- a bare HTTP endpoint has no
//! standard upload or directory-listing protocol, so those remain
//! `Unsupported` the way the trait defaults already express.

use async_trait::async_trait;
use camino::Utf8Path;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

use crate::errors::{TransportError, TransportResult};
use crate::progress::SharedProgressSink;
use crate::transport::Transport;

/// Talks to a single base URL, e.g. `https://dl.example.com/packages`.
pub struct HttpTransport {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpTransport {
    /// Builds a transport rooted at `base_url` (no trailing slash
    /// required; one is inserted if missing).
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            name: name.into(),
            base_url,
            client: Client::new(),
        }
    }

    fn object_url(&self, object_name: &str) -> String {
        format!("{}{}", self.base_url, object_name.trim_start_matches('/'))
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
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self, object_name: &str) -> TransportResult<bool> {
        let url = self.object_url(object_name);
        let resp = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| self.unreachable_err(e))?;
        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(self.io_err(format!("unexpected status {other} for HEAD {url}"))),
        }
    }

    async fn get(
        &self,
        object_name: &str,
        local_path: &Utf8Path,
        progress: SharedProgressSink,
    ) -> TransportResult<()> {
        let url = self.object_url(object_name);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable_err(e))?;
        if !resp.status().is_success() {
            return Err(self.io_err(format!("GET {url} returned {}", resp.status())));
        }
        let total = resp.content_length();

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| self.io_err(e))?;
        let mut received: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.io_err(e))?;
            file.write_all(&chunk).await.map_err(|e| self.io_err(e))?;
            received += chunk.len() as u64;
            match total {
                Some(total) => progress.on_progress(received, total),
                None => progress.on_progress_unknown_total(chunk.len() as u64),
            }
        }
        file.flush().await.map_err(|e| self.io_err(e))?;
        progress.on_finish();
        Ok(())
    }

    async fn locate_package(&self, base: &str, version: &str) -> TransportResult<Option<String>> {
        for ext in ["7z", "zip"] {
            let object_name = format!("{base}@{version}.{ext}");
            if self.head(&object_name).await? {
                return Ok(Some(object_name));
            }
        }
        // Some HTTP hosts key objects by a bare `base@version` name with no
        // extension and rely on content negotiation; try it as a last
        // resort before giving up.
        let bare = format!("{base}@{version}");
        if self.head(&bare).await? {
            return Ok(Some(bare));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_joins_with_single_slash() {
        let t = HttpTransport::new("http:test", "https://example.invalid/pkgs");
        assert_eq!(
            t.object_url("foo@1.0.0.zip"),
            "https://example.invalid/pkgs/foo@1.0.0.zip"
        );
        let t = HttpTransport::new("http:test", "https://example.invalid/pkgs/");
        assert_eq!(
            t.object_url("foo@1.0.0.zip"),
            "https://example.invalid/pkgs/foo@1.0.0.zip"
        );
    }
}
