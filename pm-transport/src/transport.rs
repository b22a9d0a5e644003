//! The capability-set `Transport` trait every remote backend implements.
//!
//! `put` and `list` are optional capabilities: a transport that can't
//! support them returns [`TransportError::Unsupported`] rather than the
//! trait requiring every implementor to supply a body. `locate_package`
//! has a default implementation encoding the `<base>@<version>.7z` then
//! `.zip` convention; transports override it when they need extra lookup
//! strategies (the HTTP transport also tries the bare template).

use async_trait::async_trait;
use camino::Utf8Path;

use crate::errors::{TransportError, TransportResult};
use crate::progress::SharedProgressSink;

/// Credentials resolved for a single remote, read lazily from the
/// environment variables the remote's type expects (see `pm-core`'s
/// `RemoteCascade` for the lazy-resolution policy).
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The access id / username.
    pub id: String,
    /// The secret key / token.
    pub key: String,
}

/// A remote storage backend, reachable for at least `head`/`get`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The namespaced remote name this transport was built for, e.g.
    /// `"project:mycompany"`. Used only for diagnostics.
    fn name(&self) -> &str;

    /// True if `object_name` exists in this remote's namespace.
    async fn head(&self, object_name: &str) -> TransportResult<bool>;

    /// Downloads `object_name` into `local_path`, overwriting it.
    async fn get(
        &self,
        object_name: &str,
        local_path: &Utf8Path,
        progress: SharedProgressSink,
    ) -> TransportResult<()>;

    /// Uploads `local_path` as `object_name`, returning a location string
    /// (a URL or bucket key) useful for display. Not every transport
    /// implements this; the default is [`TransportError::Unsupported`].
    async fn put(
        &self,
        _local_path: &Utf8Path,
        _object_name: &str,
        _public: bool,
    ) -> TransportResult<String> {
        Err(TransportError::Unsupported {
            remote: self.name().to_owned(),
            operation: "put",
        })
    }

    /// Lists object names under `prefix`. Optional; default is
    /// [`TransportError::Unsupported`].
    async fn list(&self, _prefix: &str) -> TransportResult<Vec<String>> {
        Err(TransportError::Unsupported {
            remote: self.name().to_owned(),
            operation: "list",
        })
    }

    /// Finds the wire object name for `(base, version)`, trying `.7z` then
    /// `.zip` by convention. Transports that support a richer lookup (e.g.
    /// HTTP's bare-template fallback) override this.
    async fn locate_package(&self, base: &str, version: &str) -> TransportResult<Option<String>> {
        for ext in ["7z", "zip"] {
            let object_name = format!("{base}@{version}.{ext}");
            if self.head(&object_name).await? {
                return Ok(Some(object_name));
            }
        }
        Ok(None)
    }
}
