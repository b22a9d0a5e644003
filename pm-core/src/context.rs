//! The run-scoped handle every command builds once and threads through:
//! the package cache, the resolved remote cascade, a progress sink, and
//! the single current-thread runtime the async transport layer runs on.

use std::sync::Arc;

use pm_store::cache::CacheStore;
use pm_transport::{noop, SharedProgressSink};

use crate::config;
use crate::errors::CoreResult;
use crate::remote::RemoteCascade;

/// Everything a command needs, built once in `main` and passed by
/// reference into the engine, label pass, and publish pipeline.
///
/// Constructible directly (see [`Context::new`]) without touching
/// `$HOME` or process environment, so engine/label/publish tests can
/// build one against a [`tempfile::TempDir`] and an empty cascade.
pub struct Context {
    /// The on-disk package cache.
    pub store: CacheStore,
    /// Resolved remotes and lazily-built transports.
    pub remotes: RemoteCascade,
    /// Where download/install progress is reported.
    pub progress: SharedProgressSink,
    /// The single-threaded runtime the CLI constructs once and hands down;
    /// `None` when a caller is already running inside one (e.g. a test
    /// using `#[tokio::test]`).
    pub runtime: Option<tokio::runtime::Runtime>,
}

impl Context {
    /// Builds a context directly from its parts, bypassing environment and
    /// config-file discovery entirely.
    pub fn new(store: CacheStore, remotes: RemoteCascade, progress: SharedProgressSink) -> Self {
        Self {
            store,
            remotes,
            progress,
            runtime: None,
        }
    }

    /// Builds the production context: reads `PM_PACKAGES_ROOT` for the
    /// cache root, merges the user- and install-scope config files for the
    /// default remote cascade, and constructs a current-thread Tokio
    /// runtime for the async transport layer to run on.
    pub fn from_environment(
        project_remotes: std::collections::HashMap<String, pm_manifest::model::Remote>,
        progress: SharedProgressSink,
    ) -> CoreResult<Self> {
        let root = config::packages_root()?;
        let store = CacheStore::new(root);

        let merged_config = config::load()?;
        let mut remotes = project_remotes;
        remotes.extend(merged_config.remotes);
        let cascade = RemoteCascade::new(remotes, merged_config.default_remotes);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            store,
            remotes: cascade,
            progress,
            runtime: Some(runtime),
        })
    }

    /// Runs an async future to completion on this context's runtime,
    /// falling back to `tokio::runtime::Handle::current()` when no owned
    /// runtime was built (the test/embedding path).
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(rt) => rt.block_on(future),
            None => tokio::runtime::Handle::current().block_on(future),
        }
    }

    /// A silent progress sink, for callers that don't render a UI.
    pub fn noop_progress() -> SharedProgressSink {
        noop()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("store", &"CacheStore").finish_non_exhaustive()
    }
}

/// Convenience alias so callers don't need to name the `Arc` themselves.
pub fn shared_progress(sink: impl pm_transport::ProgressSink + 'static) -> SharedProgressSink {
    Arc::new(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn new_builds_without_touching_environment() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = CacheStore::new(root);
        let cascade = RemoteCascade::new(HashMap::new(), vec![]);
        let ctx = Context::new(store, cascade, Context::noop_progress());
        assert!(ctx.runtime.is_none());
    }
}
