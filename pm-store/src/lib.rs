#![deny(missing_docs)]

//! On-disk package cache: archive pack/unpack, the installed-package cache
//! layout, canonical directory hashing, and stable-path symlink/junction
//! management.
//!
//! Each concern gets its own module and is usable on its own:
//!
//! * [`archive`] packs and unpacks `.7z`/`.zip` package archives.
//! * [`hash`] computes the canonical SHA-1 used to verify an install and to
//!   name labelless packages.
//! * [`cache`] owns the `chk/<base>/<version>` on-disk layout, the
//!   install/verify/remove lifecycle, and label caching.
//! * [`link`] materializes a package version into a stable directory link
//!   (symlink on Unix, junction fallback on Windows).
//!
//! None of these modules know about the network or the manifest grammar;
//! those live in `pm-transport` and `pm-manifest` respectively, and are
//! wired together by `pm-core`.

pub mod archive;
pub mod cache;
pub mod errors;
pub mod hash;
pub mod link;

pub use archive::{ArchiveDriver, ArchiveReport};
pub use cache::{CacheStore, PackageStatus};
pub use errors::{StoreError, StoreResult};
pub use hash::HashEngine;
pub use link::LinkManager;
