#![deny(missing_docs)]

//! Remote storage backends and the concurrent segmented downloader.
//!
//! Every backend implements the same [`Transport`] capability set --
//! `head`/`get` are mandatory, `put`/`list` are optional and report
//! [`TransportError::Unsupported`] when a backend doesn't have them:
//!
//! * [`http`] is a plain HTTP/HTTPS endpoint addressed by URL template.
//! * [`s3`] is an S3-compatible bucket, signed with a from-scratch SigV4
//!   implementation rather than a vendored AWS SDK.
//! * [`gtl`] is a small RPC client against a resolve-then-download API,
//!   switching to the segmented downloader above a size threshold.
//! * [`download`] is the segmented downloader itself, usable directly by
//!   any caller that already has a URL and a known size.
//!
//! None of these modules know about the manifest grammar or the on-disk
//! cache layout; those live in `pm-manifest` and `pm-store` respectively,
//! and are wired together by `pm-core`.

pub mod download;
pub mod errors;
pub mod gtl;
pub mod http;
pub mod progress;
pub mod s3;
pub mod transport;

pub use errors::{TransportError, TransportResult};
pub use gtl::GtlTransport;
pub use http::HttpTransport;
pub use progress::{noop, NoopProgress, ProgressSink, SharedProgressSink};
pub use s3::S3Transport;
pub use transport::{Credentials, Transport};
