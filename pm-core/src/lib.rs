#![deny(missing_docs)]

//! Orchestration: the run-scoped [`context::Context`], remote-name
//! resolution and transport construction ([`remote::RemoteCascade`]),
//! label dereferencing ([`label`]), dependency fulfillment
//! ([`fulfillment::FulfillmentEngine`]), and publishing
//! ([`publish::PublishPipeline`]).
//!
//! This crate is the one place that knows about every collaborator crate
//! at once; its [`errors::CoreError`] aggregates all of theirs.

pub mod config;
pub mod context;
pub mod errors;
pub mod fulfillment;
pub mod label;
pub mod publish;
pub mod remote;

pub use context::Context;
pub use errors::{CoreError, CoreResult};
pub use fulfillment::{FulfillmentEngine, FulfillmentReport};
pub use publish::PublishPipeline;
pub use remote::RemoteCascade;
