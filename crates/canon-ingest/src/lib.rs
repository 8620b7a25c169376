//! Canon ingest watcher
//!
//! Watches every route's input folder, turns each CSV row into a
//! [`canon_common::MessageEnvelope`] published under `{domain}.{entity}`, and
//! archives each file into `processed`, `failed` or `ignored`.
//!
//! # Example
//!
//! ```no_run
//! use canon_ingest::route::RoutesManifest;
//!
//! # fn main() -> anyhow::Result<()> {
//! let routes = RoutesManifest::load("routes.yml")?;
//! for route in &routes {
//!     println!("{} -> {}", route.name, route.routing_key());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod publisher;
pub mod route;
pub mod supervisor;
pub mod watcher;

pub use error::{IngestError, Result};
