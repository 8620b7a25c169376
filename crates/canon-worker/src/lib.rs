//! Canon worker
//!
//! Consumes envelopes published by the ingest watcher, canonicalizes each row
//! with the status-driven [`transform`] engine and either upserts the result,
//! skips it, or dead-letters it with diagnostic headers.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod repository;
pub mod supervisor;
pub mod transform;

pub use error::{Result, WorkerError};
