//! # ragsync core
//!
//! Pure logic for incremental vector-index synchronization: data models,
//! chunk identity, chunking, schema fingerprints, delta planning, sync
//! strategies, consistency verification, and the traits the build engine
//! talks to (vector store, embedder).
//!
//! This crate performs no filesystem or network I/O. State files, the
//! SQLite store and the embedding providers live in the `ragsync` app crate.

pub mod chunk;
pub mod delta;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod models;
pub mod mutator;
pub mod step;
pub mod store;
pub mod strategy;
pub mod verify;

pub use error::SyncError;
