//! # ragsync
//!
//! Incremental synchronization of a document corpus into a vector store.
//!
//! Each build compares the corpus against the manifest saved by the last
//! verified build, deletes and re-embeds only what changed, checks that the
//! store holds exactly the expected number of chunks, and only then
//! advances the saved state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │ Corpus (fs)  │──▶│ engine                    │──▶│ SQLite store │
//! │ walk + hash  │   │ plan → mutate → verify    │   │ collections  │
//! └──────────────┘   └────────────┬─────────────┘   └──────────────┘
//!                                 │ commit
//!                                 ▼
//!                    ┌──────────────────────────┐
//!                    │ state root               │
//!                    │ manifest, LATEST, stamp  │
//!                    └──────────────────────────┘
//! ```
//!
//! The pure pieces (delta planning, chunk identity, fingerprinting, batched
//! mutation, verification) live in `ragsync-core`. This crate wires them to
//! the filesystem, SQLite, embedding providers and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and CLI overrides |
//! | [`connector_fs`] | Corpus scanning |
//! | [`embedding`] | Embedding providers |
//! | [`engine`] | The build state machine |
//! | [`state`] | Manifests and the LATEST pointer |
//! | [`stamp`] | Build freshness stamp |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`db`] | Database connection |
//! | [`migrate`] | Store schema |
//! | [`progress`] | Build progress on stderr |
//! | [`logging`] | Tracing subscriber |
//! | [`build_cmd`] | `ragsync build` |
//! | [`status`] | `ragsync status` |
//! | [`stamp_cmd`] | `ragsync stamp` |

pub mod build_cmd;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod sqlite_store;
pub mod stamp;
pub mod stamp_cmd;
pub mod state;
pub mod status;
