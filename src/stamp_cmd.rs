//! `ragsync stamp`: re-count the store and rewrite the build stamp.
//!
//! Used after out-of-band maintenance of the store, or to attach a plan file
//! to the current freshness marker. Counting failures are recorded in the
//! stamp's `countError` instead of aborting.

use std::path::Path;

use anyhow::Result;

use ragsync_core::store::VectorStore;

use crate::config::Config;
use crate::embedding::configured_model_name;
use crate::engine::BuildOptions;
use crate::sqlite_store::SqliteVectorStore;
use crate::stamp::{self, StampInput};
use crate::state::StateStore;

pub async fn run_stamp(config: &Config, plan: Option<&Path>) -> Result<()> {
    let collection = config.store.collection.as_str();
    let state = StateStore::new(&config.sync.state_root);

    // The last committed fingerprint wins over the one the config implies.
    let schema_hash = match state.read_latest_pointer(collection)? {
        Some(p) => p,
        None => BuildOptions::from_config(config)
            .schema_hash(&configured_model_name(&config.embedding)),
    };

    let store_count = count_store(&config.store.path, collection).await;
    if let Err(e) = &store_count {
        tracing::warn!(collection, error = %e, "could not count store; recording countError");
    }

    let location = config.store.path.display().to_string();
    let written = stamp::write(
        &config.sync.state_root,
        StampInput {
            schema_hash: &schema_hash,
            store_location: &location,
            collection,
            store_count,
            plan_path: plan,
            writer: stamp::WRITER_STAMP,
        },
    )?;

    println!(
        "stamp {}: {}",
        collection,
        stamp::stamp_path(&config.sync.state_root, collection).display()
    );
    match (written.collection_count, &written.count_error) {
        (Some(n), _) => println!("  count: {}", n),
        (None, Some(e)) => println!("  count: unknown ({})", e),
        (None, None) => {}
    }
    if let Some(p) = &written.plan {
        match (&p.sha256, &p.read_error) {
            (Some(sha), _) => println!("  plan: {} ({})", p.path, sha),
            (None, Some(e)) => println!("  plan: {} (unreadable: {})", p.path, e),
            (None, None) => println!("  plan: {}", p.path),
        }
    }
    Ok(())
}

async fn count_store(path: &Path, collection: &str) -> Result<u64, String> {
    if !path.exists() {
        return Err(format!("store not found: {}", path.display()));
    }
    let store = SqliteVectorStore::open_read_only(path)
        .await
        .map_err(|e| e.to_string())?;
    let count = store.collection_count(collection).await;
    store.close().await;
    match count {
        Ok(Some(n)) => Ok(n),
        Ok(None) => Err(format!("collection '{}' does not exist", collection)),
        Err(e) => Err(e.to_string()),
    }
}
