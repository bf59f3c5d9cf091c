//! `ragsync status`: what the saved state says versus what the store holds.
//!
//! Read-only. Never creates the store file, a collection or a state file.

use anyhow::Result;

use ragsync_core::models::Manifest;
use ragsync_core::store::VectorStore;

use crate::build_cmd::short_hash;
use crate::config::Config;
use crate::embedding::configured_model_name;
use crate::engine::BuildOptions;
use crate::sqlite_store::SqliteVectorStore;
use crate::stamp;
use crate::state::StateStore;

pub async fn run_status(config: &Config) -> Result<()> {
    let collection = config.store.collection.as_str();
    let state = StateStore::new(&config.sync.state_root);
    let opts = BuildOptions::from_config(config);
    let current = opts.schema_hash(&configured_model_name(&config.embedding));
    let pointer = state.read_latest_pointer(collection)?;

    println!("ragsync status: {}", collection);
    println!();
    println!("  State root:  {}", config.sync.state_root.display());
    println!("  Schema:      {} (current config)", short_hash(&current));
    match pointer.as_deref() {
        None => println!("  LATEST:      none (never built)"),
        Some(p) if p == current => println!("  LATEST:      {} (matches)", short_hash(p)),
        Some(p) => println!(
            "  LATEST:      {} (differs; next build needs --on-schema-change reset)",
            short_hash(p)
        ),
    }

    let manifest = match pointer.as_deref() {
        Some(p) => state.load_manifest(collection, p)?,
        None => None,
    };
    if let Some(m) = &manifest {
        print_manifest(m);
    }

    match stamp::read(&config.sync.state_root, collection)? {
        Some(s) => {
            println!();
            println!("  Stamp:       {} by {}", format_rfc3339_relative(&s.updated_at), s.writer);
            match (s.collection_count, &s.count_error) {
                (Some(n), _) => println!("    count:     {}", n),
                (None, Some(e)) => println!("    count:     unknown ({})", e),
                (None, None) => println!("    count:     unknown"),
            }
            if let Some(plan) = &s.plan {
                println!(
                    "    plan:      {} (sha256 {})",
                    plan.path,
                    plan.sha256.as_deref().map(short_hash).unwrap_or("-")
                );
            }
        }
        None => {
            println!();
            println!("  Stamp:       none");
        }
    }

    println!();
    if !config.store.path.exists() {
        println!("  Store:       {} (not created)", config.store.path.display());
        return Ok(());
    }
    let size = std::fs::metadata(&config.store.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let store = SqliteVectorStore::open_read_only(&config.store.path).await?;
    let live = store.collection_count(collection).await;
    store.close().await;

    println!(
        "  Store:       {} ({})",
        config.store.path.display(),
        format_bytes(size)
    );
    match live? {
        None => println!("  Live count:  collection not created"),
        Some(n) => {
            let expected = manifest.as_ref().map(Manifest::total_chunks);
            match expected {
                Some(e) if e == n => println!("  Live count:  {} (consistent)", n),
                Some(e) => println!(
                    "  Live count:  {} (manifest expects {}; run a build to reconcile)",
                    n, e
                ),
                None => println!("  Live count:  {} (no manifest)", n),
            }
        }
    }

    Ok(())
}

fn print_manifest(m: &Manifest) {
    println!();
    println!("  Manifest");
    println!("    model:     {}", m.embed_model);
    println!(
        "    chunking:  {} chars, {} overlap, min {}",
        m.chunk_conf.chunk_chars, m.chunk_conf.overlap_chars, m.chunk_conf.min_chunk_chars
    );
    println!("    documents: {}", m.docs.len());
    println!("    chunks:    {}", m.total_chunks());
    if !m.updated_at.is_empty() {
        println!("    updated:   {}", format_rfc3339_relative(&m.updated_at));
    }
    if m.is_legacy() {
        println!(
            "    legacy:    yes (filled {}); the next build rewrites it",
            m.upgraded_fields.join(", ")
        );
    }
    if let Some(lb) = &m.last_build {
        println!(
            "    last build: mode {}, +{} ~{} -{} ={} docs, {} chunks upserted, {} deleted, {:.2}s",
            lb.sync_mode,
            lb.docs_added,
            lb.docs_changed,
            lb.docs_deleted,
            lb.docs_unchanged,
            lb.chunks_upserted,
            lb.chunks_deleted,
            lb.build_seconds
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" for recent timestamps, the raw value when unparsable.
fn format_rfc3339_relative(ts: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(ts) {
        Ok(dt) => format_age(chrono::Utc::now().timestamp() - dt.timestamp(), ts),
        Err(_) => ts.to_string(),
    }
}

fn format_age(delta: i64, fallback: &str) -> String {
    if delta < 0 {
        fallback.to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        fallback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn ages() {
        assert_eq!(format_age(5, "x"), "just now");
        assert_eq!(format_age(120, "x"), "2 mins ago");
        assert_eq!(format_age(3600, "x"), "1 hour ago");
        assert_eq!(format_age(86400 * 3, "x"), "3 days ago");
        assert_eq!(format_age(86400 * 90, "x"), "x");
        assert_eq!(format_age(-10, "x"), "x");
    }

    #[test]
    fn unparsable_timestamp_is_echoed() {
        assert_eq!(format_rfc3339_relative("yesterday"), "yesterday");
    }
}
