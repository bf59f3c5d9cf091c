//! `ragsync build`: scan the corpus and synchronize the vector store.

use std::path::PathBuf;

use anyhow::Result;

use crate::config::Config;
use crate::connector_fs;
use crate::embedding::create_provider;
use crate::engine::{self, BuildContext, BuildOptions, BuildOutcome, BuildReport, ResetReason};
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteVectorStore;
use crate::state::StateStore;

/// Run a build with the given configuration (overrides already applied).
pub async fn run_build(
    config: &Config,
    dry_run: bool,
    plan_out: Option<PathBuf>,
    progress: ProgressMode,
) -> Result<()> {
    let documents = connector_fs::scan_corpus(&config.corpus)?;
    let embedder = create_provider(&config.embedding)?;
    let store = SqliteVectorStore::open(&config.store.path).await?;
    let state = StateStore::new(&config.sync.state_root);
    let reporter = progress.reporter();

    let mut opts = BuildOptions::from_config(config);
    opts.dry_run = dry_run;
    opts.plan_out = plan_out;

    let ctx = BuildContext {
        store: &store,
        embedder: embedder.as_ref(),
        state: &state,
        progress: reporter.as_ref(),
    };

    let result = engine::run_build(&ctx, &opts, documents).await;
    store.close().await;
    let report = result?;

    print_report(&report, dry_run);

    if let BuildOutcome::Inconsistent { expected, observed } = report.outcome {
        if config.sync.strict {
            return Err(report.into_result().err().map_or_else(
                || anyhow::anyhow!("inconsistent build without a violation"),
                anyhow::Error::from,
            ));
        }
        tracing::warn!(
            expected,
            observed,
            "consistency check failed (non-strict); previous state kept"
        );
    }

    Ok(())
}

fn print_report(report: &BuildReport, dry_run: bool) {
    let plan = &report.plan;
    let stats = &report.stats;

    if dry_run {
        println!("build {} (dry-run)", report.collection);
    } else {
        println!("build {}", report.collection);
    }
    println!("  mode: {}", plan.sync_mode);
    println!("  schema: {}", short_hash(&report.schema_hash));
    match (&report.previous_schema_hash, report.reset) {
        (_, Some(ResetReason::SchemaChange)) => println!(
            "  reset: schema changed from {}",
            report
                .previous_schema_hash
                .as_deref()
                .map(short_hash)
                .unwrap_or("?")
        ),
        (_, Some(ResetReason::MissingState)) => {
            println!("  reset: collection held items without saved state")
        }
        (None, None) => println!("  state: none (first build)"),
        _ => {}
    }
    if !report.upgraded_fields.is_empty() {
        println!(
            "  legacy manifest upgraded: {}",
            report.upgraded_fields.join(", ")
        );
    }
    println!(
        "  documents: {} current, {} added, {} changed, {} deleted, {} unchanged",
        stats.docs_current,
        plan.added.len(),
        plan.changed.len(),
        plan.deleted.len(),
        plan.unchanged.len()
    );

    if dry_run {
        println!("  chunks to delete: {}", plan.delete_chunk_ids.len());
        for id in &plan.delete_chunk_ids {
            println!("    - {}", id);
        }
        println!("  documents to embed: {}", plan.embed_documents.len());
        for uri in &plan.embed_documents {
            println!("    + {}", uri);
        }
        for (uri, reason) in &report.skipped {
            println!("    ~ {} ({})", uri, reason);
        }
        println!("  planned chunks: {}", plan.planned_chunks);
        return;
    }

    println!(
        "  embedded documents: {} (skipped {})",
        stats.units_indexed, stats.units_skipped
    );
    println!("  chunks deleted: {}", stats.chunks_deleted);
    println!("  chunks upserted: {}", stats.chunks_upserted);
    println!("  expected chunks: {}", stats.expected_chunks);
    println!("  store count: {}", stats.collection_count);
    println!("  duration: {:.2}s", stats.build_seconds);

    match report.outcome {
        BuildOutcome::Committed => {
            println!("  manifest: {}", report.manifest_path.display());
            println!("ok");
        }
        BuildOutcome::Inconsistent { expected, observed } => {
            println!(
                "FAIL: store holds {} chunks, expected {}; state not advanced",
                observed, expected
            );
        }
        BuildOutcome::DryRun => {}
    }
}

pub(crate) fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
