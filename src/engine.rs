//! Build engine.
//!
//! One build walks a fixed sequence of states and never revisits one:
//!
//! ```text
//! LOAD_STATE → PLAN_DELTA → MUTATE_STORE → VERIFY → COMMIT | ABORT
//! ```
//!
//! - **LOAD_STATE** computes the schema fingerprint, applies the
//!   schema-change and missing-state policies, and loads the previous
//!   manifest (or starts from an empty one).
//! - **PLAN_DELTA** classifies the current documents, selects work for the
//!   sync mode, chunks every document to embed and derives the chunk ids
//!   to delete from the previous manifest.
//! - **MUTATE_STORE** deletes stale chunk ids first, then embeds and
//!   upserts in batches. Any failure aborts the build.
//! - **VERIFY** compares the store count with the count accumulated while
//!   iterating documents.
//! - **COMMIT** writes the manifest, then the LATEST pointer, then the
//!   build stamp. **ABORT** writes nothing, so the next build starts from
//!   the last verified manifest.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::anyhow;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use ragsync_core::chunk::chunk_text;
use ragsync_core::delta::{self, Delta};
use ragsync_core::embedding::Embedder;
use ragsync_core::fingerprint;
use ragsync_core::identity::{self, ID_STRATEGY_VERSION};
use ragsync_core::models::{
    ChunkConfig, ChunkRecord, DocumentRecord, LastBuild, Manifest, MetaValue, Metadata,
    SourceDocument,
};
use ragsync_core::mutator::StoreMutator;
use ragsync_core::step::StepOutcome;
use ragsync_core::store::VectorStore;
use ragsync_core::strategy::{select_work, SyncMode};
use ragsync_core::verify::{verify, Verification};
use ragsync_core::SyncError;

use crate::config::{Config, OnMissingState, OnSchemaChange};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};
use crate::stamp::{self, BuildStamp, StampInput};
use crate::state::{write_atomic, StateStore};

/// Knobs for one build, resolved from config plus CLI overrides.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub collection: String,
    pub chunk_config: ChunkConfig,
    pub include_media_stub: bool,
    pub mode: SyncMode,
    pub on_missing_state: OnMissingState,
    pub on_schema_change: OnSchemaChange,
    pub delete_batch_size: usize,
    pub upsert_batch_size: usize,
    pub embed_batch_size: usize,
    pub dry_run: bool,
    pub plan_out: Option<PathBuf>,
    /// Folded into the schema fingerprint next to the model and chunking.
    pub fingerprint_extra: Option<serde_json::Value>,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.store.collection.clone(),
            chunk_config: config.chunking.to_chunk_config(),
            include_media_stub: config.corpus.include_media_stub,
            mode: config.sync.mode,
            on_missing_state: config.sync.on_missing_state,
            on_schema_change: config.sync.on_schema_change,
            delete_batch_size: config.sync.delete_batch_size,
            upsert_batch_size: config.sync.upsert_batch_size,
            embed_batch_size: config.embedding.batch_size,
            dry_run: false,
            plan_out: None,
            fingerprint_extra: config
                .embedding
                .dims
                .map(|d| serde_json::json!({ "dims": d })),
        }
    }

    /// Reject option values that would otherwise fail halfway through a
    /// build. Runs before any state is loaded or the store is touched.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.delete_batch_size == 0 || self.upsert_batch_size == 0 {
            return Err(SyncError::Configuration(
                "delete and upsert batch sizes must be > 0".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(SyncError::Configuration(
                "embed batch size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Schema fingerprint of a build with these options and `embed_model`.
    pub fn schema_hash(&self, embed_model: &str) -> String {
        fingerprint::compute(
            embed_model,
            &self.chunk_config,
            self.include_media_stub,
            ID_STRATEGY_VERSION,
            self.fingerprint_extra.as_ref(),
        )
    }
}

/// Collaborators of a build.
pub struct BuildContext<'a> {
    pub store: &'a dyn VectorStore,
    pub embedder: &'a dyn Embedder,
    pub state: &'a StateStore,
    pub progress: &'a dyn BuildProgressReporter,
}

/// Why the collection was dropped before building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    SchemaChange,
    MissingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Store verified; manifest, pointer and stamp written.
    Committed,
    /// Store count disagrees with the plan; nothing was written.
    Inconsistent { expected: u64, observed: u64 },
    /// Planned only.
    DryRun,
}

/// The work a build intends to do. Written by `--plan-out` and printed by
/// `--dry-run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlan {
    pub schema_hash: String,
    pub collection: String,
    pub sync_mode: SyncMode,
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub delete_chunk_ids: Vec<String>,
    pub embed_documents: Vec<String>,
    pub skipped_documents: Vec<String>,
    /// Chunks of documents kept as-is from the previous manifest.
    pub carried_chunks: u64,
    /// Store count expected after the build.
    pub planned_chunks: u64,
}

#[derive(Debug)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    pub collection: String,
    pub schema_hash: String,
    /// Fingerprint the LATEST pointer named before this build.
    pub previous_schema_hash: Option<String>,
    pub reset: Option<ResetReason>,
    /// Fields filled in while loading an older manifest.
    pub upgraded_fields: Vec<String>,
    pub plan: BuildPlan,
    pub stats: LastBuild,
    /// `(sourceUri, reason)` of documents that produced no chunks.
    pub skipped: Vec<(String, String)>,
    pub manifest_path: PathBuf,
    pub stamp: Option<BuildStamp>,
}

impl BuildReport {
    pub fn is_committed(&self) -> bool {
        self.outcome == BuildOutcome::Committed
    }

    /// Turn an inconsistent outcome into [`SyncError::ConsistencyViolation`].
    pub fn into_result(self) -> Result<Self, SyncError> {
        match self.outcome {
            BuildOutcome::Inconsistent { expected, observed } => {
                Err(SyncError::ConsistencyViolation {
                    collection: self.collection,
                    expected,
                    observed,
                })
            }
            _ => Ok(self),
        }
    }
}

struct LoadedState {
    previous: Manifest,
    pointer: Option<String>,
    reset: Option<ResetReason>,
}

struct PreparedDoc<'a> {
    doc: &'a SourceDocument,
    chunks: StepOutcome<Vec<String>>,
}

/// Run one build over `documents`.
///
/// Returns `Err` for every terminal failure except a consistency mismatch,
/// which is reported as [`BuildOutcome::Inconsistent`] so the caller can
/// apply its strictness policy.
pub async fn run_build(
    ctx: &BuildContext<'_>,
    opts: &BuildOptions,
    documents: Vec<SourceDocument>,
) -> Result<BuildReport, SyncError> {
    let started = Instant::now();
    let collection = opts.collection.as_str();
    ctx.progress.report(BuildProgressEvent::Planning {
        collection: collection.to_string(),
    });

    // LOAD_STATE
    let schema_hash = opts.schema_hash(ctx.embedder.model_name());
    info!(state = "LOAD_STATE", collection, %schema_hash, mode = %opts.mode, "build started");
    // Configuration errors must surface before a reset policy can drop the
    // collection.
    opts.validate()?;
    let current = delta::index_current(documents)?;
    let loaded = load_state(ctx, opts, &schema_hash).await?;
    let previous = &loaded.previous;

    // PLAN_DELTA
    let delta = delta::plan(&previous.docs, &current);
    let selection = select_work(opts.mode, &delta);
    info!(
        state = "PLAN_DELTA",
        added = delta.added.len(),
        changed = delta.changed.len(),
        deleted = delta.deleted.len(),
        unchanged = delta.unchanged.len(),
        delete_old = selection.delete_old.len(),
        embed = selection.embed.len(),
        "delta planned"
    );
    if opts.mode == SyncMode::None && !(delta.deleted.is_empty() && delta.changed.is_empty()) {
        warn!(
            deleted = delta.deleted.len(),
            changed = delta.changed.len(),
            "sync mode 'none' never deletes; orphaned chunks will fail verification"
        );
    }

    let delete_ids: Vec<String> = selection
        .delete_old
        .iter()
        .filter_map(|uri| previous.docs.get(uri))
        .flat_map(|rec| identity::chunk_ids(&rec.doc_id, rec.n_chunks))
        .collect();

    let carried_chunks: u64 = current
        .keys()
        .filter(|uri| !selection.embed.contains(*uri))
        .filter_map(|uri| previous.docs.get(uri))
        .map(|rec| rec.n_chunks)
        .sum();

    let prepared: Vec<PreparedDoc<'_>> = selection
        .embed
        .iter()
        .filter_map(|uri| current.get(uri))
        .map(|doc| PreparedDoc {
            doc,
            chunks: chunk_step(doc, &opts.chunk_config),
        })
        .collect();

    let plan = build_plan(
        &schema_hash,
        opts,
        &delta,
        &delete_ids,
        &prepared,
        carried_chunks,
    );
    if let Some(path) = &opts.plan_out {
        let data = serde_json::to_vec_pretty(&plan).map_err(|e| SyncError::State(e.into()))?;
        write_atomic(path, &data).map_err(SyncError::State)?;
        debug!(path = %path.display(), "plan written");
    }

    let mut stats = LastBuild {
        sync_mode: opts.mode,
        units_total: prepared.len() as u64,
        docs_current: current.len() as u64,
        docs_processed: prepared.len() as u64,
        docs_added: delta.added.len() as u64,
        docs_changed: delta.changed.len() as u64,
        docs_unchanged: delta.unchanged.len() as u64,
        docs_deleted: delta.deleted.len() as u64,
        expected_chunks: plan.planned_chunks,
        ..LastBuild::default()
    };
    let manifest_path = ctx.state.manifest_path(collection, &schema_hash);

    let report = |outcome: BuildOutcome,
                  plan: BuildPlan,
                  stats: LastBuild,
                  skipped: Vec<(String, String)>,
                  stamp: Option<BuildStamp>| BuildReport {
        outcome,
        collection: collection.to_string(),
        schema_hash: schema_hash.clone(),
        previous_schema_hash: loaded.pointer.clone(),
        reset: loaded.reset,
        upgraded_fields: previous.upgraded_fields.clone(),
        plan,
        stats,
        skipped,
        manifest_path: manifest_path.clone(),
        stamp,
    };

    if opts.dry_run {
        let skipped = prepared
            .iter()
            .filter_map(|p| match &p.chunks {
                StepOutcome::Skip(reason) => Some((p.doc.source_uri.clone(), reason.clone())),
                _ => None,
            })
            .collect();
        stats.units_skipped = plan.skipped_documents.len() as u64;
        stats.units_indexed = stats.units_total - stats.units_skipped;
        stats.build_seconds = started.elapsed().as_secs_f64();
        info!(state = "ABORT", reason = "dry-run", "dry run; nothing written");
        return Ok(report(BuildOutcome::DryRun, plan, stats, skipped, None));
    }

    // MUTATE_STORE
    let coll = ctx
        .store
        .get_or_create_collection(collection, &collection_metadata(&schema_hash, ctx.embedder))
        .await
        .map_err(SyncError::Store)?;
    let mut mutator = StoreMutator::new(
        coll.as_ref(),
        opts.delete_batch_size,
        opts.upsert_batch_size,
        !ctx.embedder.normalizes(),
    )?;
    info!(
        state = "MUTATE_STORE",
        delete_ids = delete_ids.len(),
        documents = prepared.len(),
        "mutating store"
    );

    let delete_total = delete_ids.len() as u64;
    for batch in delete_ids.chunks(opts.delete_batch_size) {
        mutator.delete_ids(batch).await?;
        ctx.progress.report(BuildProgressEvent::Deleting {
            collection: collection.to_string(),
            n: mutator.stats().chunks_deleted,
            total: delete_total,
        });
    }

    let mut expected = carried_chunks;
    let mut new_records: Vec<DocumentRecord> = Vec::with_capacity(prepared.len());
    let mut skipped = Vec::new();
    let embed_total = prepared.len() as u64;

    for (i, p) in prepared.into_iter().enumerate() {
        let doc = p.doc;
        let n_chunks = match p.chunks {
            StepOutcome::Ok(chunks) => {
                let n = chunks.len() as u64;
                let vectors =
                    embed_chunks(ctx.embedder, &doc.doc_id, &chunks, opts.embed_batch_size)
                        .await?;
                for (idx, (text, vector)) in chunks.into_iter().zip(vectors).enumerate() {
                    let idx = idx as u64;
                    mutator
                        .push(ChunkRecord {
                            id: identity::chunk_id(&doc.doc_id, idx),
                            document_id: doc.doc_id.clone(),
                            text,
                            metadata: chunk_metadata(doc, idx, &schema_hash),
                            vector,
                        })
                        .await?;
                }
                stats.units_indexed += 1;
                n
            }
            StepOutcome::Skip(reason) => {
                debug!(uri = %doc.source_uri, %reason, "document skipped");
                stats.units_skipped += 1;
                skipped.push((doc.source_uri.clone(), reason));
                0
            }
            StepOutcome::Fatal(e) => return Err(e),
        };
        expected += n_chunks;
        new_records.push(DocumentRecord::from_source(doc, n_chunks));
        ctx.progress.report(BuildProgressEvent::Embedding {
            collection: collection.to_string(),
            n: i as u64 + 1,
            total: embed_total,
        });
    }
    mutator.flush().await?;

    let mutation = mutator.stats();
    stats.chunks_deleted = mutation.chunks_deleted;
    stats.chunks_upserted = mutation.chunks_upserted;
    stats.expected_chunks = expected;

    // VERIFY
    let observed = coll.count().await.map_err(SyncError::Store)?;
    stats.collection_count = observed;
    stats.build_seconds = started.elapsed().as_secs_f64();
    match verify(expected, observed) {
        Verification::Mismatch { expected, observed } => {
            error!(
                state = "ABORT",
                collection,
                expected,
                observed,
                "consistency check failed; manifest left untouched"
            );
            return Ok(report(
                BuildOutcome::Inconsistent { expected, observed },
                plan,
                stats,
                skipped,
                None,
            ));
        }
        Verification::Consistent { count } => {
            info!(state = "VERIFY", count, "store count matches plan");
        }
    }

    // COMMIT
    let mut next = Manifest::empty(
        &schema_hash,
        ctx.store.location(),
        collection,
        ctx.embedder.model_name(),
        opts.chunk_config,
        opts.include_media_stub,
    );
    for uri in current.keys() {
        if let Some(prev) = previous.docs.get(uri) {
            if !selection.embed.contains(uri) {
                next.docs.insert(uri.clone(), prev.clone());
            }
        }
    }
    for rec in new_records {
        next.docs.insert(rec.source_uri.clone(), rec);
    }
    next.updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    next.last_build = Some(stats.clone());

    ctx.state.save_manifest(collection, &schema_hash, &next)?;
    ctx.state.write_latest_pointer(collection, &schema_hash)?;
    let stamp = stamp::write(
        ctx.state.root(),
        StampInput {
            schema_hash: &schema_hash,
            store_location: ctx.store.location(),
            collection,
            store_count: Ok(observed),
            plan_path: opts.plan_out.as_deref(),
            writer: stamp::WRITER_BUILD,
        },
    )
    .map_err(SyncError::State)?;
    info!(
        state = "COMMIT",
        collection,
        docs = next.docs.len(),
        chunks = observed,
        seconds = stats.build_seconds,
        "build committed"
    );

    Ok(report(BuildOutcome::Committed, plan, stats, skipped, Some(stamp)))
}

async fn load_state(
    ctx: &BuildContext<'_>,
    opts: &BuildOptions,
    schema_hash: &str,
) -> Result<LoadedState, SyncError> {
    let collection = opts.collection.as_str();
    let pointer = ctx.state.read_latest_pointer(collection)?;
    let mut reset = None;

    if let Some(prev) = pointer.as_deref().filter(|p| *p != schema_hash) {
        match opts.on_schema_change {
            OnSchemaChange::Fail => {
                return Err(SyncError::SchemaDrift {
                    collection: collection.to_string(),
                    previous: prev.to_string(),
                    current: schema_hash.to_string(),
                })
            }
            OnSchemaChange::Reset => {
                warn!(collection, previous = prev, current = schema_hash, "schema changed; resetting collection");
                drop_collection(ctx, opts).await?;
                reset = Some(ResetReason::SchemaChange);
            }
        }
    }

    let stored = match reset {
        Some(_) => None,
        None => ctx.state.load_manifest(collection, schema_hash)?,
    };

    let previous = match stored {
        Some(manifest) => manifest,
        None => {
            if reset.is_none() {
                let count = ctx
                    .store
                    .collection_count(collection)
                    .await
                    .map_err(SyncError::Store)?
                    .unwrap_or(0);
                if count > 0 {
                    match opts.on_missing_state {
                        OnMissingState::Fail => {
                            return Err(SyncError::MissingStateWithNonEmptyStore {
                                collection: collection.to_string(),
                                count,
                            })
                        }
                        OnMissingState::Reset => {
                            warn!(collection, count, "no saved state; resetting non-empty collection");
                            drop_collection(ctx, opts).await?;
                            reset = Some(ResetReason::MissingState);
                        }
                        OnMissingState::FullUpsert => {
                            warn!(collection, count, "no saved state; upserting on top of existing items");
                        }
                    }
                }
            }
            Manifest::empty(
                schema_hash,
                ctx.store.location(),
                collection,
                ctx.embedder.model_name(),
                opts.chunk_config,
                opts.include_media_stub,
            )
        }
    };

    Ok(LoadedState {
        previous,
        pointer,
        reset,
    })
}

async fn drop_collection(ctx: &BuildContext<'_>, opts: &BuildOptions) -> Result<(), SyncError> {
    if opts.dry_run {
        return Ok(());
    }
    ctx.store
        .delete_collection(&opts.collection)
        .await
        .map_err(SyncError::Store)
}

fn chunk_step(doc: &SourceDocument, conf: &ChunkConfig) -> StepOutcome<Vec<String>> {
    let chunks = chunk_text(&doc.body, conf);
    if chunks.is_empty() {
        StepOutcome::Skip(format!(
            "no chunks (blank or shorter than {} chars)",
            conf.min_chunk_chars
        ))
    } else {
        StepOutcome::Ok(chunks)
    }
}

async fn embed_chunks(
    embedder: &dyn Embedder,
    document_id: &str,
    chunks: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, SyncError> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size) {
        let out = embedder
            .encode(batch)
            .await
            .map_err(|source| SyncError::Embedding {
                document_id: document_id.to_string(),
                source,
            })?;
        if out.len() != batch.len() {
            return Err(SyncError::Embedding {
                document_id: document_id.to_string(),
                source: anyhow!("expected {} vectors, got {}", batch.len(), out.len()),
            });
        }
        vectors.extend(out);
    }
    Ok(vectors)
}

fn chunk_metadata(doc: &SourceDocument, chunk_index: u64, schema_hash: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("docId".into(), MetaValue::from(doc.doc_id.as_str()));
    meta.insert("sourceUri".into(), MetaValue::from(doc.source_uri.as_str()));
    meta.insert("sourceType".into(), MetaValue::from(doc.source_type.as_str()));
    meta.insert("chunkIndex".into(), MetaValue::Int(chunk_index as i64));
    meta.insert(
        "contentSha256".into(),
        MetaValue::from(doc.content_sha256.as_str()),
    );
    meta.insert("schemaHash".into(), MetaValue::from(schema_hash));
    meta
}

fn collection_metadata(schema_hash: &str, embedder: &dyn Embedder) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("schemaHash".into(), MetaValue::from(schema_hash));
    meta.insert("embedModel".into(), MetaValue::from(embedder.model_name()));
    meta.insert("dims".into(), MetaValue::Int(embedder.dims() as i64));
    meta.insert("idStrategy".into(), MetaValue::from(ID_STRATEGY_VERSION));
    meta
}

fn build_plan(
    schema_hash: &str,
    opts: &BuildOptions,
    delta: &Delta,
    delete_ids: &[String],
    prepared: &[PreparedDoc<'_>],
    carried_chunks: u64,
) -> BuildPlan {
    let to_vec = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>();
    let mut planned_chunks = carried_chunks;
    let mut embed_documents = Vec::new();
    let mut skipped_documents = Vec::new();
    for p in prepared {
        match &p.chunks {
            StepOutcome::Ok(chunks) => {
                planned_chunks += chunks.len() as u64;
                embed_documents.push(p.doc.source_uri.clone());
            }
            _ => skipped_documents.push(p.doc.source_uri.clone()),
        }
    }
    BuildPlan {
        schema_hash: schema_hash.to_string(),
        collection: opts.collection.clone(),
        sync_mode: opts.mode,
        added: to_vec(&delta.added),
        changed: to_vec(&delta.changed),
        deleted: to_vec(&delta.deleted),
        unchanged: to_vec(&delta.unchanged),
        delete_chunk_ids: delete_ids.to_vec(),
        embed_documents,
        skipped_documents,
        carried_chunks,
        planned_chunks,
    }
}
