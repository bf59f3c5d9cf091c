//! Error taxonomy of a build.
//!
//! Every variant is terminal for the current build: none is retried
//! inside the engine. Store and embedder seams return `anyhow::Error`; the
//! engine wraps those failures here with enough context to resume.

use std::fmt;

use thiserror::Error;

/// The store call that failed during a batched mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Delete,
    Upsert,
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOp::Delete => f.write_str("delete"),
            MutationOp::Upsert => f.write_str("upsert"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or missing configuration, or a state file with an
    /// unexpected shape. Raised before any store mutation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A delete or upsert sub-batch failed. The manifest is left untouched.
    #[error(
        "store {op} failed at batch {batch_index}{}: {source}",
        .document_id.as_deref().map(|d| format!(" (document {d})")).unwrap_or_default()
    )]
    StoreMutation {
        op: MutationOp,
        batch_index: usize,
        document_id: Option<String>,
        #[source]
        source: anyhow::Error,
    },

    /// The store's count disagrees with the analytically expected count.
    #[error(
        "consistency violation in collection '{collection}': expected {expected} chunks, store reports {observed}"
    )]
    ConsistencyViolation {
        collection: String,
        expected: u64,
        observed: u64,
    },

    /// No manifest for this fingerprint, yet the collection already holds
    /// items and the policy is `fail`.
    #[error(
        "no saved state for collection '{collection}' but the store already holds {count} items (use --on-missing-state reset|full-upsert)"
    )]
    MissingStateWithNonEmptyStore { collection: String, count: u64 },

    /// The LATEST pointer names a different fingerprint and the policy is `fail`.
    #[error(
        "schema fingerprint changed for collection '{collection}': {previous} -> {current} (use --on-schema-change reset)"
    )]
    SchemaDrift {
        collection: String,
        previous: String,
        current: String,
    },

    /// The embedder failed for a document selected for (re)embedding.
    #[error("embedding failed for document {document_id}: {source}")]
    Embedding {
        document_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A non-mutating store call failed (open, count, drop).
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// Reading or writing a state file failed.
    #[error("state error: {0}")]
    State(#[source] anyhow::Error),
}

impl SyncError {
    /// Process exit code for this failure, used by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Configuration(_) => 2,
            SyncError::ConsistencyViolation { .. } => 3,
            SyncError::MissingStateWithNonEmptyStore { .. } | SyncError::SchemaDrift { .. } => 4,
            SyncError::StoreMutation { .. }
            | SyncError::Embedding { .. }
            | SyncError::Store(_)
            | SyncError::State(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_error_carries_context() {
        let err = SyncError::StoreMutation {
            op: MutationOp::Upsert,
            batch_index: 2,
            document_id: Some("abc123".into()),
            source: anyhow::anyhow!("disk full"),
        };
        let msg = err.to_string();
        assert!(msg.contains("upsert"));
        assert!(msg.contains("batch 2"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn violation_reports_both_counts() {
        let err = SyncError::ConsistencyViolation {
            collection: "docs".into(),
            expected: 10,
            observed: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 10"));
        assert!(msg.contains("reports 9"));
        assert_eq!(err.exit_code(), 3);
    }
}
