//! Delta planning between the previous manifest and the current corpus.
//!
//! Every document is classified by `sourceUri` into exactly one of
//! added / changed / deleted / unchanged. Only the content hash decides
//! between changed and unchanged; `updatedAt` drift alone never forces a
//! re-embed.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SyncError;
use crate::models::{DocumentRecord, SourceDocument};

/// Classification of documents between two builds. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
}

impl Delta {
    /// True when nothing was added, changed or deleted.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// `deleted ∪ changed`: documents whose old chunks are stale.
    pub fn stale(&self) -> BTreeSet<String> {
        self.deleted.union(&self.changed).cloned().collect()
    }

    /// `added ∪ changed`: documents with new content to embed.
    pub fn fresh(&self) -> BTreeSet<String> {
        self.added.union(&self.changed).cloned().collect()
    }
}

/// Key the current document set by `sourceUri`.
///
/// A repeated `sourceUri` is a configuration error: the manifest can only
/// hold one record per URI.
pub fn index_current(
    docs: Vec<SourceDocument>,
) -> Result<BTreeMap<String, SourceDocument>, SyncError> {
    let mut indexed = BTreeMap::new();
    for doc in docs {
        let uri = doc.source_uri.clone();
        if indexed.insert(uri.clone(), doc).is_some() {
            return Err(SyncError::Configuration(format!(
                "duplicate sourceUri in current document set: {}",
                uri
            )));
        }
    }
    Ok(indexed)
}

/// Compare the previous manifest's documents against the current set.
pub fn plan(
    previous: &BTreeMap<String, DocumentRecord>,
    current: &BTreeMap<String, SourceDocument>,
) -> Delta {
    let mut delta = Delta::default();

    for (uri, doc) in current {
        match previous.get(uri) {
            None => {
                delta.added.insert(uri.clone());
            }
            Some(prev) => {
                if doc.content_sha256.is_empty() || doc.content_sha256 != prev.content_sha256 {
                    delta.changed.insert(uri.clone());
                } else {
                    delta.unchanged.insert(uri.clone());
                }
            }
        }
    }

    for uri in previous.keys() {
        if !current.contains_key(uri) {
            delta.deleted.insert(uri.clone());
        }
    }

    delta
}
