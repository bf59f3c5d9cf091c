//! Sync strategies: which documents lose their old chunks and which get
//! (re)embedded, given a [`Delta`].
//!
//! | Mode | Delete old chunks for | Embed + upsert |
//! |------|-----------------------|----------------|
//! | `none` | nothing | every current document |
//! | `delete-stale` | deleted ∪ changed | every current document |
//! | `incremental` | deleted ∪ changed | added ∪ changed |
//!
//! `none` can never shrink the store. Deleted documents and shrinking
//! chunk counts leave orphans behind, which the consistency check then
//! reports instead of hiding.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::delta::Delta;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    None,
    DeleteStale,
    #[default]
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::None => "none",
            SyncMode::DeleteStale => "delete-stale",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SyncMode::None),
            "delete-stale" => Ok(SyncMode::DeleteStale),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(format!(
                "unknown sync mode '{}'. Must be none, delete-stale, or incremental",
                other
            )),
        }
    }
}

/// Work selected for one build, keyed by `sourceUri`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSelection {
    /// Documents whose previous chunk ids must be deleted.
    pub delete_old: BTreeSet<String>,
    /// Documents to chunk, embed and upsert.
    pub embed: BTreeSet<String>,
}

/// Apply `mode` to `delta`.
pub fn select_work(mode: SyncMode, delta: &Delta) -> WorkSelection {
    let all_current = || -> BTreeSet<String> {
        delta
            .added
            .iter()
            .chain(&delta.changed)
            .chain(&delta.unchanged)
            .cloned()
            .collect()
    };

    match mode {
        SyncMode::None => WorkSelection {
            delete_old: BTreeSet::new(),
            embed: all_current(),
        },
        SyncMode::DeleteStale => WorkSelection {
            delete_old: delta.stale(),
            embed: all_current(),
        },
        SyncMode::Incremental => WorkSelection {
            delete_old: delta.stale(),
            embed: delta.fresh(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sample_delta() -> Delta {
        Delta {
            added: set(&["new"]),
            changed: set(&["edited"]),
            deleted: set(&["gone"]),
            unchanged: set(&["same"]),
        }
    }

    #[test]
    fn none_embeds_everything_and_deletes_nothing() {
        let w = select_work(SyncMode::None, &sample_delta());
        assert!(w.delete_old.is_empty());
        assert_eq!(w.embed, set(&["new", "edited", "same"]));
    }

    #[test]
    fn delete_stale_deletes_stale_and_embeds_everything() {
        let w = select_work(SyncMode::DeleteStale, &sample_delta());
        assert_eq!(w.delete_old, set(&["edited", "gone"]));
        assert_eq!(w.embed, set(&["new", "edited", "same"]));
    }

    #[test]
    fn incremental_only_touches_the_delta() {
        let w = select_work(SyncMode::Incremental, &sample_delta());
        assert_eq!(w.delete_old, set(&["edited", "gone"]));
        assert_eq!(w.embed, set(&["new", "edited"]));
    }

    #[test]
    fn incremental_on_noop_delta_selects_nothing() {
        let delta = Delta {
            unchanged: set(&["a", "b"]),
            ..Default::default()
        };
        assert_eq!(select_work(SyncMode::Incremental, &delta), WorkSelection::default());
    }

    #[test]
    fn mode_parses_and_displays() {
        for mode in [SyncMode::None, SyncMode::DeleteStale, SyncMode::Incremental] {
            assert_eq!(mode.to_string().parse::<SyncMode>().unwrap(), mode);
        }
        assert!("full".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::default(), SyncMode::Incremental);
        assert_eq!(serde_json::to_string(&SyncMode::DeleteStale).unwrap(), "\"delete-stale\"");
    }
}
