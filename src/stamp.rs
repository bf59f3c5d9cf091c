//! Build stamp: an independent freshness marker.
//!
//! Written next to the state (`<state_root>/<collection>/BUILD_STAMP.json`)
//! only after the consistency check passed. Freshness checks read
//! `updatedAt` from here rather than the store file's mtime, which some
//! storage engines bump on plain reads.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use ragsync_core::models::sha256_hex;

use crate::state::write_atomic;

pub const STAMP_FILE: &str = "BUILD_STAMP.json";

/// Writer tag used by `ragsync build`.
pub const WRITER_BUILD: &str = "ragsync build";
/// Writer tag used by `ragsync stamp`.
pub const WRITER_STAMP: &str = "ragsync stamp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStamp {
    pub schema_hash: String,
    pub db: String,
    pub collection: String,
    pub collection_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanRef>,
    pub writer: String,
    pub updated_at: String,
}

/// Reference to the plan file a build was executed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl PlanRef {
    /// Hash the plan file and pull `plannedChunks` out of it. Read or
    /// parse failures are recorded rather than returned.
    pub fn from_file(path: &Path) -> Self {
        let display = path.display().to_string();
        match std::fs::read(path) {
            Ok(bytes) => {
                let planned_chunks = serde_json::from_slice::<serde_json::Value>(&bytes)
                    .ok()
                    .and_then(|v| v.get("plannedChunks").and_then(|n| n.as_u64()));
                Self {
                    path: display,
                    sha256: Some(sha256_hex(&bytes)),
                    planned_chunks,
                    read_error: None,
                }
            }
            Err(e) => Self {
                path: display,
                sha256: None,
                planned_chunks: None,
                read_error: Some(e.to_string()),
            },
        }
    }
}

pub fn stamp_path(state_root: &Path, collection: &str) -> PathBuf {
    state_root.join(collection).join(STAMP_FILE)
}

/// Everything a stamp records apart from its timestamp.
pub struct StampInput<'a> {
    pub schema_hash: &'a str,
    pub store_location: &'a str,
    pub collection: &'a str,
    pub store_count: Result<u64, String>,
    pub plan_path: Option<&'a Path>,
    pub writer: &'a str,
}

/// Write the stamp atomically and return what was written.
pub fn write(state_root: &Path, input: StampInput<'_>) -> Result<BuildStamp> {
    let (collection_count, count_error) = match input.store_count {
        Ok(n) => (Some(n), None),
        Err(e) => (None, Some(e)),
    };
    let stamp = BuildStamp {
        schema_hash: input.schema_hash.to_string(),
        db: input.store_location.to_string(),
        collection: input.collection.to_string(),
        collection_count,
        count_error,
        plan: input.plan_path.map(PlanRef::from_file),
        writer: input.writer.to_string(),
        updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    let path = stamp_path(state_root, input.collection);
    write_atomic(&path, &serde_json::to_vec_pretty(&stamp)?)?;
    tracing::debug!(path = %path.display(), writer = input.writer, "build stamp written");
    Ok(stamp)
}

pub fn read(state_root: &Path, collection: &str) -> Result<Option<BuildStamp>> {
    let path = stamp_path(state_root, collection);
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid build stamp: {}", path.display()))?,
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_then_read() {
        let tmp = TempDir::new().unwrap();
        let plan = tmp.path().join("plan.json");
        std::fs::write(&plan, r#"{"plannedChunks": 12}"#).unwrap();

        let written = write(
            tmp.path(),
            StampInput {
                schema_hash: "tok",
                store_location: "data/vectors.sqlite",
                collection: "docs",
                store_count: Ok(12),
                plan_path: Some(&plan),
                writer: WRITER_BUILD,
            },
        )
        .unwrap();

        let read_back = read(tmp.path(), "docs").unwrap().unwrap();
        assert_eq!(read_back, written);
        assert_eq!(read_back.collection_count, Some(12));
        let plan_ref = read_back.plan.unwrap();
        assert_eq!(plan_ref.planned_chunks, Some(12));
        assert_eq!(
            plan_ref.sha256.as_deref(),
            Some(sha256_hex(br#"{"plannedChunks": 12}"#).as_str())
        );
        assert!(plan_ref.read_error.is_none());
    }

    #[test]
    fn count_error_and_unreadable_plan_are_recorded() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.json");
        let stamp = write(
            tmp.path(),
            StampInput {
                schema_hash: "tok",
                store_location: "db",
                collection: "docs",
                store_count: Err("store offline".to_string()),
                plan_path: Some(&missing),
                writer: WRITER_STAMP,
            },
        )
        .unwrap();
        assert_eq!(stamp.collection_count, None);
        assert_eq!(stamp.count_error.as_deref(), Some("store offline"));
        assert!(stamp.plan.unwrap().read_error.is_some());

        let json = std::fs::read_to_string(stamp_path(tmp.path(), "docs")).unwrap();
        assert!(json.contains("\"countError\""));
        assert!(json.contains("\"writer\": \"ragsync stamp\""));
    }

    #[test]
    fn missing_stamp_reads_as_none() {
        let tmp = TempDir::new().unwrap();
        assert!(read(tmp.path(), "docs").unwrap().is_none());
    }
}
