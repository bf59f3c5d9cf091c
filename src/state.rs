//! On-disk build state: manifests and the LATEST pointer.
//!
//! Layout under the state root:
//!
//! ```text
//! <state_root>/<collection>/LATEST              one fingerprint token
//! <state_root>/<collection>/<fingerprint>.json  manifest
//! ```
//!
//! Both files are only ever replaced through [`write_atomic`]
//! (temp file in the same directory, fsync, rename), so a reader sees
//! either the old or the new content, never a torn write.
//!
//! The LATEST pointer sits behind [`PointerStore`] so the build engine can
//! be driven with an in-memory pointer in tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use ragsync_core::identity::document_id_for;
use ragsync_core::models::Manifest;
use ragsync_core::SyncError;

const LATEST_FILE: &str = "LATEST";

/// Replace `path` with `bytes` without ever exposing a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent directory: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| anyhow!("Failed to replace {}: {}", path.display(), e.error))?;
    Ok(())
}

/// Storage for the per-collection "latest fingerprint" token.
pub trait PointerStore: Send + Sync {
    fn read(&self, collection: &str) -> Result<Option<String>>;
    fn write(&self, collection: &str, token: &str) -> Result<()>;
}

/// `<root>/<collection>/LATEST` files.
pub struct FsPointerStore {
    root: PathBuf,
}

impl FsPointerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.root.join(collection).join(LATEST_FILE)
    }
}

impl PointerStore for FsPointerStore {
    fn read(&self, collection: &str) -> Result<Option<String>> {
        let path = self.path(collection);
        match std::fs::read_to_string(&path) {
            Ok(s) => {
                let token = s.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn write(&self, collection: &str, token: &str) -> Result<()> {
        write_atomic(&self.path(collection), format!("{token}\n").as_bytes())
    }
}

/// Pointer store that lives only as long as the process.
#[derive(Default)]
pub struct MemoryPointerStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerStore for MemoryPointerStore {
    fn read(&self, collection: &str) -> Result<Option<String>> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| anyhow!("pointer store lock poisoned"))?;
        Ok(tokens.get(collection).cloned())
    }

    fn write(&self, collection: &str, token: &str) -> Result<()> {
        self.tokens
            .lock()
            .map_err(|_| anyhow!("pointer store lock poisoned"))?
            .insert(collection.to_string(), token.to_string());
        Ok(())
    }
}

/// Manifests plus the LATEST pointer for one state root.
pub struct StateStore {
    root: PathBuf,
    pointers: Box<dyn PointerStore>,
}

impl StateStore {
    /// File-backed state, pointer included.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let pointers = Box::new(FsPointerStore::new(root.clone()));
        Self { root, pointers }
    }

    pub fn with_pointer_store(root: impl Into<PathBuf>, pointers: Box<dyn PointerStore>) -> Self {
        Self {
            root: root.into(),
            pointers,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self, collection: &str, token: &str) -> PathBuf {
        self.root.join(collection).join(format!("{token}.json"))
    }

    pub fn read_latest_pointer(&self, collection: &str) -> Result<Option<String>, SyncError> {
        self.pointers.read(collection).map_err(SyncError::State)
    }

    pub fn write_latest_pointer(&self, collection: &str, token: &str) -> Result<(), SyncError> {
        self.pointers
            .write(collection, token)
            .map_err(SyncError::State)?;
        tracing::debug!(collection, token, "LATEST pointer updated");
        Ok(())
    }

    /// Load the manifest for `(collection, token)`, if one was committed.
    ///
    /// Older manifests missing structural fields are upgraded in memory;
    /// the upgraded field names end up in [`Manifest::upgraded_fields`].
    /// A file that is not valid JSON or lacks required fields is a
    /// configuration error.
    pub fn load_manifest(
        &self,
        collection: &str,
        token: &str,
    ) -> Result<Option<Manifest>, SyncError> {
        let path = self.manifest_path(collection, token);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::State(
                    anyhow::Error::new(e).context(format!("Failed to read {}", path.display())),
                ))
            }
        };

        let manifest = parse_manifest(&raw).map_err(|e| {
            SyncError::Configuration(format!("unreadable manifest {}: {:#}", path.display(), e))
        })?;

        if manifest.schema_hash != token {
            return Err(SyncError::Configuration(format!(
                "manifest {} records schemaHash {} but is stored under {}",
                path.display(),
                manifest.schema_hash,
                token
            )));
        }

        if manifest.is_legacy() {
            tracing::warn!(
                path = %path.display(),
                fields = ?manifest.upgraded_fields,
                "legacy manifest upgraded in memory; it will be rewritten on the next successful build"
            );
        }

        Ok(Some(manifest))
    }

    pub fn save_manifest(
        &self,
        collection: &str,
        token: &str,
        manifest: &Manifest,
    ) -> Result<(), SyncError> {
        let path = self.manifest_path(collection, token);
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| SyncError::State(anyhow::Error::new(e)))?;
        write_atomic(&path, &data).map_err(SyncError::State)?;
        tracing::debug!(path = %path.display(), docs = manifest.docs.len(), "manifest saved");
        Ok(())
    }
}

/// Parse manifest JSON, filling structural fields that older writers
/// did not emit.
pub fn parse_manifest(raw: &str) -> Result<Manifest> {
    let mut value: Value = serde_json::from_str(raw)?;
    let root = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("manifest is not a JSON object"))?;

    let mut upgraded = Vec::new();

    fill(root, "includeMediaStub", Value::Bool(false), "includeMediaStub", &mut upgraded);
    fill(root, "updatedAt", Value::String(String::new()), "updatedAt", &mut upgraded);
    fill(root, "docs", Value::Object(Map::new()), "docs", &mut upgraded);
    if !root.contains_key("lastBuild") {
        upgraded.push("lastBuild".to_string());
    }

    if let Some(conf) = root.get_mut("chunkConf").and_then(Value::as_object_mut) {
        fill(conf, "overlapChars", Value::from(0u64), "chunkConf.overlapChars", &mut upgraded);
        fill(conf, "minChunkChars", Value::from(0u64), "chunkConf.minChunkChars", &mut upgraded);
    }

    let docs = root
        .get_mut("docs")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| anyhow!("manifest field 'docs' is not an object"))?;
    let mut doc_fields: Vec<&'static str> = Vec::new();
    for (uri, record) in docs.iter_mut() {
        let record = record
            .as_object_mut()
            .ok_or_else(|| anyhow!("manifest entry for '{}' is not an object", uri))?;
        if !record.contains_key("sourceUri") {
            record.insert("sourceUri".into(), Value::String(uri.clone()));
            doc_fields.push("docs.*.sourceUri");
        }
        if !record.contains_key("docId") {
            record.insert("docId".into(), Value::String(document_id_for(uri)));
            doc_fields.push("docs.*.docId");
        }
        if !record.contains_key("sourceType") {
            record.insert("sourceType".into(), Value::String(String::new()));
            doc_fields.push("docs.*.sourceType");
        }
        if !record.contains_key("updatedAt") {
            record.insert("updatedAt".into(), Value::String(String::new()));
            doc_fields.push("docs.*.updatedAt");
        }
    }
    doc_fields.sort_unstable();
    doc_fields.dedup();
    upgraded.extend(doc_fields.into_iter().map(String::from));

    let mut manifest: Manifest = serde_json::from_value(value)?;
    manifest.upgraded_fields = upgraded;
    Ok(manifest)
}

fn fill(
    obj: &mut Map<String, Value>,
    key: &str,
    default: Value,
    label: &str,
    upgraded: &mut Vec<String>,
) {
    if !obj.contains_key(key) {
        obj.insert(key.to_string(), default);
        upgraded.push(label.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragsync_core::models::{ChunkConfig, DocumentRecord, LastBuild};
    use tempfile::TempDir;

    fn sample_manifest(token: &str) -> Manifest {
        let mut m = Manifest::empty(
            token,
            "data/vectors.sqlite",
            "docs",
            "hash-fnv1a-64",
            ChunkConfig::default(),
            false,
        );
        m.docs.insert(
            "a.md".to_string(),
            DocumentRecord {
                doc_id: document_id_for("a.md"),
                source_uri: "a.md".to_string(),
                source_type: "markdown".to_string(),
                content_sha256: "h1".to_string(),
                n_chunks: 3,
                updated_at: "2024-01-01T00:00:00Z".to_string(),
            },
        );
        m.last_build = Some(LastBuild::default());
        m
    }

    #[test]
    fn pointer_absent_then_written() {
        let tmp = TempDir::new().unwrap();
        let state = StateStore::new(tmp.path());
        assert_eq!(state.read_latest_pointer("docs").unwrap(), None);
        state.write_latest_pointer("docs", "abc123").unwrap();
        assert_eq!(
            state.read_latest_pointer("docs").unwrap().as_deref(),
            Some("abc123")
        );
        let raw = std::fs::read_to_string(tmp.path().join("docs/LATEST")).unwrap();
        assert_eq!(raw.trim(), "abc123");
        state.write_latest_pointer("docs", "def456").unwrap();
        assert_eq!(
            state.read_latest_pointer("docs").unwrap().as_deref(),
            Some("def456")
        );
    }

    #[test]
    fn manifest_save_load() {
        let tmp = TempDir::new().unwrap();
        let state = StateStore::new(tmp.path());
        assert!(state.load_manifest("docs", "tok").unwrap().is_none());

        let m = sample_manifest("tok");
        state.save_manifest("docs", "tok", &m).unwrap();
        let loaded = state.load_manifest("docs", "tok").unwrap().unwrap();
        assert_eq!(loaded, m);
        assert!(!loaded.is_legacy());

        // No temp files left next to the manifest.
        let entries: Vec<_> = std::fs::read_dir(tmp.path().join("docs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["tok.json".to_string()]);
    }

    #[test]
    fn legacy_manifest_is_upgraded_with_marker() {
        let raw = r#"{
            "schemaHash": "tok",
            "db": "data/vectors.sqlite",
            "collection": "docs",
            "embedModel": "m",
            "chunkConf": {"chunkChars": 1000, "overlapChars": 100},
            "docs": {
                "a.md": {"contentSha256": "h1", "nChunks": 2}
            }
        }"#;
        let m = parse_manifest(raw).unwrap();
        assert!(m.is_legacy());
        for field in [
            "includeMediaStub",
            "lastBuild",
            "chunkConf.minChunkChars",
            "docs.*.docId",
            "docs.*.sourceType",
        ] {
            assert!(
                m.upgraded_fields.iter().any(|f| f == field),
                "missing marker for {field}: {:?}",
                m.upgraded_fields
            );
        }
        let doc = &m.docs["a.md"];
        assert_eq!(doc.doc_id, document_id_for("a.md"));
        assert_eq!(doc.source_uri, "a.md");
        assert_eq!(doc.n_chunks, 2);
        assert_eq!(m.chunk_conf.min_chunk_chars, 0);
        assert!(m.last_build.is_none());
    }

    #[test]
    fn malformed_manifest_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let state = StateStore::new(tmp.path());
        let path = state.manifest_path("docs", "tok");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let err = state.load_manifest("docs", "tok").unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));

        std::fs::write(&path, r#"{"schemaHash": "tok"}"#).unwrap();
        let err = state.load_manifest("docs", "tok").unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn manifest_under_wrong_token_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let state = StateStore::new(tmp.path());
        let m = sample_manifest("other");
        state.save_manifest("docs", "tok", &m).unwrap();
        assert!(matches!(
            state.load_manifest("docs", "tok"),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn memory_pointer_store_is_isolated_per_collection() {
        let tmp = TempDir::new().unwrap();
        let state =
            StateStore::with_pointer_store(tmp.path(), Box::new(MemoryPointerStore::new()));
        state.write_latest_pointer("a", "t1").unwrap();
        assert_eq!(state.read_latest_pointer("a").unwrap().as_deref(), Some("t1"));
        assert_eq!(state.read_latest_pointer("b").unwrap(), None);
        assert!(!tmp.path().join("a/LATEST").exists());
    }
}
