//! TOML configuration.
//!
//! One file describes the vector store, chunking, the embedding provider,
//! the corpus and the sync policies. Every `[sync]` value can be overridden
//! per invocation via [`SyncOverrides`] (the CLI flags).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragsync_core::models::ChunkConfig;
use ragsync_core::strategy::SyncMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite file holding the vector store.
    pub path: PathBuf,
    pub collection: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub chunk_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
    #[serde(default)]
    pub min_chunk_chars: usize,
}

impl ChunkingConfig {
    pub fn to_chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_chars: self.chunk_chars,
            overlap_chars: self.overlap_chars,
            min_chunk_chars: self.min_chunk_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Index a one-line stub for media files matched by `media_globs`.
    #[serde(default)]
    pub include_media_stub: bool,
    #[serde(default = "default_media_globs")]
    pub media_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_media_globs() -> Vec<String> {
    ["png", "jpg", "jpeg", "gif", "svg", "webp", "pdf"]
        .iter()
        .map(|ext| format!("**/*.{ext}"))
        .collect()
}

/// What to do when no manifest exists for the current fingerprint.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnMissingState {
    /// Drop and recreate the collection, then build from scratch.
    Reset,
    /// Refuse to build if the collection already holds items.
    #[default]
    Fail,
    /// Build on top of whatever the collection holds.
    FullUpsert,
}

/// What to do when the LATEST pointer names a different fingerprint.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OnSchemaChange {
    Reset,
    #[default]
    Fail,
}

impl std::str::FromStr for OnMissingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset" => Ok(Self::Reset),
            "fail" => Ok(Self::Fail),
            "full-upsert" => Ok(Self::FullUpsert),
            other => Err(format!(
                "unknown missing-state policy '{other}' (expected reset, fail or full-upsert)"
            )),
        }
    }
}

impl std::str::FromStr for OnSchemaChange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reset" => Ok(Self::Reset),
            "fail" => Ok(Self::Fail),
            other => Err(format!(
                "unknown schema-change policy '{other}' (expected reset or fail)"
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    #[serde(default)]
    pub on_missing_state: OnMissingState,
    #[serde(default)]
    pub on_schema_change: OnSchemaChange,
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    /// Exit non-zero when the post-build consistency check fails.
    #[serde(default = "default_strict")]
    pub strict: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            state_root: default_state_root(),
            on_missing_state: OnMissingState::default(),
            on_schema_change: OnSchemaChange::default(),
            delete_batch_size: default_delete_batch_size(),
            upsert_batch_size: default_upsert_batch_size(),
            strict: default_strict(),
        }
    }
}

fn default_state_root() -> PathBuf {
    PathBuf::from("./data/state")
}
fn default_delete_batch_size() -> usize {
    256
}
fn default_upsert_batch_size() -> usize {
    128
}
fn default_strict() -> bool {
    true
}

/// Per-invocation overrides of `[sync]` and the embed batch size.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub mode: Option<SyncMode>,
    pub state_root: Option<PathBuf>,
    pub on_missing_state: Option<OnMissingState>,
    pub on_schema_change: Option<OnSchemaChange>,
    pub delete_batch_size: Option<usize>,
    pub upsert_batch_size: Option<usize>,
    pub embed_batch_size: Option<usize>,
    pub strict: Option<bool>,
}

impl Config {
    /// Apply CLI overrides and re-validate.
    pub fn with_overrides(mut self, o: &SyncOverrides) -> Result<Self> {
        if let Some(mode) = o.mode {
            self.sync.mode = mode;
        }
        if let Some(root) = &o.state_root {
            self.sync.state_root = root.clone();
        }
        if let Some(p) = o.on_missing_state {
            self.sync.on_missing_state = p;
        }
        if let Some(p) = o.on_schema_change {
            self.sync.on_schema_change = p;
        }
        if let Some(n) = o.delete_batch_size {
            self.sync.delete_batch_size = n;
        }
        if let Some(n) = o.upsert_batch_size {
            self.sync.upsert_batch_size = n;
        }
        if let Some(n) = o.embed_batch_size {
            self.embedding.batch_size = n;
        }
        if let Some(strict) = o.strict {
            self.sync.strict = strict;
        }
        validate(&self)?;
        Ok(self)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.store.collection.trim().is_empty() {
        bail!("store.collection must not be empty");
    }
    if config
        .store
        .collection
        .chars()
        .any(|c| matches!(c, '/' | '\\') || c.is_control())
    {
        bail!(
            "store.collection '{}' must not contain path separators",
            config.store.collection
        );
    }

    // Validate chunking
    let c = &config.chunking;
    if c.chunk_chars == 0 {
        bail!("chunking.chunk_chars must be > 0");
    }
    if c.overlap_chars >= c.chunk_chars {
        bail!("chunking.overlap_chars must be < chunking.chunk_chars");
    }
    if c.min_chunk_chars > c.chunk_chars {
        bail!("chunking.min_chunk_chars must be <= chunking.chunk_chars");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() && config.embedding.provider != "hash" {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }

    // Validate sync
    if config.sync.delete_batch_size == 0 {
        bail!("sync.delete_batch_size must be > 0");
    }
    if config.sync.upsert_batch_size == 0 {
        bail!("sync.upsert_batch_size must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[store]
path = "./data/vectors.sqlite"
collection = "docs"

[chunking]
chunk_chars = 1200

[embedding]
provider = "hash"
dims = 64

[corpus]
root = "./docs"
"#;

    #[test]
    fn example_config_parses() {
        let cfg = parse_config(include_str!("../config/ragsync.example.toml")).unwrap();
        assert_eq!(cfg.store.collection, "docs");
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.chunking.overlap_chars, 120);
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.sync.mode, SyncMode::Incremental);
        assert_eq!(cfg.sync.on_missing_state, OnMissingState::Fail);
        assert_eq!(cfg.sync.on_schema_change, OnSchemaChange::Fail);
        assert_eq!(cfg.sync.delete_batch_size, 256);
        assert_eq!(cfg.sync.upsert_batch_size, 128);
        assert!(cfg.sync.strict);
        assert_eq!(cfg.sync.state_root, PathBuf::from("./data/state"));
        assert_eq!(cfg.corpus.include_globs, vec!["**/*.md", "**/*.txt"]);
        assert!(!cfg.corpus.include_media_stub);
        assert_eq!(cfg.chunking.overlap_chars, 0);
    }

    #[test]
    fn sync_section_parses_kebab_case_values() {
        let toml = format!(
            "{MINIMAL}\n[sync]\nmode = \"delete-stale\"\non_missing_state = \"full-upsert\"\non_schema_change = \"reset\"\nstrict = false\n"
        );
        let cfg = parse_config(&toml).unwrap();
        assert_eq!(cfg.sync.mode, SyncMode::DeleteStale);
        assert_eq!(cfg.sync.on_missing_state, OnMissingState::FullUpsert);
        assert_eq!(cfg.sync.on_schema_change, OnSchemaChange::Reset);
        assert!(!cfg.sync.strict);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let toml = MINIMAL.replace("chunk_chars = 1200", "chunk_chars = 100\noverlap_chars = 100");
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let toml = MINIMAL.replace("provider = \"hash\"", "provider = \"magic\"");
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn overrides_replace_sync_values() {
        let cfg = parse_config(MINIMAL).unwrap();
        let cfg = cfg
            .with_overrides(&SyncOverrides {
                mode: Some(SyncMode::None),
                upsert_batch_size: Some(7),
                embed_batch_size: Some(3),
                strict: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cfg.sync.mode, SyncMode::None);
        assert_eq!(cfg.sync.upsert_batch_size, 7);
        assert_eq!(cfg.embedding.batch_size, 3);
        assert!(!cfg.sync.strict);
    }

    #[test]
    fn zero_batch_override_is_rejected() {
        let cfg = parse_config(MINIMAL).unwrap();
        let res = cfg.with_overrides(&SyncOverrides {
            delete_batch_size: Some(0),
            ..Default::default()
        });
        assert!(res.is_err());
    }

    #[test]
    fn policies_parse_from_cli_strings() {
        assert_eq!("full-upsert".parse::<OnMissingState>().unwrap(), OnMissingState::FullUpsert);
        assert_eq!("reset".parse::<OnSchemaChange>().unwrap(), OnSchemaChange::Reset);
        assert!("later".parse::<OnSchemaChange>().is_err());
    }
}
