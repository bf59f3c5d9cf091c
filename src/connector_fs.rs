//! Filesystem corpus connector.
//!
//! Walks `corpus.root` and turns every matching file into a
//! [`SourceDocument`] keyed by its root-relative path. Media files
//! (`corpus.media_globs`) become a one-line stub document when
//! `include_media_stub` is set and are skipped otherwise.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use ragsync_core::identity::document_id_for;
use ragsync_core::models::{sha256_hex, SourceDocument};

use crate::config::CorpusConfig;

pub const SOURCE_TYPE_MARKDOWN: &str = "markdown";
pub const SOURCE_TYPE_TEXT: &str = "text";
pub const SOURCE_TYPE_MEDIA: &str = "media";

/// Scan the corpus. Output is sorted by `sourceUri`.
pub fn scan_corpus(corpus: &CorpusConfig) -> Result<Vec<SourceDocument>> {
    let root = &corpus.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;
    let media_set = build_globset(&corpus.media_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        // Forward slashes on every platform so URIs are stable.
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }

        if media_set.is_match(&rel_str) {
            if corpus.include_media_stub {
                docs.push(media_stub(path, &rel_str)?);
            }
            continue;
        }

        if !include_set.is_match(&rel_str) {
            continue;
        }

        docs.push(text_document(path, &rel_str)?);
    }

    docs.sort_by(|a, b| a.source_uri.cmp(&b.source_uri));
    tracing::debug!(root = %root.display(), documents = docs.len(), "scanned corpus");

    Ok(docs)
}

fn text_document(path: &Path, relative_path: &str) -> Result<SourceDocument> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let body = String::from_utf8_lossy(&bytes);
    Ok(SourceDocument::from_text(
        relative_path,
        source_type_for(relative_path),
        &modified_rfc3339(path)?,
        &body,
    ))
}

/// A stub whose content hash covers the media bytes, so replacing an image
/// marks the stub as changed.
fn media_stub(path: &Path, relative_path: &str) -> Result<SourceDocument> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(SourceDocument {
        doc_id: document_id_for(relative_path),
        source_uri: relative_path.to_string(),
        source_type: SOURCE_TYPE_MEDIA.to_string(),
        content_sha256: sha256_hex(&bytes),
        updated_at: modified_rfc3339(path)?,
        body: format!("Media file {} ({}, {} bytes)", file_name, relative_path, bytes.len()),
    })
}

fn source_type_for(relative_path: &str) -> &'static str {
    let ext = Path::new(relative_path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" | "mdx" => SOURCE_TYPE_MARKDOWN,
        _ => SOURCE_TYPE_TEXT,
    }
}

fn modified_rfc3339(path: &Path) -> Result<String> {
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    Ok(DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus(root: &Path, include_media_stub: bool) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec!["drafts/**".to_string()],
            follow_symlinks: false,
            include_media_stub,
            media_globs: vec!["**/*.png".to_string()],
        }
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("guides")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::write(root.join("guides/setup.md"), "# Setup\n\nInstall it.").unwrap();
        fs::write(root.join("notes.txt"), "plain notes").unwrap();
        fs::write(root.join("drafts/wip.md"), "not ready").unwrap();
        fs::write(root.join("script.sh"), "echo hi").unwrap();
        fs::write(root.join("diagram.png"), [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
        tmp
    }

    #[test]
    fn scans_matching_files_sorted() {
        let tmp = fixture();
        let docs = scan_corpus(&corpus(tmp.path(), false)).unwrap();
        let uris: Vec<&str> = docs.iter().map(|d| d.source_uri.as_str()).collect();
        assert_eq!(uris, vec!["guides/setup.md", "notes.txt"]);
        assert_eq!(docs[0].source_type, SOURCE_TYPE_MARKDOWN);
        assert_eq!(docs[1].source_type, SOURCE_TYPE_TEXT);
        assert_eq!(docs[0].content_sha256, sha256_hex(b"# Setup\n\nInstall it."));
        assert_eq!(docs[0].doc_id, document_id_for("guides/setup.md"));
        assert!(docs[0].updated_at.ends_with('Z'));
    }

    #[test]
    fn media_stub_only_when_enabled() {
        let tmp = fixture();
        let docs = scan_corpus(&corpus(tmp.path(), true)).unwrap();
        let media = docs
            .iter()
            .find(|d| d.source_uri == "diagram.png")
            .expect("media stub present");
        assert_eq!(media.source_type, SOURCE_TYPE_MEDIA);
        assert!(media.body.contains("diagram.png"));
        assert_eq!(media.content_sha256, sha256_hex(&[0x89u8, 0x50, 0x4e, 0x47]));
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let cfg = corpus(&tmp.path().join("absent"), false);
        assert!(scan_corpus(&cfg).is_err());
    }
}
