//! Schema fingerprint of a build configuration.
//!
//! Everything that changes chunk identity or embedding semantics is hashed
//! into one opaque token. Old and new vectors under different tokens are
//! not comparable, so the token keys the manifest file and the LATEST
//! pointer.
//!
//! Inputs are canonicalized before hashing: object keys are emitted in
//! sorted order at every nesting level, so two configs that differ only in
//! key order produce the same token regardless of how `serde_json` was
//! compiled.

use serde_json::{json, Value};

use crate::models::{sha256_hex, ChunkConfig};

const SCHEMA_FINGERPRINT_VERSION: &str = "schema-fingerprint-v1";

/// Compute the schema fingerprint (hex SHA-256 of the canonical inputs).
///
/// `extra` carries any additional configuration the caller wants folded
/// into the token (for example provider-specific embedding options).
pub fn compute(
    embedding_model: &str,
    chunk_config: &ChunkConfig,
    include_media_stub: bool,
    id_strategy_version: &str,
    extra: Option<&Value>,
) -> String {
    let input = json!({
        "version": SCHEMA_FINGERPRINT_VERSION,
        "embedModel": embedding_model,
        "chunkConf": {
            "chunkChars": chunk_config.chunk_chars,
            "overlapChars": chunk_config.overlap_chars,
            "minChunkChars": chunk_config.min_chunk_chars,
        },
        "includeMediaStub": include_media_stub,
        "idStrategy": id_strategy_version,
        "extra": extra.cloned().unwrap_or(Value::Null),
    });
    sha256_hex(canonical_json(&input).as_bytes())
}

/// Serialize `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ID_STRATEGY_VERSION;

    fn conf() -> ChunkConfig {
        ChunkConfig {
            chunk_chars: 1800,
            overlap_chars: 200,
            min_chunk_chars: 40,
        }
    }

    fn base() -> String {
        compute("bge-small-en-v1.5", &conf(), false, ID_STRATEGY_VERSION, None)
    }

    #[test]
    fn same_inputs_same_token() {
        assert_eq!(base(), base());
        assert_eq!(base().len(), 64);
    }

    #[test]
    fn extra_key_order_does_not_matter() {
        let a: Value =
            serde_json::from_str(r#"{"provider":"ollama","opts":{"b":2,"a":[1,{"y":1,"x":0}]}}"#)
                .unwrap();
        let b: Value =
            serde_json::from_str(r#"{"opts":{"a":[1,{"x":0,"y":1}],"b":2},"provider":"ollama"}"#)
                .unwrap();
        assert_eq!(
            compute("m", &conf(), true, ID_STRATEGY_VERSION, Some(&a)),
            compute("m", &conf(), true, ID_STRATEGY_VERSION, Some(&b)),
        );
    }

    #[test]
    fn every_field_changes_the_token() {
        let reference = base();
        let mut c = conf();
        c.overlap_chars += 1;
        let variants = [
            compute("bge-base-en-v1.5", &conf(), false, ID_STRATEGY_VERSION, None),
            compute("bge-small-en-v1.5", &c, false, ID_STRATEGY_VERSION, None),
            compute("bge-small-en-v1.5", &conf(), true, ID_STRATEGY_VERSION, None),
            compute("bge-small-en-v1.5", &conf(), false, "other-id-scheme", None),
            compute(
                "bge-small-en-v1.5",
                &conf(),
                false,
                ID_STRATEGY_VERSION,
                Some(&json!({"dims": 384})),
            ),
        ];
        for v in &variants {
            assert_ne!(v, &reference);
        }
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v: Value = serde_json::from_str(r#"{"b":{"d":1,"c":"x"},"a":[true,null]}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":[true,null],"b":{"c":"x","d":1}}"#);
    }
}
