//! Canonical form, content hashing and provenance annotations.
//!
//! The content hash covers `{apiVersion, kind, metadata.{name, namespace,
//! labels, user annotations}, spec}` serialized as key-sorted compact JSON.
//! Provenance annotations are excluded, so rewriting them never changes the
//! hash that Git, cluster and record store are compared on.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use fabricsync_core::FabricId;

pub const ANNOTATION_PREFIX: &str = "fabricsync.githedgehog.com/";
pub const MANAGED_BY: &str = "fabricsync.githedgehog.com/managed-by";
pub const FABRIC: &str = "fabricsync.githedgehog.com/fabric";
pub const CONTENT_HASH: &str = "fabricsync.githedgehog.com/content-hash";
pub const INGESTED_AT: &str = "fabricsync.githedgehog.com/ingested-at";
pub const LAST_SYNC: &str = "fabricsync.githedgehog.com/last-sync";
pub const MANAGER_NAME: &str = "fabricsync";

/// Provenance stamped onto every managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub fabric: FabricId,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    pub last_sync: DateTime<Utc>,
}

impl Provenance {
    pub fn new(fabric: FabricId, content_hash: String, at: DateTime<Utc>) -> Self {
        Self {
            fabric,
            content_hash,
            ingested_at: at,
            last_sync: at,
        }
    }

    pub(crate) fn annotations(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(MANAGED_BY.to_string(), MANAGER_NAME.to_string());
        out.insert(FABRIC.to_string(), self.fabric.0.clone());
        out.insert(CONTENT_HASH.to_string(), self.content_hash.clone());
        out.insert(
            INGESTED_AT.to_string(),
            self.ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        out.insert(
            LAST_SYNC.to_string(),
            self.last_sync.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        out
    }

    /// Read provenance back from annotations. `None` if the file is not ours.
    pub(crate) fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        if annotations.get(MANAGED_BY).map(String::as_str) != Some(MANAGER_NAME) {
            return None;
        }
        let parse = |key: &str| {
            annotations
                .get(key)
                .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
                .map(|d| d.with_timezone(&Utc))
        };
        Some(Self {
            fabric: FabricId::from(annotations.get(FABRIC)?.as_str()),
            content_hash: annotations.get(CONTENT_HASH)?.clone(),
            ingested_at: parse(INGESTED_AT)?,
            last_sync: parse(LAST_SYNC)?,
        })
    }
}

/// `true` for annotation keys owned by fabricsync.
pub fn is_provenance_key(key: &str) -> bool {
    key.starts_with(ANNOTATION_PREFIX)
}

/// Compact, key-sorted JSON text. `serde_json::Map` is ordered by key
/// while the `preserve_order` feature is off.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// SHA-256 hex digest of arbitrary text, CRLF-normalised first.
pub fn hash_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    hash_bytes(normalized.as_bytes())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Content hash of a canonical value.
pub fn content_hash(canonical: &Value) -> String {
    hash_text(&canonical_json(canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_hash() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
        let b = json!({"a": {"x": "s", "y": [1, 2]}, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
    }

    #[test]
    fn crlf_is_normalised() {
        assert_eq!(hash_text("a\r\nb\r\n"), hash_text("a\nb\n"));
    }

    #[test]
    fn provenance_roundtrip_through_annotations() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let p = Provenance::new(FabricId::from("dc1"), "abc".into(), at);
        let back = Provenance::from_annotations(&p.annotations()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn foreign_annotations_are_not_provenance() {
        let mut ann = BTreeMap::new();
        ann.insert(MANAGED_BY.to_string(), "someone-else".to_string());
        assert!(Provenance::from_annotations(&ann).is_none());
        assert!(is_provenance_key(CONTENT_HASH));
        assert!(!is_provenance_key("example.com/owner"));
    }
}
