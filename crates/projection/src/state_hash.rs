//! Deterministic state hashing for replay validation.

use serde_json::Value;

use nexus_core::canonical;

/// SHA-256 over the canonical JSON of a snapshot.
///
/// Canonicalization (sorted keys, fixed float precision) makes the hash a
/// function of the snapshot's content alone, so two independent runs over
/// the same event sequence hash identically.
pub fn snapshot_hash(snapshot: &Value) -> String {
    canonical::sha256_hex(canonical::canonical_json(snapshot).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_ignores_key_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"rows":[{"id":1,"v":"x"}],"n":1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"n":1,"rows":[{"v":"x","id":1}]}"#).unwrap();
        assert_eq!(snapshot_hash(&a), snapshot_hash(&b));
    }

    #[test]
    fn hash_changes_with_content() {
        assert_ne!(
            snapshot_hash(&json!({"n": 1})),
            snapshot_hash(&json!({"n": 2}))
        );
    }
}
