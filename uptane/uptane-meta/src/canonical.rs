//! Canonical JSON encoding. Signatures and hashes are always computed over
//! this deterministic form (key-sorted, UTF-8, no insignificant
//! whitespace), never over the bytes a particular serializer happened to
//! produce.

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use serde_json::Value;

use uptane_common::{RepositoryType, Role, UptaneError};

/// Canonically encode a JSON value.
pub fn to_canonical_json(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(out)
}

/// Canonical bytes of the `signed` portion of a raw metadata document.
/// This is the input to both signature and metadata-hash verification.
pub fn canonical_signed_bytes(
    raw: &[u8],
    repo: RepositoryType,
    role: &Role,
) -> Result<Vec<u8>, UptaneError> {
    let invalid = |reason: String| UptaneError::InvalidMetadata {
        repo,
        role: role.clone(),
        reason,
    };
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| invalid(format!("malformed JSON: {e}")))?;
    let signed = value
        .get("signed")
        .ok_or_else(|| invalid("missing 'signed'".to_owned()))?;
    to_canonical_json(signed).map_err(|e| invalid(format!("canonical encoding failed: {e}")))
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_canonical_json_sorts_keys_and_strips_whitespace() {
        let value = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let canonical = to_canonical_json(&value).unwrap();
        assert_eq!(canonical, br#"{"a":{"x":3,"y":2},"b":1}"#);
    }

    #[test]
    fn test_canonical_roundtrip_is_stable() {
        let raw = br#"{ "signatures" : [],
                        "signed" : { "version" : 1, "_type" : "Snapshot" } }"#;
        let first =
            canonical_signed_bytes(raw, RepositoryType::Image, &Role::Snapshot).unwrap();
        // Re-encoding the canonical form must be a fixed point.
        let doc = format!(r#"{{"signatures":[],"signed":{}}}"#, String::from_utf8(first.clone()).unwrap());
        let second =
            canonical_signed_bytes(doc.as_bytes(), RepositoryType::Image, &Role::Snapshot).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_signed_is_invalid() {
        let err = canonical_signed_bytes(b"{}", RepositoryType::Image, &Role::Snapshot);
        assert!(matches!(err, Err(UptaneError::InvalidMetadata { .. })));
    }
}
