//! Wire format of Uptane metadata: canonical JSON documents of the form
//! `{"signatures": [...], "signed": {...}}`, typed views over the signed
//! payloads, and threshold signature verification against a key set.
//!
//! Verification works on the raw document bytes so that hashes and
//! signatures are computed over exactly what the repository served; the
//! typed structs are read-only views produced after the signatures have
//! been checked.

use std::collections::BTreeMap;

use rsa::pkcs8::DecodePublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use uptane_common::crypto::{verify_sha256, verify_sha512};
use uptane_common::{RepositoryType, Role, UptaneError, Version};

pub mod builder;
pub mod canonical;
pub mod root;
pub mod sign;
pub mod snapshot;
pub mod targets;
pub mod timestamp;
pub mod verify;

pub use root::{Root, RootMeta};
pub use snapshot::SnapshotMeta;
pub use targets::TargetsMeta;
pub use timestamp::TimestampMeta;
pub use verify::{verify_metadata, MetaWithKeys, VerifyOptions};

/// Hex-encoded SHA-256 of the canonical JSON encoding of a public key.
pub type KeyId = String;

/// One entry of a document's `signatures` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: KeyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub sig: String,
}

/// A role public key as carried in Root (or delegation) metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub keytype: KeyType,
    pub keyval: KeyValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Ed25519: hex encoding of the 32-byte key. RSA: PEM (SPKI) block.
    pub public: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "ED25519", alias = "ed25519")]
    Ed25519,
    #[serde(rename = "RSA", alias = "rsa")]
    Rsa,
}

/// A metadata document whose signatures have been checked: the typed
/// payload plus the signature list that authenticated it.
#[derive(Debug, Clone)]
pub struct Signed<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

/// One file entry in Timestamp or Snapshot `meta` maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaItem {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
}

/// Hash algorithms the client can recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMethod {
    Sha256,
    Sha512,
}

impl HashMethod {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "sha256" => Some(HashMethod::Sha256),
            "sha512" => Some(HashMethod::Sha512),
            _ => None,
        }
    }
}

/// A single expected digest. Equality is method-and-digest, with the
/// digest normalized to lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hash {
    pub method: HashMethod,
    pub digest: String,
}

impl Hash {
    pub fn new(method: HashMethod, digest: &str) -> Self {
        Hash {
            method,
            digest: digest.to_ascii_lowercase(),
        }
    }

    /// Recompute this hash over `data` and compare.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self.method {
            HashMethod::Sha256 => verify_sha256(&self.digest, data),
            HashMethod::Sha512 => verify_sha512(&self.digest, data),
        }
    }
}

/// Extract the hashes with a supported method from a wire-format hash map.
/// Unknown methods are skipped.
pub fn hashes_from_map(map: &BTreeMap<String, String>) -> Vec<Hash> {
    map.iter()
        .filter_map(|(method, digest)| {
            HashMethod::from_key(method).map(|m| Hash::new(m, digest))
        })
        .collect()
}

/// Why a hash check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashCheckFailure {
    /// The map declared hashes, but none with a method this client knows.
    NoSupportedHash,
    /// A recomputed digest differed from the declared one.
    Mismatch,
}

/// Check `data` against every supported hash in `hashes`.
pub fn check_hashes(
    data: &[u8],
    hashes: &BTreeMap<String, String>,
) -> Result<(), HashCheckFailure> {
    let supported = hashes_from_map(hashes);
    if supported.is_empty() {
        return Err(HashCheckFailure::NoSupportedHash);
    }
    for hash in &supported {
        if !hash.matches(data) {
            return Err(HashCheckFailure::Mismatch);
        }
    }
    Ok(())
}

/// Compute the keyid of a public key: SHA-256 over the canonical JSON
/// encoding of the key object.
pub fn key_id(key: &PublicKey) -> Result<KeyId, serde_json::Error> {
    let value = serde_json::to_value(key)?;
    let canonical = canonical::to_canonical_json(&value)?;
    Ok(uptane_common::crypto::sha256_hex(canonical))
}

/// Verify one signature over `msg` with `key`. Returns false on any
/// decoding or verification failure; the decision of whether that matters
/// belongs to the threshold logic.
pub fn verify_signature(key: &PublicKey, msg: &[u8], sig: &Signature) -> bool {
    let outcome = match key.keytype {
        KeyType::Ed25519 => verify_ed25519(&key.keyval.public, msg, &sig.sig),
        KeyType::Rsa => verify_rsa_pss(&key.keyval.public, msg, &sig.sig),
    };
    match outcome {
        Ok(true) => {
            trace!(keyid = %sig.keyid, "successful signature verification");
            true
        }
        Ok(false) => {
            trace!(keyid = %sig.keyid, "failed signature verification");
            false
        }
        Err(reason) => {
            trace!(keyid = %sig.keyid, reason, "unusable signature");
            false
        }
    }
}

fn verify_ed25519(public_hex: &str, msg: &[u8], sig_hex: &str) -> Result<bool, &'static str> {
    use signature::Verifier;

    let public: [u8; 32] = hex::decode(public_hex)
        .map_err(|_| "public key is not hex")?
        .try_into()
        .map_err(|_| "public key has wrong length")?;
    let key = ed25519_dalek::VerifyingKey::from_bytes(&public)
        .map_err(|_| "public key is not a curve point")?;
    let raw = hex::decode(sig_hex).map_err(|_| "signature is not hex")?;
    let sig =
        ed25519_dalek::Signature::from_slice(&raw).map_err(|_| "signature has wrong length")?;
    Ok(key.verify(msg, &sig).is_ok())
}

fn verify_rsa_pss(public_pem: &str, msg: &[u8], sig_b64: &str) -> Result<bool, &'static str> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use signature::Verifier;

    let key =
        rsa::RsaPublicKey::from_public_key_pem(public_pem).map_err(|_| "public key is not PEM")?;
    let raw = STANDARD
        .decode(sig_b64)
        .map_err(|_| "signature is not base64")?;
    let sig = rsa::pss::Signature::try_from(raw.as_slice())
        .map_err(|_| "signature has wrong length")?;
    let key = rsa::pss::VerifyingKey::<sha2::Sha256>::new(key);
    Ok(key.verify(msg, &sig).is_ok())
}

/// Peek at `signed.version` without any verification. Only usable for
/// local/remote ordering decisions; never as a trust statement.
pub fn extract_version_untrusted(
    raw: &[u8],
    repo: RepositoryType,
    role: &Role,
) -> Result<Version, UptaneError> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| UptaneError::InvalidMetadata {
        repo,
        role: role.clone(),
        reason: format!("malformed JSON: {e}"),
    })?;
    value
        .get("signed")
        .and_then(|signed| signed.get("version"))
        .and_then(Value::as_u64)
        .ok_or_else(|| UptaneError::InvalidMetadata {
            repo,
            role: role.clone(),
            reason: "missing 'signed.version'".to_owned(),
        })
}

/// Parse a document into its typed payload without checking signatures.
/// Used for documents that were verified when they were stored, or as the
/// first step of Root self-verification.
pub fn parse_untrusted<T: serde::de::DeserializeOwned>(
    raw: &[u8],
    repo: RepositoryType,
    role: &Role,
) -> Result<Signed<T>, UptaneError> {
    let invalid = |reason: String| UptaneError::InvalidMetadata {
        repo,
        role: role.clone(),
        reason,
    };
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| invalid(format!("malformed JSON: {e}")))?;
    let signatures = value
        .get("signatures")
        .cloned()
        .ok_or_else(|| invalid("missing 'signatures'".to_owned()))?;
    let signatures: Vec<Signature> = serde_json::from_value(signatures)
        .map_err(|e| invalid(format!("malformed 'signatures': {e}")))?;
    let signed = value
        .get("signed")
        .cloned()
        .ok_or_else(|| invalid("missing 'signed'".to_owned()))?;
    let signed: T =
        serde_json::from_value(signed).map_err(|e| invalid(format!("malformed 'signed': {e}")))?;
    Ok(Signed { signed, signatures })
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;
    use crate::sign::SigningKey;

    #[test]
    fn test_check_hashes() {
        let data = b"snapshot bytes";
        let mut hashes = BTreeMap::new();
        hashes.insert(
            "sha256".to_owned(),
            uptane_common::crypto::sha256_hex(data),
        );
        assert_eq!(check_hashes(data, &hashes), Ok(()));

        hashes.insert(
            "sha512".to_owned(),
            uptane_common::crypto::sha512_hex(b"different bytes"),
        );
        assert_eq!(check_hashes(data, &hashes), Err(HashCheckFailure::Mismatch));

        let mut unknown_only = BTreeMap::new();
        unknown_only.insert("blake2".to_owned(), "aa".to_owned());
        assert_eq!(
            check_hashes(data, &unknown_only),
            Err(HashCheckFailure::NoSupportedHash)
        );
    }

    #[test]
    fn test_hash_equality_ignores_digest_case() {
        assert_eq!(
            Hash::new(HashMethod::Sha256, "AABB"),
            Hash::new(HashMethod::Sha256, "aabb")
        );
    }

    #[test]
    fn test_extract_version_untrusted() {
        let raw = br#"{"signatures": [], "signed": {"_type": "Targets", "version": 7}}"#;
        let version =
            extract_version_untrusted(raw, RepositoryType::Director, &Role::Targets).unwrap();
        assert_eq!(version, 7);

        let garbage = extract_version_untrusted(b"nope", RepositoryType::Director, &Role::Targets);
        assert!(matches!(
            garbage,
            Err(UptaneError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_ed25519_signature_roundtrip() {
        let key = SigningKey::generate_ed25519();
        let public = key.public_key();
        let sig = key.sign(b"message");
        assert!(verify_signature(&public, b"message", &sig));
        assert!(!verify_signature(&public, b"other message", &sig));
    }

    #[test]
    fn test_rsa_pss_signature_roundtrip() {
        let key = SigningKey::generate_rsa().expect("RSA key generation failed");
        let public = key.public_key();
        let sig = key.sign(b"message");
        assert!(verify_signature(&public, b"message", &sig));
        assert!(!verify_signature(&public, b"other message", &sig));
    }

    #[test]
    fn test_keyid_is_canonical_key_digest() {
        let key = SigningKey::generate_ed25519();
        let public = key.public_key();
        let id = key_id(&public).unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(id, key.key_id());
    }
}
