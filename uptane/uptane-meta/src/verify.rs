//! Threshold verification of signed metadata against a key set.

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde_json::Value;

use uptane_common::{RepositoryType, Role, UptaneError};

use crate::{canonical, key_id, root::Root, targets::TargetsMeta, KeyId, PublicKey, Signature, Signed};

/// Knobs for signature verification, fed from the client configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Accept keys whose declared keyid does not equal the hash of the
    /// key. Signature verification itself is never skipped; this only
    /// exists for servers that compute keyids differently.
    pub disable_keyid_validation: bool,
}

#[derive(Debug, Clone)]
struct RolePolicy {
    keyids: HashSet<KeyId>,
    threshold: u64,
}

/// The key material needed to check signatures on child metadata: a plain
/// value extracted from a verified Root (or from a parent Targets'
/// delegations block). Carries no ownership of the document it came from.
#[derive(Debug, Clone)]
pub struct MetaWithKeys {
    repo: RepositoryType,
    keys: HashMap<KeyId, PublicKey>,
    roles: HashMap<String, RolePolicy>,
}

impl MetaWithKeys {
    /// Extract the key set of a verified Root. Checks the Root key-map
    /// invariants: thresholds are at least one, every role keyid resolves
    /// to a key, and (unless disabled) each keyid equals the key's hash.
    pub fn from_root(root: &Root, opts: &VerifyOptions) -> Result<Self, UptaneError> {
        let meta = root.meta();
        let roles = meta
            .roles
            .iter()
            .map(|(name, role_keys)| {
                (
                    name.clone(),
                    (role_keys.keyids.clone(), role_keys.threshold),
                )
            })
            .collect::<Vec<_>>();
        Self::build(root.repo(), &Role::Root, &meta.keys, roles, opts)
    }

    /// Extract the delegation key set of a verified Targets document.
    pub fn from_delegations(
        repo: RepositoryType,
        parent: &TargetsMeta,
        opts: &VerifyOptions,
    ) -> Result<Self, UptaneError> {
        let Some(delegations) = &parent.delegations else {
            return Err(UptaneError::InvalidMetadata {
                repo,
                role: Role::Targets,
                reason: "metadata delegates no roles".to_owned(),
            });
        };
        let roles = delegations
            .roles
            .iter()
            .map(|role| (role.name.clone(), (role.keyids.clone(), role.threshold)))
            .collect::<Vec<_>>();
        Self::build(repo, &Role::Targets, &delegations.keys, roles, opts)
    }

    fn build(
        repo: RepositoryType,
        source_role: &Role,
        key_map: &std::collections::BTreeMap<KeyId, PublicKey>,
        role_list: Vec<(String, (Vec<KeyId>, u64))>,
        opts: &VerifyOptions,
    ) -> Result<Self, UptaneError> {
        let invalid = |reason: String| UptaneError::InvalidMetadata {
            repo,
            role: source_role.clone(),
            reason,
        };

        let mut keys = HashMap::new();
        for (keyid, key) in key_map {
            if !opts.disable_keyid_validation {
                let computed =
                    key_id(key).map_err(|e| invalid(format!("unencodable key '{keyid}': {e}")))?;
                if &computed != keyid {
                    return Err(invalid(format!(
                        "keyid '{keyid}' does not match the key's hash"
                    )));
                }
            }
            keys.insert(keyid.clone(), key.clone());
        }

        let mut roles = HashMap::new();
        for (name, (keyids, threshold)) in role_list {
            if threshold < 1 {
                return Err(invalid(format!("threshold for role '{name}' is below one")));
            }
            for keyid in &keyids {
                if !keys.contains_key(keyid) {
                    return Err(invalid(format!(
                        "role '{name}' references unknown keyid '{keyid}'"
                    )));
                }
            }
            roles.insert(
                name,
                RolePolicy {
                    keyids: keyids.into_iter().collect(),
                    threshold,
                },
            );
        }

        Ok(MetaWithKeys { repo, keys, roles })
    }

    pub fn repo(&self) -> RepositoryType {
        self.repo
    }

    fn policy(&self, role: &Role) -> Option<&RolePolicy> {
        self.roles.get(role.name())
    }
}

/// Verify a raw metadata document for `role` against `keys` and return the
/// typed payload. Performs, in order: JSON parsing, canonicalization of
/// `signed`, counting of distinct valid role signatures against the
/// threshold (signatures by keys outside the key set are ignored), and
/// the `_type` / optional `repo` field checks. Expiry is the caller's
/// concern.
pub fn verify_metadata<T: DeserializeOwned>(
    raw: &[u8],
    repo: RepositoryType,
    role: &Role,
    keys: &MetaWithKeys,
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
    let signed_value = value
        .get("signed")
        .ok_or_else(|| invalid("missing 'signed'".to_owned()))?;
    let message = canonical::to_canonical_json(signed_value)
        .map_err(|e| invalid(format!("canonical encoding failed: {e}")))?;

    let policy = keys.policy(role).ok_or(UptaneError::UnmetThreshold {
        repo,
        role: role.clone(),
    })?;
    let mut valid: HashSet<&KeyId> = HashSet::new();
    for signature in &signatures {
        if !policy.keyids.contains(&signature.keyid) {
            // Signatures from keys outside the role are ignored, not errors.
            continue;
        }
        let Some(key) = keys.keys.get(&signature.keyid) else {
            continue;
        };
        if crate::verify_signature(key, &message, signature) {
            valid.insert(&signature.keyid);
        }
    }
    if (valid.len() as u64) < policy.threshold {
        return Err(UptaneError::UnmetThreshold {
            repo,
            role: role.clone(),
        });
    }

    let doc_type = signed_value
        .get("_type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing '_type'".to_owned()))?;
    if doc_type != role.type_string() {
        return Err(invalid(format!(
            "expected type '{}', got '{}'",
            role.type_string(),
            doc_type
        )));
    }
    if let Some(doc_repo) = signed_value.get("repo").and_then(Value::as_str) {
        if doc_repo != repo.to_string() {
            return Err(invalid(format!(
                "metadata belongs to repository '{doc_repo}'"
            )));
        }
    }

    let signed: T = serde_json::from_value(signed_value.clone())
        .map_err(|e| invalid(format!("malformed 'signed': {e}")))?;
    Ok(Signed { signed, signatures })
}
