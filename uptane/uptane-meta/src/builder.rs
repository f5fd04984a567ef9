//! Builders for producing signed metadata documents. Repositories are
//! normally built server-side; these exist so tests and tooling can stand
//! up a complete chain of trust in a few lines.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};

use uptane_common::{Role, Version};

use crate::canonical::to_canonical_json;
use crate::sign::SigningKey;
use crate::{key_id, KeyId, PublicKey};

/// Sign a `signed` payload with each key and assemble the full document.
pub fn sign_metadata(signed: &Value, keys: &[&SigningKey]) -> Result<Vec<u8>, serde_json::Error> {
    let message = to_canonical_json(signed)?;
    let signatures: Vec<Value> = keys
        .iter()
        .map(|key| serde_json::to_value(key.sign(&message)))
        .collect::<Result<_, _>>()?;
    serde_json::to_vec(&json!({
        "signatures": signatures,
        "signed": signed,
    }))
}

fn expiration_utc(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> String {
    Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
        .single()
        .expect("invalid expiration date")
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Builds the `signed` payload of a Root document.
#[derive(Debug, Clone)]
pub struct RootBuilder {
    version: Version,
    expires: String,
    keys: BTreeMap<KeyId, PublicKey>,
    roles: BTreeMap<String, (Vec<KeyId>, u64)>,
    consistent_snapshot: Option<bool>,
}

impl Default for RootBuilder {
    fn default() -> Self {
        RootBuilder {
            version: 1,
            expires: "2038-01-01T00:00:00Z".to_owned(),
            keys: BTreeMap::new(),
            roles: BTreeMap::new(),
            consistent_snapshot: None,
        }
    }
}

impl RootBuilder {
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_expiration_utc(
        mut self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Self {
        self.expires = expiration_utc(year, month, day, hour, min, sec);
        self
    }

    pub fn consistent_snapshot(mut self, value: bool) -> Self {
        self.consistent_snapshot = Some(value);
        self
    }

    /// Register `keys` for `role` with the given threshold. Keyids are
    /// computed from the keys themselves.
    pub fn with_role_and_key(mut self, role: &str, keys: &[PublicKey], threshold: u64) -> Self {
        let mut keyids = Vec::new();
        for key in keys {
            let keyid = key_id(key).expect("public key serialization failed");
            self.keys.insert(keyid.clone(), key.clone());
            keyids.push(keyid);
        }
        self.roles.insert(role.to_owned(), (keyids, threshold));
        self
    }

    pub fn build(&self) -> Value {
        let roles: BTreeMap<&String, Value> = self
            .roles
            .iter()
            .map(|(name, (keyids, threshold))| {
                (name, json!({ "keyids": keyids, "threshold": threshold }))
            })
            .collect();
        let mut signed = json!({
            "_type": "Root",
            "version": self.version,
            "expires": self.expires,
            "keys": self.keys,
            "roles": roles,
        });
        if let Some(consistent) = self.consistent_snapshot {
            signed["consistent_snapshot"] = json!(consistent);
        }
        signed
    }
}

/// Builds the `signed` payload of a Timestamp document.
#[derive(Debug, Clone)]
pub struct TimestampBuilder {
    version: Version,
    expires: String,
    snapshot_version: Version,
    snapshot_length: Option<u64>,
    snapshot_hashes: BTreeMap<String, String>,
}

impl Default for TimestampBuilder {
    fn default() -> Self {
        TimestampBuilder {
            version: 1,
            expires: "2038-01-01T00:00:00Z".to_owned(),
            snapshot_version: 1,
            snapshot_length: None,
            snapshot_hashes: BTreeMap::new(),
        }
    }
}

impl TimestampBuilder {
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_expiration_utc(
        mut self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Self {
        self.expires = expiration_utc(year, month, day, hour, min, sec);
        self
    }

    pub fn with_snapshot_version(mut self, version: Version) -> Self {
        self.snapshot_version = version;
        self
    }

    pub fn with_snapshot_length(mut self, length: u64) -> Self {
        self.snapshot_length = Some(length);
        self
    }

    pub fn with_snapshot_hash(mut self, method: &str, digest: &str) -> Self {
        self.snapshot_hashes
            .insert(method.to_owned(), digest.to_owned());
        self
    }

    /// Point at a finished Snapshot document: record its version and the
    /// SHA-256 of its canonical `signed` bytes.
    pub fn with_snapshot_document(mut self, version: Version, document: &[u8]) -> Self {
        let canonical = crate::canonical::canonical_signed_bytes(
            document,
            uptane_common::RepositoryType::Image,
            &Role::Snapshot,
        )
        .expect("snapshot document is not valid metadata");
        self.snapshot_version = version;
        self.snapshot_hashes.insert(
            "sha256".to_owned(),
            uptane_common::crypto::sha256_hex(&canonical),
        );
        self.snapshot_length = Some(document.len() as u64);
        self
    }

    pub fn build(&self) -> Value {
        let mut item = json!({ "version": self.snapshot_version });
        if let Some(length) = self.snapshot_length {
            item["length"] = json!(length);
        }
        if !self.snapshot_hashes.is_empty() {
            item["hashes"] = json!(self.snapshot_hashes);
        }
        json!({
            "_type": "Timestamp",
            "version": self.version,
            "expires": self.expires,
            "meta": { "snapshot.json": item },
        })
    }
}

/// Builds the `signed` payload of a Snapshot or OfflineSnapshot document.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    role: Role,
    version: Version,
    expires: String,
    meta: BTreeMap<String, Value>,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        SnapshotBuilder {
            role: Role::Snapshot,
            version: 1,
            expires: "2038-01-01T00:00:00Z".to_owned(),
            meta: BTreeMap::new(),
        }
    }
}

impl SnapshotBuilder {
    pub fn for_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_expiration_utc(
        mut self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Self {
        self.expires = expiration_utc(year, month, day, hour, min, sec);
        self
    }

    pub fn with_meta(mut self, filename: &str, version: Version) -> Self {
        self.meta
            .insert(filename.to_owned(), json!({ "version": version }));
        self
    }

    /// Record a finished metadata document under `filename`: version,
    /// byte length and canonical-form SHA-256.
    pub fn with_meta_document(mut self, filename: &str, version: Version, document: &[u8]) -> Self {
        let canonical = crate::canonical::canonical_signed_bytes(
            document,
            uptane_common::RepositoryType::Image,
            &Role::Targets,
        )
        .expect("metadata document is not valid");
        self.meta.insert(
            filename.to_owned(),
            json!({
                "version": version,
                "length": document.len() as u64,
                "hashes": { "sha256": uptane_common::crypto::sha256_hex(&canonical) },
            }),
        );
        self
    }

    pub fn build(&self) -> Value {
        json!({
            "_type": self.role.type_string(),
            "version": self.version,
            "expires": self.expires,
            "meta": self.meta,
        })
    }
}

/// Builds the `signed` payload of a Targets (or OfflineTargets) document.
#[derive(Debug, Clone)]
pub struct TargetsBuilder {
    role: Role,
    version: Version,
    expires: String,
    targets: BTreeMap<String, Value>,
    correlation_id: Option<String>,
    delegation_keys: BTreeMap<KeyId, PublicKey>,
    delegation_roles: Vec<Value>,
}

impl Default for TargetsBuilder {
    fn default() -> Self {
        TargetsBuilder {
            role: Role::Targets,
            version: 1,
            expires: "2038-01-01T00:00:00Z".to_owned(),
            targets: BTreeMap::new(),
            correlation_id: None,
            delegation_keys: BTreeMap::new(),
            delegation_roles: Vec::new(),
        }
    }
}

impl TargetsBuilder {
    pub fn for_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_expiration_utc(
        mut self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Self {
        self.expires = expiration_utc(year, month, day, hour, min, sec);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    /// Add a fleet-wide target (no ECU assignment), as served by the
    /// Image repository.
    pub fn with_target(mut self, filepath: &str, length: u64, sha256: &str) -> Self {
        self.targets.insert(
            filepath.to_owned(),
            json!({ "length": length, "hashes": { "sha256": sha256 } }),
        );
        self
    }

    /// Add a target assigned to one ECU, as served by the Director.
    pub fn with_target_for_ecu(
        mut self,
        filepath: &str,
        length: u64,
        sha256: &str,
        serial: &str,
        hardware_id: &str,
    ) -> Self {
        self.targets.insert(
            filepath.to_owned(),
            json!({
                "length": length,
                "hashes": { "sha256": sha256 },
                "custom": { "ecuIdentifiers": { serial: { "hardwareId": hardware_id } } },
            }),
        );
        self
    }

    pub fn with_delegation(mut self, name: &str, keys: &[PublicKey], threshold: u64) -> Self {
        let mut keyids = Vec::new();
        for key in keys {
            let keyid = key_id(key).expect("public key serialization failed");
            self.delegation_keys.insert(keyid.clone(), key.clone());
            keyids.push(keyid);
        }
        self.delegation_roles.push(json!({
            "name": name,
            "keyids": keyids,
            "threshold": threshold,
            "paths": ["*"],
            "terminating": false,
        }));
        self
    }

    pub fn build(&self) -> Value {
        let mut signed = json!({
            "_type": self.role.type_string(),
            "version": self.version,
            "expires": self.expires,
            "targets": self.targets,
        });
        if let Some(correlation_id) = &self.correlation_id {
            signed["custom"] = json!({ "correlationId": correlation_id });
        }
        if !self.delegation_roles.is_empty() {
            signed["delegations"] = json!({
                "keys": self.delegation_keys,
                "roles": self.delegation_roles,
            });
        }
        signed
    }
}
