//! Targets metadata: the update set itself, plus the per-ECU assignment
//! custom data the Director attaches and the delegation block the Image
//! repository may carry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uptane_common::Version;

use crate::{KeyId, PublicKey};

/// The `signed` payload of a Targets (or OfflineTargets) document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetsMeta {
    pub version: Version,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<TargetsCustom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsCustom {
    #[serde(rename = "correlationId", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// One target: length, hashes and the ECUs it is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMeta {
    pub length: u64,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<TargetCustom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCustom {
    #[serde(rename = "ecuIdentifiers", default)]
    pub ecu_identifiers: BTreeMap<String, EcuMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuMeta {
    #[serde(rename = "hardwareId")]
    pub hardware_id: String,
}

/// Delegation block of an Image Targets document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    #[serde(default)]
    pub keys: BTreeMap<KeyId, PublicKey>,
    #[serde(default)]
    pub roles: Vec<DelegatedRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    #[serde(default)]
    pub keyids: Vec<KeyId>,
    pub threshold: u64,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub terminating: bool,
}

impl TargetsMeta {
    /// An empty Targets list from the Director means "no new updates".
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn correlation_id(&self) -> &str {
        self.custom
            .as_ref()
            .and_then(|custom| custom.correlation_id.as_deref())
            .unwrap_or("")
    }

    pub fn delegated_role_names(&self) -> Vec<&str> {
        self.delegations
            .as_ref()
            .map(|delegations| {
                delegations
                    .roles
                    .iter()
                    .map(|role| role.name.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every (ECU serial, hardware id) assignment across all targets, in
    /// target order. Serials may repeat, which the Director sanity check
    /// rejects.
    pub fn ecus(&self) -> impl Iterator<Item = (&str, &str)> {
        self.targets.values().flat_map(|target| {
            target
                .custom
                .iter()
                .flat_map(|custom| custom.ecu_identifiers.iter())
                .map(|(serial, ecu)| (serial.as_str(), ecu.hardware_id.as_str()))
        })
    }

    /// The targets assigned to one ECU.
    pub fn targets_for_ecu(&self, serial: &str, hardware_id: &str) -> Vec<(&str, &TargetMeta)> {
        self.targets
            .iter()
            .filter(|(_, target)| {
                target
                    .custom
                    .as_ref()
                    .and_then(|custom| custom.ecu_identifiers.get(serial))
                    .is_some_and(|ecu| ecu.hardware_id == hardware_id)
            })
            .map(|(filepath, target)| (filepath.as_str(), target))
            .collect()
    }

    /// Whether this list contains a byte-for-byte counterpart of a target:
    /// same filepath, same length, same hashes.
    pub fn contains_matching(&self, filepath: &str, other: &TargetMeta) -> bool {
        self.targets
            .get(filepath)
            .is_some_and(|target| target.length == other.length && target.hashes == other.hashes)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }
}

impl Default for TargetsMeta {
    fn default() -> Self {
        // The default is the "never received anything" state: empty and
        // already expired.
        TargetsMeta {
            version: 0,
            expires: DateTime::<Utc>::MIN_UTC,
            targets: BTreeMap::new(),
            custom: None,
            delegations: None,
        }
    }
}
