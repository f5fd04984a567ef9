//! Timestamp metadata. Image repository only; the Director profile omits
//! this role.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uptane_common::Version;

use crate::MetaItem;

const SNAPSHOT_FILE: &str = "snapshot.json";

/// The `signed` payload of a Timestamp document. Points at the current
/// Snapshot by version, and optionally by size and hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampMeta {
    pub version: Version,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub meta: BTreeMap<String, MetaItem>,
}

impl TimestampMeta {
    pub fn snapshot_version(&self) -> Option<Version> {
        self.meta.get(SNAPSHOT_FILE).map(|item| item.version)
    }

    /// Declared Snapshot transfer size, used as the fetch cap.
    pub fn snapshot_size(&self) -> Option<u64> {
        self.meta.get(SNAPSHOT_FILE).and_then(|item| item.length)
    }

    /// Declared Snapshot hashes; `None` when absent or empty.
    pub fn snapshot_hashes(&self) -> Option<&BTreeMap<String, String>> {
        self.meta
            .get(SNAPSHOT_FILE)
            .and_then(|item| item.hashes.as_ref())
            .filter(|hashes| !hashes.is_empty())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }
}
