//! Snapshot metadata: binds every Targets file to a version, and
//! optionally to a size and hashes. The OfflineSnapshot role shares this
//! shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uptane_common::Version;

use crate::MetaItem;

/// The `signed` payload of a Snapshot or OfflineSnapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub version: Version,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub meta: BTreeMap<String, MetaItem>,
}

impl SnapshotMeta {
    pub fn role_version(&self, filename: &str) -> Option<Version> {
        self.meta.get(filename).map(|item| item.version)
    }

    /// Declared transfer size for a metadata file, used as the fetch cap.
    pub fn role_size(&self, filename: &str) -> Option<u64> {
        self.meta.get(filename).and_then(|item| item.length)
    }

    /// Declared hashes for a metadata file; `None` when absent or empty.
    pub fn role_hashes(&self, filename: &str) -> Option<&BTreeMap<String, String>> {
        self.meta
            .get(filename)
            .and_then(|item| item.hashes.as_ref())
            .filter(|hashes| !hashes.is_empty())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_role_lookups() {
        let meta: SnapshotMeta = serde_json::from_value(serde_json::json!({
            "_type": "Snapshot",
            "version": 2,
            "expires": "2038-01-01T00:00:00Z",
            "meta": {
                "targets.json": { "version": 5, "length": 2048 },
                "extra.offlinetargets.json": { "version": 1 }
            }
        }))
        .unwrap();
        assert_eq!(meta.role_version("targets.json"), Some(5));
        assert_eq!(meta.role_size("targets.json"), Some(2048));
        assert_eq!(meta.role_hashes("targets.json"), None);
        assert_eq!(meta.role_version("extra.offlinetargets.json"), Some(1));
        assert_eq!(meta.role_version("missing.json"), None);
    }
}
