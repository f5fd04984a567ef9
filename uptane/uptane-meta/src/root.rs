//! Root metadata: the key map and role policies everything else hangs off.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uptane_common::{RepositoryType, Role, UptaneError, Version};

use crate::verify::{verify_metadata, MetaWithKeys, VerifyOptions};
use crate::{parse_untrusted, KeyId, PublicKey, Signed};

/// The `signed` payload of a Root document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootMeta {
    pub version: Version,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub keys: BTreeMap<KeyId, PublicKey>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent_snapshot: Option<bool>,
}

/// Keyids and threshold assigned to one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<KeyId>,
    pub threshold: u64,
}

/// A Root that has passed signature verification for a repository. Child
/// verifications borrow it; it owns nothing but the parsed payload.
#[derive(Debug, Clone)]
pub struct Root {
    repo: RepositoryType,
    meta: RootMeta,
}

impl Root {
    /// Parse a raw Root document and verify it against its own Root-role
    /// keys. This is how the trust anchor is established from storage and
    /// how a provisioning Root is accepted, and it is one half of the
    /// dual check during rotation.
    pub fn parse_and_verify_self(
        raw: &[u8],
        repo: RepositoryType,
        opts: &VerifyOptions,
    ) -> Result<Self, UptaneError> {
        let unverified: Signed<RootMeta> = parse_untrusted(raw, repo, &Role::Root)?;
        let anchor = Root {
            repo,
            meta: unverified.signed,
        };
        let keys = MetaWithKeys::from_root(&anchor, opts)?;
        let verified: Signed<RootMeta> = verify_metadata(raw, repo, &Role::Root, &keys)?;
        Ok(Root {
            repo,
            meta: verified.signed,
        })
    }

    /// Wrap an already-trusted payload. Only for use where trust has been
    /// established by other means.
    pub(crate) fn from_trusted_meta(repo: RepositoryType, meta: RootMeta) -> Self {
        Root { repo, meta }
    }

    pub fn repo(&self) -> RepositoryType {
        self.repo
    }

    pub fn meta(&self) -> &RootMeta {
        &self.meta
    }

    pub fn version(&self) -> Version {
        self.meta.version
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.meta.expires < now
    }
}
