//! Trait abstracting the persistent metadata store.

use crate::{RepositoryType, Role, UptaneError, Version};

/// Persistent store for verified metadata, keyed by repository and role.
/// Root files are additionally keyed by version so the rotation chain can
/// be replayed. All operations must be durable on return; `load_non_root`
/// returns the most recently stored document for that (repo, role).
pub trait MetadataStorage {
    /// The highest-version Root stored for `repo`, if any.
    fn load_latest_root(&self, repo: RepositoryType) -> Option<Vec<u8>>;

    /// A specific Root version stored for `repo`, if present.
    fn load_root(&self, repo: RepositoryType, version: Version) -> Option<Vec<u8>>;

    fn store_root(
        &mut self,
        raw: &[u8],
        repo: RepositoryType,
        version: Version,
    ) -> Result<(), UptaneError>;

    fn load_non_root(&self, repo: RepositoryType, role: &Role) -> Option<Vec<u8>>;

    fn store_non_root(
        &mut self,
        raw: &[u8],
        repo: RepositoryType,
        role: &Role,
    ) -> Result<(), UptaneError>;

    /// Remove every non-Root document for `repo`. Root files survive so
    /// the chain of trust is never discarded.
    fn clear_non_root_meta(&mut self, repo: RepositoryType) -> Result<(), UptaneError>;
}
