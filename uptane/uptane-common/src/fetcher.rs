//! Trait abstracting where raw metadata bytes come from.

use std::fs;
use std::path::Path;

use crate::{RepositoryType, Role, UptaneError, Version};

/// Source of raw metadata bytes. Online fetching is left to the
/// implementation; the offline operations read from a filesystem path
/// delivered out of band (USB stick, service laptop) and are provided
/// here so every implementation shares them. The fetcher is stateless and
/// idempotent.
pub trait MetadataFetcher {
    /// Fetch a role document from the online repository. `version` selects
    /// a specific Root in the rotation chain; `None` means "latest". The
    /// `max_size` cap must be enforced while the transfer is in progress,
    /// and a partial download discarded.
    fn fetch_role(
        &self,
        repo: RepositoryType,
        role: &Role,
        version: Option<Version>,
        max_size: u64,
    ) -> Result<Vec<u8>, UptaneError>;

    fn fetch_latest_role(
        &self,
        repo: RepositoryType,
        role: &Role,
        max_size: u64,
    ) -> Result<Vec<u8>, UptaneError> {
        self.fetch_role(repo, role, None, max_size)
    }

    /// Read `<base>/<role filename>` from an offline metadata directory.
    fn fetch_role_offline(
        &self,
        base: &Path,
        repo: RepositoryType,
        role: &Role,
        version: Option<Version>,
    ) -> Result<Vec<u8>, UptaneError> {
        fetch_file(&base.join(role.filename(version)), repo)
    }

    fn fetch_latest_role_offline(
        &self,
        base: &Path,
        repo: RepositoryType,
        role: &Role,
    ) -> Result<Vec<u8>, UptaneError> {
        self.fetch_role_offline(base, repo, role, None)
    }

    /// Read a specific metadata file by absolute path. Used when the
    /// offline snapshot names the targets file to load.
    fn fetch_role_filename(
        &self,
        path: &Path,
        repo: RepositoryType,
    ) -> Result<Vec<u8>, UptaneError> {
        fetch_file(path, repo)
    }
}

fn fetch_file(path: &Path, repo: RepositoryType) -> Result<Vec<u8>, UptaneError> {
    fs::read(path).map_err(|_| UptaneError::MetadataFetchFailure {
        repo,
        role: path.display().to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    struct OfflineOnly;

    impl MetadataFetcher for OfflineOnly {
        fn fetch_role(
            &self,
            repo: RepositoryType,
            role: &Role,
            _version: Option<Version>,
            _max_size: u64,
        ) -> Result<Vec<u8>, UptaneError> {
            Err(UptaneError::MetadataFetchFailure {
                repo,
                role: role.name().to_owned(),
            })
        }
    }

    #[test]
    fn test_fetch_role_offline_reads_role_filename() {
        let dir = std::env::temp_dir().join("uptane-fetcher-test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2.root.json"), b"{}").unwrap();

        let fetched = OfflineOnly
            .fetch_role_offline(&dir, RepositoryType::Director, &Role::Root, Some(2))
            .unwrap();
        assert_eq!(fetched, b"{}");

        let missing =
            OfflineOnly.fetch_latest_role_offline(&dir, RepositoryType::Director, &Role::Targets);
        assert!(matches!(
            missing,
            Err(UptaneError::MetadataFetchFailure { .. })
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
