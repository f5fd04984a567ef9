//! In-memory collaborator implementations. Handy as lightweight defaults
//! and for driving the full verification flow in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};

use uptane_common::fetcher::MetadataFetcher;
use uptane_common::storage::MetadataStorage;
use uptane_common::time::Clock;
use uptane_common::{RepositoryType, Role, UptaneError, Version};

/// Metadata store held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    roots: BTreeMap<(RepositoryType, Version), Vec<u8>>,
    non_root: BTreeMap<(RepositoryType, String), Vec<u8>>,
}

impl MetadataStorage for MemoryStorage {
    fn load_latest_root(&self, repo: RepositoryType) -> Option<Vec<u8>> {
        self.roots
            .iter()
            .filter(|((stored_repo, _), _)| *stored_repo == repo)
            .max_by_key(|((_, version), _)| *version)
            .map(|(_, raw)| raw.clone())
    }

    fn load_root(&self, repo: RepositoryType, version: Version) -> Option<Vec<u8>> {
        self.roots.get(&(repo, version)).cloned()
    }

    fn store_root(
        &mut self,
        raw: &[u8],
        repo: RepositoryType,
        version: Version,
    ) -> Result<(), UptaneError> {
        self.roots.insert((repo, version), raw.to_vec());
        Ok(())
    }

    fn load_non_root(&self, repo: RepositoryType, role: &Role) -> Option<Vec<u8>> {
        self.non_root.get(&(repo, role.name().to_owned())).cloned()
    }

    fn store_non_root(
        &mut self,
        raw: &[u8],
        repo: RepositoryType,
        role: &Role,
    ) -> Result<(), UptaneError> {
        self.non_root
            .insert((repo, role.name().to_owned()), raw.to_vec());
        Ok(())
    }

    fn clear_non_root_meta(&mut self, repo: RepositoryType) -> Result<(), UptaneError> {
        self.non_root.retain(|(stored_repo, _), _| *stored_repo != repo);
        Ok(())
    }
}

/// Online fetcher backed by a map of role filenames. Offline fetching
/// still goes through the trait's filesystem implementation.
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    files: BTreeMap<(RepositoryType, String), Vec<u8>>,
}

impl MemoryFetcher {
    /// Serve `raw` for `filename` (e.g. `"targets.json"`, `"2.root.json"`).
    pub fn insert(&mut self, repo: RepositoryType, filename: &str, raw: &[u8]) {
        self.files.insert((repo, filename.to_owned()), raw.to_vec());
    }

    pub fn remove(&mut self, repo: RepositoryType, filename: &str) {
        self.files.remove(&(repo, filename.to_owned()));
    }
}

impl MetadataFetcher for MemoryFetcher {
    fn fetch_role(
        &self,
        repo: RepositoryType,
        role: &Role,
        version: Option<Version>,
        max_size: u64,
    ) -> Result<Vec<u8>, UptaneError> {
        let filename = role.filename(version);
        let raw = self
            .files
            .get(&(repo, filename.clone()))
            .ok_or(UptaneError::MetadataFetchFailure {
                repo,
                role: filename,
            })?;
        if raw.len() as u64 > max_size {
            return Err(UptaneError::MetadataFetchFailure {
                repo,
                role: role.name().to_owned(),
            });
        }
        Ok(raw.clone())
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FixedClock { now }
    }

    /// Midnight UTC on the given day.
    pub fn at(year: i32, month: u32, day: u32) -> Self {
        FixedClock {
            now: Utc
                .with_ymd_and_hms(year, month, day, 0, 0, 0)
                .single()
                .expect("invalid date"),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
