//! Image repository state machine. The Image repository describes every
//! image available to the fleet; verification enforces the full
//! Timestamp → Snapshot → Targets binding chain (versions, sizes and
//! hashes) on top of the shared Root rotation.

use std::path::PathBuf;

use tracing::{debug, error};

use uptane_common::constants::{
    IMAGE_OFFLINE_DIR, MAX_IMAGE_TARGETS_SIZE, MAX_SNAPSHOT_SIZE, MAX_TIMESTAMP_SIZE,
};
use uptane_common::fetcher::MetadataFetcher;
use uptane_common::storage::MetadataStorage;
use uptane_common::time::{Clock, SystemClock};
use uptane_common::{RepositoryType, Role, UptaneError, Version};
use uptane_meta::canonical::canonical_signed_bytes;
use uptane_meta::verify::{verify_metadata, MetaWithKeys, VerifyOptions};
use uptane_meta::{
    check_hashes, extract_version_untrusted, HashCheckFailure, Root, Signed, SnapshotMeta,
    TargetsMeta, TimestampMeta,
};

use super::{security_violation, update_root};

const REPO: RepositoryType = RepositoryType::Image;
const TARGETS_FILE: &str = "targets.json";
const SNAPSHOT_HASH_FAILURE: &str = "Snapshot metadata hash verification failed";

/// Verified Image metadata and the verification process around it.
#[derive(Debug)]
pub struct ImageRepo {
    root: Option<Root>,
    timestamp: Option<TimestampMeta>,
    snapshot: Option<SnapshotMeta>,
    targets: Option<TargetsMeta>,
    offline_metadata_dir: PathBuf,
    clock: Box<dyn Clock>,
    opts: VerifyOptions,
}

impl Default for ImageRepo {
    fn default() -> Self {
        ImageRepo {
            root: None,
            timestamp: None,
            snapshot: None,
            targets: None,
            offline_metadata_dir: PathBuf::from(IMAGE_OFFLINE_DIR),
            clock: Box::new(SystemClock),
            opts: VerifyOptions::default(),
        }
    }
}

impl ImageRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_offline_metadata_dir(mut self, dir: PathBuf) -> Self {
        self.offline_metadata_dir = dir;
        self
    }

    pub fn with_verify_options(mut self, opts: VerifyOptions) -> Self {
        self.opts = opts;
        self
    }

    fn reset_meta(&mut self) {
        self.root = None;
        self.timestamp = None;
        self.snapshot = None;
        self.targets = None;
    }

    /// Run one metadata update cycle against the Image repository. On any
    /// error the in-memory state is reset; storage keeps whatever
    /// documents were successfully persisted before the failure.
    pub fn update_meta<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
        offline: bool,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        self.reset_meta();
        let result = self.update_meta_inner(storage, fetcher, offline);
        if result.is_err() {
            self.reset_meta();
        }
        result
    }

    fn update_meta_inner<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
        offline: bool,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        self.root = Some(update_root(
            storage,
            fetcher,
            self.clock.as_ref(),
            REPO,
            offline,
            &self.offline_metadata_dir,
            &self.opts,
        )?);

        // There is no out-of-band Timestamp; offline freshness rests on
        // the snapshot itself.
        if !offline {
            self.update_timestamp(storage, fetcher)?;
        }

        if offline {
            self.update_offline_snapshot(storage, fetcher)?;
            self.update_offline_targets(storage, fetcher)
        } else {
            self.update_online_snapshot(storage, fetcher)?;
            self.update_online_targets(storage, fetcher)
        }
    }

    fn root_keys(&self) -> Result<MetaWithKeys, UptaneError> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| security_violation(REPO, "no trusted Root loaded"))?;
        MetaWithKeys::from_root(root, &self.opts)
    }

    fn update_timestamp<S, F>(&mut self, storage: &mut S, fetcher: &F) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        let fetched_raw = fetcher.fetch_latest_role(REPO, &Role::Timestamp, MAX_TIMESTAMP_SIZE)?;
        let remote_version = extract_version_untrusted(&fetched_raw, REPO, &Role::Timestamp)?;
        let local_version = storage
            .load_non_root(REPO, &Role::Timestamp)
            .as_deref()
            .and_then(|raw| extract_version_untrusted(raw, REPO, &Role::Timestamp).ok());

        self.verify_timestamp(&fetched_raw)?;

        if local_version > Some(remote_version) {
            return Err(security_violation(REPO, "Rollback attempt"));
        } else if local_version < Some(remote_version) {
            storage.store_non_root(&fetched_raw, REPO, &Role::Timestamp)?;
        }

        self.check_timestamp_expired()
    }

    pub fn verify_timestamp(&mut self, raw: &[u8]) -> Result<(), UptaneError> {
        let keys = self.root_keys()?;
        let verified: Signed<TimestampMeta> = verify_metadata(raw, REPO, &Role::Timestamp, &keys)
            .map_err(|err| {
            error!("Signature verification for Timestamp metadata failed");
            err
        })?;
        self.timestamp = Some(verified.signed);
        Ok(())
    }

    fn update_online_snapshot<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        // The stored Snapshot may already be the one the Timestamp points
        // at; try it quietly before going to the network.
        let mut fetch_needed = true;
        let mut local_version = None;
        if let Some(stored_raw) = storage.load_non_root(REPO, &Role::Snapshot) {
            match self.verify_snapshot(&stored_raw, true, false) {
                Ok(()) => {
                    fetch_needed = false;
                    debug!("skipping Image repo Snapshot download; stored version is still current");
                }
                Err(err) => {
                    debug!("stored Image repo Snapshot did not verify: {err}");
                }
            }
            local_version = extract_version_untrusted(&stored_raw, REPO, &Role::Snapshot).ok();
        }

        if fetch_needed {
            self.fetch_snapshot(storage, fetcher, local_version)?;
        }
        self.check_snapshot_expired()
    }

    fn fetch_snapshot<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
        local_version: Option<Version>,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        let cap = self
            .timestamp
            .as_ref()
            .and_then(TimestampMeta::snapshot_size)
            .filter(|size| *size > 0)
            .unwrap_or(MAX_SNAPSHOT_SIZE);
        let raw = fetcher.fetch_latest_role(REPO, &Role::Snapshot, cap)?;
        let remote_version = extract_version_untrusted(&raw, REPO, &Role::Snapshot)?;

        self.verify_snapshot(&raw, false, false)?;

        if local_version > Some(remote_version) {
            return Err(security_violation(REPO, "Rollback attempt"));
        } else if local_version < Some(remote_version) {
            storage.store_non_root(&raw, REPO, &Role::Snapshot)?;
        }
        Ok(())
    }

    fn update_offline_snapshot<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        let fetched_raw = fetcher.fetch_latest_role_offline(
            &self.offline_metadata_dir,
            REPO,
            &Role::OfflineSnapshot,
        )?;
        let fetched_version =
            extract_version_untrusted(&fetched_raw, REPO, &Role::OfflineSnapshot)?;

        // The snapshot lineage is shared between modes: offline snapshots
        // land in the same storage slot.
        let stored = storage.load_non_root(REPO, &Role::Snapshot);
        let local_version = stored
            .as_deref()
            .and_then(|raw| extract_version_untrusted(raw, REPO, &Role::Snapshot).ok());

        match (&stored, local_version) {
            (Some(stored_raw), Some(local)) if local >= fetched_version => {
                self.verify_snapshot(stored_raw, false, true)?;
            }
            _ => {
                self.verify_snapshot(&fetched_raw, false, true)?;
                storage.store_non_root(&fetched_raw, REPO, &Role::Snapshot)?;
            }
        }

        self.check_snapshot_expired()
    }

    /// Verify a Snapshot document: Timestamp hash binding (when the
    /// Timestamp declares hashes), threshold signatures, and the
    /// Timestamp version binding. With `prefetch` set, failures are
    /// logged quietly so a stale stored copy just triggers a refetch.
    pub fn verify_snapshot(
        &mut self,
        raw: &[u8],
        prefetch: bool,
        offline: bool,
    ) -> Result<(), UptaneError> {
        let keys = self.root_keys()?;
        let role = if offline {
            Role::OfflineSnapshot
        } else {
            Role::Snapshot
        };

        if let Some(hashes) = self.timestamp.as_ref().and_then(TimestampMeta::snapshot_hashes) {
            let canonical = canonical_signed_bytes(raw, REPO, &role)?;
            match check_hashes(&canonical, hashes) {
                Ok(()) => {}
                Err(HashCheckFailure::NoSupportedHash) => {
                    if !prefetch {
                        error!("no supported hash found for snapshot.json");
                    }
                    return Err(UptaneError::NoHash {
                        repo: REPO,
                        role: role.clone(),
                    });
                }
                Err(HashCheckFailure::Mismatch) => {
                    if !prefetch {
                        return Err(security_violation(REPO, SNAPSHOT_HASH_FAILURE));
                    }
                    return Err(UptaneError::Security {
                        repo: REPO,
                        reason: SNAPSHOT_HASH_FAILURE.to_owned(),
                    });
                }
            }
        }

        let verified: Signed<SnapshotMeta> =
            verify_metadata(raw, REPO, &role, &keys).map_err(|err| {
                if !prefetch {
                    error!("Signature verification for Snapshot metadata failed");
                }
                err
            })?;

        if let Some(timestamp) = &self.timestamp {
            if timestamp.snapshot_version() != Some(verified.signed.version) {
                return Err(UptaneError::VersionMismatch { repo: REPO, role });
            }
        }

        self.snapshot = Some(verified.signed);
        Ok(())
    }

    fn update_online_targets<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        // Same prefetch flow as the Snapshot.
        let mut fetch_needed = true;
        let mut local_version = None;
        if let Some(stored_raw) = storage.load_non_root(REPO, &Role::Targets) {
            match self.verify_targets(&stored_raw, true) {
                Ok(()) => {
                    fetch_needed = false;
                    debug!("skipping Image repo Targets download; stored version is still current");
                }
                Err(err) => {
                    debug!("stored Image repo Targets did not verify: {err}");
                }
            }
            local_version = extract_version_untrusted(&stored_raw, REPO, &Role::Targets).ok();
        }

        if fetch_needed {
            self.fetch_targets(storage, fetcher, local_version)?;
        }
        self.check_targets_expired()
    }

    fn fetch_targets<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
        local_version: Option<Version>,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        let cap = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.role_size(TARGETS_FILE))
            .filter(|size| *size > 0)
            .unwrap_or(MAX_IMAGE_TARGETS_SIZE);
        let raw = fetcher.fetch_latest_role(REPO, &Role::Targets, cap)?;
        let remote_version = extract_version_untrusted(&raw, REPO, &Role::Targets)?;

        self.verify_targets(&raw, false)?;

        if local_version > Some(remote_version) {
            return Err(security_violation(REPO, "Rollback attempt"));
        } else if local_version < Some(remote_version) {
            storage.store_non_root(&raw, REPO, &Role::Targets)?;
        }
        Ok(())
    }

    fn update_offline_targets<S, F>(
        &mut self,
        storage: &mut S,
        fetcher: &F,
    ) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
        F: MetadataFetcher + ?Sized,
    {
        let fetched_raw =
            fetcher.fetch_latest_role_offline(&self.offline_metadata_dir, REPO, &Role::Targets)?;
        let fetched_version = extract_version_untrusted(&fetched_raw, REPO, &Role::Targets)?;

        let stored = storage.load_non_root(REPO, &Role::Targets);
        let local_version = stored
            .as_deref()
            .and_then(|raw| extract_version_untrusted(raw, REPO, &Role::Targets).ok());

        match (&stored, local_version) {
            (Some(stored_raw), Some(local)) if local >= fetched_version => {
                self.verify_targets(stored_raw, false)?;
            }
            _ => {
                self.verify_targets(&fetched_raw, false)?;
                storage.store_non_root(&fetched_raw, REPO, &Role::Targets)?;
            }
        }

        self.check_targets_expired()
    }

    /// Verify a Targets document: optional Snapshot hash binding (fault
    /// detection only), threshold signatures, and the Snapshot version
    /// binding.
    pub fn verify_targets(&mut self, raw: &[u8], prefetch: bool) -> Result<(), UptaneError> {
        let keys = self.root_keys()?;
        let snapshot_version = {
            let snapshot = self.snapshot.as_ref().ok_or_else(|| UptaneError::Security {
                repo: REPO,
                reason: "Snapshot metadata must be verified before Targets".to_owned(),
            })?;

            // Hashes are not required here. If present, however, we may as
            // well check them; this helps with fault detection.
            if let Some(hashes) = snapshot.role_hashes(TARGETS_FILE) {
                let canonical = canonical_signed_bytes(raw, REPO, &Role::Targets)?;
                match check_hashes(&canonical, hashes) {
                    Ok(()) | Err(HashCheckFailure::NoSupportedHash) => {}
                    Err(HashCheckFailure::Mismatch) => {
                        if !prefetch {
                            error!("Hash verification for targets metadata failed");
                            return Err(security_violation(REPO, "Hash metadata mismatch"));
                        }
                        return Err(UptaneError::Security {
                            repo: REPO,
                            reason: "Hash metadata mismatch".to_owned(),
                        });
                    }
                }
            }
            snapshot.role_version(TARGETS_FILE)
        };

        let verified: Signed<TargetsMeta> =
            verify_metadata(raw, REPO, &Role::Targets, &keys).map_err(|err| {
                if !prefetch {
                    error!("Signature verification for Image repo Targets metadata failed");
                }
                err
            })?;

        if snapshot_version != Some(verified.signed.version) {
            return Err(UptaneError::VersionMismatch {
                repo: REPO,
                role: Role::Targets,
            });
        }

        self.targets = Some(verified.signed);
        Ok(())
    }

    /// Verify a delegated Targets document under its parent's delegation
    /// key set. Exposed for callers that walk one delegation level; the
    /// update cycle itself never traverses delegations.
    pub fn verify_delegation(
        raw: &[u8],
        role: &Role,
        parent: &TargetsMeta,
        opts: &VerifyOptions,
    ) -> Result<TargetsMeta, UptaneError> {
        let keys = MetaWithKeys::from_delegations(REPO, parent, opts)?;
        let verified: Signed<TargetsMeta> =
            verify_metadata(raw, REPO, role, &keys).map_err(|err| {
                error!("Signature verification for Image repo delegated Targets metadata failed");
                err
            })?;
        Ok(verified.signed)
    }

    fn check_timestamp_expired(&self) -> Result<(), UptaneError> {
        let expired = self
            .timestamp
            .as_ref()
            .map_or(true, |timestamp| timestamp.is_expired(self.clock.now()));
        if expired {
            return Err(UptaneError::ExpiredMetadata {
                repo: REPO,
                role: Role::Timestamp,
            });
        }
        Ok(())
    }

    fn check_snapshot_expired(&self) -> Result<(), UptaneError> {
        let expired = self
            .snapshot
            .as_ref()
            .map_or(true, |snapshot| snapshot.is_expired(self.clock.now()));
        if expired {
            return Err(UptaneError::ExpiredMetadata {
                repo: REPO,
                role: Role::Snapshot,
            });
        }
        Ok(())
    }

    fn check_targets_expired(&self) -> Result<(), UptaneError> {
        let expired = self
            .targets
            .as_ref()
            .map_or(true, |targets| targets.is_expired(self.clock.now()));
        if expired {
            return Err(UptaneError::ExpiredMetadata {
                repo: REPO,
                role: Role::Targets,
            });
        }
        Ok(())
    }

    /// Re-verify what is already in storage, without fetching. Used at
    /// startup to re-establish the last verified view.
    pub fn check_meta_offline<S>(&mut self, storage: &S) -> Result<(), UptaneError>
    where
        S: MetadataStorage + ?Sized,
    {
        self.reset_meta();

        let raw_root = storage
            .load_latest_root(REPO)
            .ok_or_else(|| security_violation(REPO, "could not load latest root"))?;
        let root = Root::parse_and_verify_self(&raw_root, REPO, &self.opts)?;
        if root.is_expired(self.clock.now()) {
            return Err(UptaneError::ExpiredMetadata {
                repo: REPO,
                role: Role::Root,
            });
        }
        self.root = Some(root);

        let raw_timestamp = storage
            .load_non_root(REPO, &Role::Timestamp)
            .ok_or_else(|| security_violation(REPO, "could not load Timestamp role"))?;
        self.verify_timestamp(&raw_timestamp)?;
        self.check_timestamp_expired()?;

        let raw_snapshot = storage
            .load_non_root(REPO, &Role::Snapshot)
            .ok_or_else(|| security_violation(REPO, "could not load Snapshot role"))?;
        self.verify_snapshot(&raw_snapshot, false, false)?;
        self.check_snapshot_expired()?;

        let raw_targets = storage
            .load_non_root(REPO, &Role::Targets)
            .ok_or_else(|| security_violation(REPO, "could not load Targets role"))?;
        self.verify_targets(&raw_targets, false)?;
        self.check_targets_expired()
    }

    /// The verified Targets, once `update_meta` has succeeded.
    pub fn targets(&self) -> Option<&TargetsMeta> {
        self.targets.as_ref()
    }

    pub fn root_version(&self) -> Option<Version> {
        self.root.as_ref().map(Root::version)
    }

    /// Version the current Snapshot declares for a role's metadata file.
    pub fn role_version(&self, role: &Role) -> Option<Version> {
        self.snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.role_version(&role.filename(None)))
    }

    /// Size the current Snapshot declares for a role's metadata file.
    pub fn role_size(&self, role: &Role) -> Option<u64> {
        self.snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.role_size(&role.filename(None)))
    }
}
