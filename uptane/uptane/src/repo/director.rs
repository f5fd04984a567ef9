//! Director repository state machine. The Director instructs a specific
//! vehicle which images to install; its metadata verification therefore
//! carries extra sanity checks (no delegations, no ECU assigned twice)
//! and the empty-Targets convention for "no new updates".

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{error, warn};

use uptane_common::constants::{DIRECTOR_OFFLINE_DIR, MAX_DIRECTOR_TARGETS_SIZE};
use uptane_common::fetcher::MetadataFetcher;
use uptane_common::storage::MetadataStorage;
use uptane_common::time::{Clock, SystemClock};
use uptane_common::{RepositoryType, Role, UptaneError, Version};
use uptane_meta::targets::TargetMeta;
use uptane_meta::verify::{verify_metadata, MetaWithKeys, VerifyOptions};
use uptane_meta::{
    extract_version_untrusted, parse_untrusted, Root, Signed, SnapshotMeta, TargetsMeta,
};

use super::{security_violation, update_root};

const REPO: RepositoryType = RepositoryType::Director;

/// Verified Director metadata and the verification process around it.
/// Subsequent verification steps rely on previous ones; any failure in
/// `update_meta` resets the in-memory state to empty.
#[derive(Debug)]
pub struct DirectorRepo {
    root: Option<Root>,
    /// The effective target set. Only empty if we have never received
    /// non-empty targets.
    targets: TargetsMeta,
    /// Exactly what the Director served last, possibly an empty list.
    /// Used for expiry tracking.
    latest_targets: TargetsMeta,
    snapshot: Option<SnapshotMeta>,
    offline_metadata_dir: PathBuf,
    clock: Box<dyn Clock>,
    opts: VerifyOptions,
}

impl Default for DirectorRepo {
    fn default() -> Self {
        DirectorRepo {
            root: None,
            targets: TargetsMeta::default(),
            latest_targets: TargetsMeta::default(),
            snapshot: None,
            offline_metadata_dir: PathBuf::from(DIRECTOR_OFFLINE_DIR),
            clock: Box::new(SystemClock),
            opts: VerifyOptions::default(),
        }
    }
}

impl DirectorRepo {
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
        self.targets = TargetsMeta::default();
        self.latest_targets = TargetsMeta::default();
        self.snapshot = None;
    }

    /// Run one metadata update cycle against the Director. On any error
    /// the in-memory state is reset; storage keeps whatever documents
    /// were successfully persisted before the failure.
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

        // The Uptane profile for the Director omits the Timestamp role and,
        // online, the Snapshot role.
        if offline {
            self.update_offline_snapshot(storage, fetcher)?;
            self.update_offline_targets(storage, fetcher)
        } else {
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

        let stored = storage.load_non_root(REPO, &Role::OfflineSnapshot);
        let local_version = stored
            .as_deref()
            .and_then(|raw| extract_version_untrusted(raw, REPO, &Role::OfflineSnapshot).ok());

        match (&stored, local_version) {
            (Some(stored_raw), Some(local)) if local >= fetched_version => {
                self.verify_offline_snapshot(stored_raw, Some(stored_raw))?;
            }
            _ => {
                self.verify_offline_snapshot(&fetched_raw, stored.as_deref())?;
                storage.store_non_root(&fetched_raw, REPO, &Role::OfflineSnapshot)?;
            }
        }

        self.check_offline_snapshot_expired()
    }

    /// Verify a new OfflineSnapshot against the trusted Root, and check
    /// that no file it lists has gone backwards relative to the previous
    /// OfflineSnapshot.
    fn verify_offline_snapshot(
        &mut self,
        new_raw: &[u8],
        old_raw: Option<&[u8]>,
    ) -> Result<(), UptaneError> {
        let keys = self.root_keys()?;
        let verified: Signed<SnapshotMeta> =
            verify_metadata(new_raw, REPO, &Role::OfflineSnapshot, &keys).map_err(|err| {
                error!("Signature verification for Offline Snapshot metadata failed");
                err
            })?;

        if let Some(old_raw) = old_raw {
            // The old copy came out of our own storage; no need to re-verify
            // its signatures just to read the version table.
            let old: Signed<SnapshotMeta> =
                parse_untrusted(old_raw, REPO, &Role::OfflineSnapshot)?;
            for (filename, old_item) in &old.signed.meta {
                if let Some(new_item) = verified.signed.meta.get(filename) {
                    if old_item.version > new_item.version {
                        return Err(security_violation(REPO, "Rollback attempt"));
                    }
                }
            }
        }

        self.snapshot = Some(verified.signed);
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
        let candidates: Vec<String> = self
            .snapshot
            .as_ref()
            .ok_or_else(|| security_violation(REPO, "no Offline Snapshot loaded"))?
            .meta
            .keys()
            .cloned()
            .collect();

        // The snapshot lists candidate targets metadata files; take the
        // first one actually present on the medium.
        let selected = candidates.into_iter().find_map(|filename| {
            let path = self.offline_metadata_dir.join(&filename);
            path.is_file().then_some((filename, path))
        });
        let Some((filename, path)) = selected else {
            return Err(security_violation(
                REPO,
                "could not find any valid offline targets metadata file",
            ));
        };

        let raw = fetcher.fetch_role_filename(&path, REPO)?;
        self.verify_targets(&raw, true)?;

        // The snapshot binds the selected file to a version.
        let expected = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.role_version(&filename));
        if expected != Some(self.latest_targets.version) {
            return Err(UptaneError::VersionMismatch {
                repo: REPO,
                role: Role::OfflineTargets,
            });
        }

        storage.store_non_root(&raw, REPO, &Role::OfflineTargets)?;
        self.check_targets_expired()?;
        self.targets_sanity_check()
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
        let fetched_raw =
            fetcher.fetch_latest_role(REPO, &Role::Targets, MAX_DIRECTOR_TARGETS_SIZE)?;
        let remote_version = extract_version_untrusted(&fetched_raw, REPO, &Role::Targets)?;

        let stored = storage.load_non_root(REPO, &Role::Targets);
        let mut local_version = None;
        if let Some(stored_raw) = &stored {
            local_version = extract_version_untrusted(stored_raw, REPO, &Role::Targets).ok();
            if self.verify_targets(stored_raw, false).is_err() {
                // Tolerated, so that metadata stored under a since-rotated
                // Root can be superseded instead of wedging the update.
                warn!("unable to verify stored Director Targets metadata");
            }
        }

        self.verify_targets(&fetched_raw, false)?;

        if local_version > Some(remote_version) {
            return Err(security_violation(REPO, "Rollback attempt"));
        } else if local_version < Some(remote_version) && !self.use_previous_targets() {
            storage.store_non_root(&fetched_raw, REPO, &Role::Targets)?;
        }

        self.check_targets_expired()?;
        self.targets_sanity_check()
    }

    /// Verify a Targets document against the trusted Root and adopt it.
    /// `latest_targets` always tracks the served document; `targets` only
    /// follows it unless the empty-list convention says to keep the
    /// previous non-empty set.
    pub fn verify_targets(&mut self, raw: &[u8], offline: bool) -> Result<(), UptaneError> {
        let keys = self.root_keys()?;
        let role = if offline {
            Role::OfflineTargets
        } else {
            Role::Targets
        };
        let verified: Signed<TargetsMeta> =
            verify_metadata(raw, REPO, &role, &keys).map_err(|err| {
                error!("Signature verification for Director Targets metadata failed");
                err
            })?;
        self.latest_targets = verified.signed;
        if !self.use_previous_targets() {
            self.targets = self.latest_targets.clone();
        }
        Ok(())
    }

    /// An empty Targets list means "no new updates": keep the previous
    /// non-empty list as the effective set.
    fn use_previous_targets(&self) -> bool {
        !self.targets.is_empty() && self.latest_targets.is_empty()
    }

    fn check_offline_snapshot_expired(&self) -> Result<(), UptaneError> {
        let expired = self
            .snapshot
            .as_ref()
            .map_or(true, |snapshot| snapshot.is_expired(self.clock.now()));
        if expired {
            return Err(UptaneError::ExpiredMetadata {
                repo: REPO,
                role: Role::OfflineSnapshot,
            });
        }
        Ok(())
    }

    fn check_targets_expired(&self) -> Result<(), UptaneError> {
        if self.latest_targets.is_expired(self.clock.now()) {
            return Err(UptaneError::ExpiredMetadata {
                repo: REPO,
                role: Role::Targets,
            });
        }
        Ok(())
    }

    fn targets_sanity_check(&self) -> Result<(), UptaneError> {
        // The Director must not delegate.
        if !self.latest_targets.delegated_role_names().is_empty() {
            return Err(UptaneError::InvalidMetadata {
                repo: REPO,
                role: Role::Targets,
                reason: "found unexpected delegation".to_owned(),
            });
        }
        // No ECU may be told to install more than one target.
        let mut seen = HashSet::new();
        for (serial, _hardware_id) in self.targets.ecus() {
            if !seen.insert(serial) {
                error!(serial, "ECU appears twice in Director's Targets");
                return Err(UptaneError::InvalidMetadata {
                    repo: REPO,
                    role: Role::Targets,
                    reason: "found repeated ECU ID".to_owned(),
                });
            }
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

        let raw_targets = storage
            .load_non_root(REPO, &Role::Targets)
            .ok_or_else(|| security_violation(REPO, "could not load Targets role"))?;
        self.verify_targets(&raw_targets, false)?;
        self.check_targets_expired()?;
        self.targets_sanity_check()
    }

    /// Best-effort removal of every non-Root Director document. Failures
    /// are logged, not surfaced; the next update cycle starts from Root
    /// either way.
    pub fn drop_targets<S>(&mut self, storage: &mut S)
    where
        S: MetadataStorage + ?Sized,
    {
        match storage.clear_non_root_meta(REPO) {
            Ok(()) => self.reset_meta(),
            Err(err) => error!("failed to reset Director Targets metadata: {err}"),
        }
    }

    /// Whether every Director target has a byte-matching counterpart in
    /// the Image repository's Targets. Secondaries run this before
    /// accepting an installation order.
    pub fn match_targets_with_image_targets(
        &self,
        image_targets: Option<&TargetsMeta>,
    ) -> bool {
        let Some(image_targets) = image_targets else {
            return false;
        };
        self.targets
            .targets
            .iter()
            .all(|(filepath, target)| image_targets.contains_matching(filepath, target))
    }

    /// The effective target set.
    pub fn targets(&self) -> &TargetsMeta {
        &self.targets
    }

    /// The targets assigned to one ECU.
    pub fn targets_for_ecu(&self, serial: &str, hardware_id: &str) -> Vec<(&str, &TargetMeta)> {
        self.targets.targets_for_ecu(serial, hardware_id)
    }

    pub fn correlation_id(&self) -> &str {
        self.targets.correlation_id()
    }

    pub fn root_version(&self) -> Option<Version> {
        self.root.as_ref().map(Root::version)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::{FixedClock, MemoryFetcher, MemoryStorage};
    use uptane_meta::builder::{sign_metadata, RootBuilder, TargetsBuilder};
    use uptane_meta::sign::SigningKey;

    struct Fixture {
        targets_key: SigningKey,
        storage: MemoryStorage,
        fetcher: MemoryFetcher,
        repo: DirectorRepo,
    }

    fn fixture() -> Fixture {
        let root_key = SigningKey::generate_ed25519();
        let targets_key = SigningKey::generate_ed25519();
        let root_signed = RootBuilder::default()
            .with_role_and_key("root", &[root_key.public_key()], 1)
            .with_role_and_key("targets", &[targets_key.public_key()], 1)
            .with_role_and_key("offlinesnapshot", &[targets_key.public_key()], 1)
            .with_role_and_key("offlinetargets", &[targets_key.public_key()], 1)
            .with_expiration_utc(2038, 1, 1, 0, 0, 0)
            .with_version(1)
            .build();
        let root_raw = sign_metadata(&root_signed, &[&root_key]).unwrap();

        let mut storage = MemoryStorage::default();
        storage
            .store_root(&root_raw, RepositoryType::Director, 1)
            .unwrap();

        Fixture {
            targets_key,
            storage,
            fetcher: MemoryFetcher::default(),
            repo: DirectorRepo::new().with_clock(Box::new(FixedClock::at(2030, 1, 1))),
        }
    }

    fn targets_with_one_ecu(version: u64) -> TargetsBuilder {
        TargetsBuilder::default()
            .with_version(version)
            .with_expiration_utc(2038, 1, 1, 0, 0, 0)
            .with_target_for_ecu("app.bin", 1024, &"aa".repeat(32), "serial-1", "acme-ecu")
    }

    #[test]
    fn test_online_update_happy_path() {
        let mut fx = fixture();
        let raw = sign_metadata(&targets_with_one_ecu(1).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);

        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .expect("rejected valid Director metadata");
        assert_eq!(fx.repo.targets().targets.len(), 1);
        assert_eq!(
            fx.storage.load_non_root(RepositoryType::Director, &Role::Targets),
            Some(raw)
        );
        assert_eq!(fx.repo.root_version(), Some(1));
    }

    #[test]
    fn test_empty_targets_keep_previous_set() {
        let mut fx = fixture();
        let v1 = sign_metadata(&targets_with_one_ecu(1).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &v1);
        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap();

        // The Director now serves an empty version 2.
        let v2 = sign_metadata(
            &TargetsBuilder::default()
                .with_version(2)
                .with_expiration_utc(2038, 1, 1, 0, 0, 0)
                .build(),
            &[&fx.targets_key],
        )
        .unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &v2);
        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap();

        // Effective set is still v1's, and storage was not touched.
        assert_eq!(fx.repo.targets().targets.len(), 1);
        assert_eq!(fx.repo.targets().version, 1);
        assert_eq!(
            fx.storage.load_non_root(RepositoryType::Director, &Role::Targets),
            Some(v1)
        );
    }

    #[test]
    fn test_rollback_rejected() {
        let mut fx = fixture();
        let v2 = sign_metadata(&targets_with_one_ecu(2).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &v2);
        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap();

        let v1 = sign_metadata(&targets_with_one_ecu(1).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &v1);
        let err = fx
            .repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap_err();
        assert!(matches!(err, UptaneError::Security { .. }));
        // The stored copy is still version 2.
        assert_eq!(
            fx.storage.load_non_root(RepositoryType::Director, &Role::Targets),
            Some(v2)
        );
        // In-memory state was reset.
        assert!(fx.repo.targets().is_empty());
    }

    #[test]
    fn test_repeated_ecu_rejected() {
        let mut fx = fixture();
        let signed = TargetsBuilder::default()
            .with_version(1)
            .with_expiration_utc(2038, 1, 1, 0, 0, 0)
            .with_target_for_ecu("app.bin", 1024, &"aa".repeat(32), "serial-1", "acme-ecu")
            .with_target_for_ecu("boot.bin", 512, &"bb".repeat(32), "serial-1", "acme-ecu")
            .build();
        let raw = sign_metadata(&signed, &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);

        let err = fx
            .repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap_err();
        assert_eq!(
            err,
            UptaneError::InvalidMetadata {
                repo: RepositoryType::Director,
                role: Role::Targets,
                reason: "found repeated ECU ID".to_owned(),
            }
        );
    }

    #[test]
    fn test_delegations_rejected() {
        let mut fx = fixture();
        let delegation_key = SigningKey::generate_ed25519();
        let signed = targets_with_one_ecu(1)
            .with_delegation("installers", &[delegation_key.public_key()], 1)
            .build();
        let raw = sign_metadata(&signed, &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);

        let err = fx
            .repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap_err();
        assert_eq!(
            err,
            UptaneError::InvalidMetadata {
                repo: RepositoryType::Director,
                role: Role::Targets,
                reason: "found unexpected delegation".to_owned(),
            }
        );
    }

    #[test]
    fn test_expired_targets_rejected() {
        let mut fx = fixture();
        let signed = TargetsBuilder::default()
            .with_version(1)
            .with_expiration_utc(2020, 1, 1, 0, 0, 0)
            .with_target_for_ecu("app.bin", 1024, &"aa".repeat(32), "serial-1", "acme-ecu")
            .build();
        let raw = sign_metadata(&signed, &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);

        let err = fx
            .repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap_err();
        assert_eq!(
            err,
            UptaneError::ExpiredMetadata {
                repo: RepositoryType::Director,
                role: Role::Targets,
            }
        );
    }

    #[test]
    fn test_check_meta_offline_reverifies_storage() {
        let mut fx = fixture();
        let raw = sign_metadata(&targets_with_one_ecu(1).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);
        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap();

        let mut fresh = DirectorRepo::new().with_clock(Box::new(FixedClock::at(2030, 1, 1)));
        fresh
            .check_meta_offline(&fx.storage)
            .expect("stored metadata did not re-verify");
        assert_eq!(fresh.targets().targets.len(), 1);

        let empty = MemoryStorage::default();
        let mut fresh = DirectorRepo::new();
        assert!(matches!(
            fresh.check_meta_offline(&empty),
            Err(UptaneError::Security { .. })
        ));
    }

    #[test]
    fn test_drop_targets_clears_state_and_storage() {
        let mut fx = fixture();
        let raw = sign_metadata(&targets_with_one_ecu(1).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);
        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap();

        fx.repo.drop_targets(&mut fx.storage);
        assert!(fx.repo.targets().is_empty());
        assert!(fx
            .storage
            .load_non_root(RepositoryType::Director, &Role::Targets)
            .is_none());
        // Root survives.
        assert!(fx.storage.load_latest_root(RepositoryType::Director).is_some());
    }

    #[test]
    fn test_match_targets_with_image_targets() {
        let mut fx = fixture();
        let raw = sign_metadata(&targets_with_one_ecu(1).build(), &[&fx.targets_key]).unwrap();
        fx.fetcher
            .insert(RepositoryType::Director, "targets.json", &raw);
        fx.repo
            .update_meta(&mut fx.storage, &fx.fetcher, false)
            .unwrap();

        let matching: TargetsMeta = serde_json::from_value(serde_json::json!({
            "_type": "Targets",
            "version": 1,
            "expires": "2038-01-01T00:00:00Z",
            "targets": {
                "app.bin": { "length": 1024, "hashes": { "sha256": "aa".repeat(32) } },
                "unrelated.bin": { "length": 5, "hashes": { "sha256": "cc".repeat(32) } }
            }
        }))
        .unwrap();
        assert!(fx.repo.match_targets_with_image_targets(Some(&matching)));

        let wrong_hash: TargetsMeta = serde_json::from_value(serde_json::json!({
            "_type": "Targets",
            "version": 1,
            "expires": "2038-01-01T00:00:00Z",
            "targets": {
                "app.bin": { "length": 1024, "hashes": { "sha256": "bb".repeat(32) } }
            }
        }))
        .unwrap();
        assert!(!fx.repo.match_targets_with_image_targets(Some(&wrong_hash)));
        assert!(!fx.repo.match_targets_with_image_targets(None));
    }
}
