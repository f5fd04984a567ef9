//! Repository state machines and the Root rotation engine they share.

pub mod director;
pub mod image;

pub use director::DirectorRepo;
pub use image::ImageRepo;

use std::path::Path;

use tracing::error;

use uptane_common::constants::{MAX_ROOT_ROTATIONS, MAX_ROOT_SIZE};
use uptane_common::fetcher::MetadataFetcher;
use uptane_common::storage::MetadataStorage;
use uptane_common::time::Clock;
use uptane_common::{RepositoryType, Role, UptaneError, Version};
use uptane_meta::verify::{verify_metadata, MetaWithKeys, VerifyOptions};
use uptane_meta::{Root, RootMeta};

/// Log a security violation at alert level before handing it to the caller.
pub(crate) fn security_violation(repo: RepositoryType, reason: &str) -> UptaneError {
    error!(target: "uptane::security", %repo, reason, "security violation");
    UptaneError::Security {
        repo,
        reason: reason.to_owned(),
    }
}

fn fetch_root_version<F>(
    fetcher: &F,
    repo: RepositoryType,
    offline: bool,
    offline_base: &Path,
    version: Version,
) -> Result<Vec<u8>, UptaneError>
where
    F: MetadataFetcher + ?Sized,
{
    if offline {
        fetcher.fetch_role_offline(offline_base, repo, &Role::Root, Some(version))
    } else {
        fetcher.fetch_role(repo, &Role::Root, Some(version), MAX_ROOT_SIZE)
    }
}

/// One rotation step: the candidate must meet the Root-role threshold of
/// both the currently trusted Root and of its own key set, and must carry
/// the successor version. This dual check is what lets a fleet recover
/// from an offline Root key compromise.
pub(crate) fn verify_root_step(
    trusted: &Root,
    raw: &[u8],
    repo: RepositoryType,
    opts: &VerifyOptions,
) -> Result<Root, UptaneError> {
    let trusted_keys = MetaWithKeys::from_root(trusted, opts)?;
    verify_metadata::<RootMeta>(raw, repo, &Role::Root, &trusted_keys)?;
    let next = Root::parse_and_verify_self(raw, repo, opts)?;
    if next.version() != trusted.version() + 1 {
        return Err(UptaneError::VersionMismatch {
            repo,
            role: Role::Root,
        });
    }
    Ok(next)
}

/// Establish and advance the trusted Root for a repository. Loads the
/// stored Root (bootstrapping from `1.root.json` if storage is empty),
/// then chains forward one version at a time until the source has no
/// newer Root. The returned Root is non-expired.
pub(crate) fn update_root<S, F>(
    storage: &mut S,
    fetcher: &F,
    clock: &dyn Clock,
    repo: RepositoryType,
    offline: bool,
    offline_base: &Path,
    opts: &VerifyOptions,
) -> Result<Root, UptaneError>
where
    S: MetadataStorage + ?Sized,
    F: MetadataFetcher + ?Sized,
{
    let initial = match storage.load_latest_root(repo) {
        Some(raw) => raw,
        None => {
            // First contact: the version-1 Root is the provisioning trust
            // anchor and only has itself to vouch for it.
            let raw = fetch_root_version(fetcher, repo, offline, offline_base, 1)?;
            let root = Root::parse_and_verify_self(&raw, repo, opts)?;
            storage.store_root(&raw, repo, root.version())?;
            raw
        }
    };
    let mut trusted = Root::parse_and_verify_self(&initial, repo, opts)?;

    let mut rotations = 0;
    loop {
        let next_version = trusted.version() + 1;
        let Ok(raw_next) = fetch_root_version(fetcher, repo, offline, offline_base, next_version)
        else {
            break;
        };
        if rotations >= MAX_ROOT_ROTATIONS {
            return Err(security_violation(repo, "too many Root rotations"));
        }
        rotations += 1;

        let next = verify_root_step(&trusted, &raw_next, repo, opts)?;
        storage.store_root(&raw_next, repo, next.version())?;
        trusted = next;
    }

    if trusted.is_expired(clock.now()) {
        return Err(UptaneError::ExpiredMetadata {
            repo,
            role: Role::Root,
        });
    }
    Ok(trusted)
}
