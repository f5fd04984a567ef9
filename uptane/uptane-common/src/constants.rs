//! Size caps and bounds for metadata transfers, plus the well-known
//! offline-update locations.

/// Root metadata is fetched with a fixed 64 KiB cap.
pub const MAX_ROOT_SIZE: u64 = 64 * 1024;
/// Timestamp metadata is fetched with a fixed 16 KiB cap.
pub const MAX_TIMESTAMP_SIZE: u64 = 16 * 1024;
/// Fallback Snapshot cap, used when the Timestamp does not declare a size.
pub const MAX_SNAPSHOT_SIZE: u64 = 2 * 1024 * 1024;
/// Fallback Image Targets cap, used when the Snapshot does not declare a size.
pub const MAX_IMAGE_TARGETS_SIZE: u64 = 8 * 1024 * 1024;
/// Director Targets cap.
pub const MAX_DIRECTOR_TARGETS_SIZE: u64 = 8 * 1024 * 1024;

/// Bound on the Root rotation loop, so a malicious repository cannot feed
/// an endless chain of Root files.
pub const MAX_ROOT_ROTATIONS: u32 = 1000;

/// Well-known location of Director metadata delivered out of band.
pub const DIRECTOR_OFFLINE_DIR: &str = "/media/well-known/update/metadata/director";
/// Well-known location of Image metadata delivered out of band.
pub const IMAGE_OFFLINE_DIR: &str = "/media/well-known/update/metadata/image";
