//! Client-side half of the Uptane security framework: ingest signed
//! metadata from the vehicle-specific Director repository and the
//! fleet-wide Image repository, validate every document against a chain
//! of trust rooted in locally persisted keys, enforce freshness and
//! anti-rollback invariants, and expose a verified set of update targets
//! to the installation logic.
//!
//! The two repository state machines live in [`repo`]; both are driven by
//! `update_meta(storage, fetcher, offline)` and share the Root rotation
//! engine. Collaborators are capability traits from `uptane-common`
//! ([`MetadataStorage`], [`MetadataFetcher`], [`Clock`]) so the whole
//! verification flow runs unchanged against in-memory doubles in tests.
//!
//! ```no_run
//! use uptane::repo::{DirectorRepo, ImageRepo};
//! use uptane::utils::{MemoryFetcher, MemoryStorage};
//!
//! let fetcher = MemoryFetcher::default();
//! let mut storage = MemoryStorage::default();
//! let mut image = ImageRepo::new();
//! let mut director = DirectorRepo::new();
//!
//! image.update_meta(&mut storage, &fetcher, false)?;
//! director.update_meta(&mut storage, &fetcher, false)?;
//! assert!(director.match_targets_with_image_targets(image.targets()));
//! # Ok::<(), uptane::UptaneError>(())
//! ```

pub mod repo;
pub mod utils;

pub use repo::director::DirectorRepo;
pub use repo::image::ImageRepo;

pub use uptane_common::{
    constants, crypto, fetcher::MetadataFetcher, storage::MetadataStorage, time::Clock,
    time::SystemClock, RepositoryType, Role, UptaneError, Version,
};
pub use uptane_meta::{verify::VerifyOptions, Root, SnapshotMeta, TargetsMeta, TimestampMeta};
