//! The error surface of the metadata verification core.

use thiserror::Error;

use crate::{RepositoryType, Role};

/// Every failure a caller of the verification core can observe. Each
/// variant carries the repository it occurred in and, where meaningful,
/// the role that was being processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UptaneError {
    /// Transport failure, non-2xx status, size cap overrun or missing file.
    #[error("{repo}: failed to fetch '{role}' metadata")]
    MetadataFetchFailure { repo: RepositoryType, role: String },

    /// Malformed JSON, wrong `_type`, missing field or malformed key data.
    #[error("{repo}: invalid '{role}' metadata: {reason}")]
    InvalidMetadata {
        repo: RepositoryType,
        role: Role,
        reason: String,
    },

    /// Fewer distinct valid signatures than the role's threshold.
    #[error("{repo}: signature threshold for '{role}' not met")]
    UnmetThreshold { repo: RepositoryType, role: Role },

    /// The document's `expires` lies in the past.
    #[error("{repo}: '{role}' metadata has expired")]
    ExpiredMetadata { repo: RepositoryType, role: Role },

    /// A cross-role version binding does not hold.
    #[error("{repo}: version of '{role}' metadata does not match its counterpart")]
    VersionMismatch { repo: RepositoryType, role: Role },

    /// Rollback attempt, hash mismatch or a violated bound. Must be
    /// surfaced to the operator.
    #[error("{repo}: security violation: {reason}")]
    Security { repo: RepositoryType, reason: String },

    /// A required hash is absent from the referencing metadata.
    #[error("{repo}: no supported hash for '{role}' metadata")]
    NoHash { repo: RepositoryType, role: Role },

    /// The persistent storage collaborator failed.
    #[error("metadata storage failure: {reason}")]
    Storage { reason: String },
}

impl UptaneError {
    /// The repository the error occurred in, if it is repository-scoped.
    pub fn repo(&self) -> Option<RepositoryType> {
        match self {
            UptaneError::MetadataFetchFailure { repo, .. }
            | UptaneError::InvalidMetadata { repo, .. }
            | UptaneError::UnmetThreshold { repo, .. }
            | UptaneError::ExpiredMetadata { repo, .. }
            | UptaneError::VersionMismatch { repo, .. }
            | UptaneError::Security { repo, .. }
            | UptaneError::NoHash { repo, .. } => Some(*repo),
            UptaneError::Storage { .. } => None,
        }
    }

    /// The role the error concerns, where one is known.
    pub fn role(&self) -> Option<&Role> {
        match self {
            UptaneError::InvalidMetadata { role, .. }
            | UptaneError::UnmetThreshold { role, .. }
            | UptaneError::ExpiredMetadata { role, .. }
            | UptaneError::VersionMismatch { role, .. }
            | UptaneError::NoHash { role, .. } => Some(role),
            _ => None,
        }
    }
}
