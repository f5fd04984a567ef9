//! Shared building blocks for the Uptane client core: role and repository
//! identifiers, the error surface, hash helpers and the capability traits
//! (storage, fetcher, clock) that the repository state machines are
//! parameterized over.

use core::fmt;

pub mod constants;
pub mod crypto;
pub mod error;
pub mod fetcher;
pub mod storage;
pub mod time;

pub use error::UptaneError;

/// Metadata version number. Local "nothing stored yet" states are expressed
/// as `Option<Version>`, whose ordering (`None < Some(_)`) matches the
/// comparisons the update flow needs.
pub type Version = u64;

/// The two Uptane repositories a vehicle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RepositoryType {
    Director,
    Image,
}

impl fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryType::Director => write!(f, "director"),
            RepositoryType::Image => write!(f, "image"),
        }
    }
}

/// Uptane metadata roles, including the offline-update variants and an
/// open-ended delegation variant carrying the delegated role name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Root,
    Timestamp,
    Snapshot,
    Targets,
    OfflineSnapshot,
    OfflineTargets,
    Delegation(String),
}

impl Role {
    /// Lowercase wire name, as used in filenames and the Root `roles` map.
    pub fn name(&self) -> &str {
        match self {
            Role::Root => "root",
            Role::Timestamp => "timestamp",
            Role::Snapshot => "snapshot",
            Role::Targets => "targets",
            Role::OfflineSnapshot => "offlinesnapshot",
            Role::OfflineTargets => "offlinetargets",
            Role::Delegation(name) => name,
        }
    }

    /// The `_type` value carried inside signed metadata. Delegated roles
    /// are Targets documents.
    pub fn type_string(&self) -> String {
        match self {
            Role::Delegation(_) => "Targets".to_owned(),
            role => {
                let name = role.name();
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            }
        }
    }

    /// Canonical filename for this role: `<version>.<role>.json` when a
    /// version is given (Root chaining), `<role>.json` otherwise.
    pub fn filename(&self, version: Option<Version>) -> String {
        match version {
            Some(version) => format!("{}.{}.json", version, self.name()),
            None => format!("{}.json", self.name()),
        }
    }

    pub fn is_delegation(&self) -> bool {
        matches!(self, Role::Delegation(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Root.name(), "root");
        assert_eq!(Role::OfflineSnapshot.name(), "offlinesnapshot");
        assert_eq!(Role::Delegation("abc".into()).name(), "abc");
    }

    #[test]
    fn test_role_type_strings() {
        assert_eq!(Role::Root.type_string(), "Root");
        assert_eq!(Role::Timestamp.type_string(), "Timestamp");
        assert_eq!(Role::OfflineTargets.type_string(), "Offlinetargets");
        assert_eq!(Role::Delegation("abc".into()).type_string(), "Targets");
    }

    #[test]
    fn test_role_filenames() {
        assert_eq!(Role::Root.filename(Some(3)), "3.root.json");
        assert_eq!(Role::Root.filename(None), "root.json");
        assert_eq!(Role::Targets.filename(None), "targets.json");
        assert_eq!(
            Role::OfflineTargets.filename(None),
            "offlinetargets.json"
        );
    }

    #[test]
    fn test_version_option_ordering() {
        assert!(None < Some(0u64));
        assert!(Some(1u64) < Some(2u64));
    }
}
