//! Subjects and Unix-style permissions.
//!
//! Only the predicates the core needs: can a subject read, write or update a
//! resource, and is it the owner. Decisions are never cached.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the built-in administrative account.
pub const SYSTEM_USER: &str = "admin";
/// Name of the built-in anonymous account.
pub const GUEST_USER: &str = "guest";
/// Group whose members have DBA rights.
pub const DBA_GROUP: &str = "dba";

/// The identity a broker acts as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    name: String,
    groups: Vec<String>,
}

impl Subject {
    /// A subject with a primary group of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            groups: vec![name.clone()],
            name,
        }
    }

    /// The administrative subject (member of `dba`).
    #[must_use]
    pub fn system() -> Self {
        Self::new(SYSTEM_USER).with_group(DBA_GROUP)
    }

    /// The anonymous subject.
    #[must_use]
    pub fn guest() -> Self {
        Self::new(GUEST_USER)
    }

    /// Adds a group membership.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        if !self.groups.contains(&group) {
            self.groups.push(group);
        }
        self
    }

    /// Account name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Groups, primary first.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Primary group.
    #[must_use]
    pub fn primary_group(&self) -> &str {
        self.groups.first().map_or(self.name.as_str(), String::as_str)
    }

    /// Whether the subject belongs to `group`.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Whether the subject has administrative rights.
    #[must_use]
    pub fn is_dba(&self) -> bool {
        self.has_group(DBA_GROUP)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One permission bit, per user/group/other triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// May read content or list.
    Read = 4,
    /// May create, replace or remove.
    Write = 2,
    /// May modify in place and take advisory locks.
    Update = 1,
}

/// Owner, group and a 9-bit `rwu` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    owner: String,
    group: String,
    mode: u16,
}

impl Permission {
    /// Mode given to new resources.
    pub const DEFAULT_MODE: u16 = 0o755;

    /// Creates a permission.
    pub fn new(owner: impl Into<String>, group: impl Into<String>, mode: u16) -> Self {
        Self {
            owner: owner.into(),
            group: group.into(),
            mode: mode & 0o777,
        }
    }

    /// Default permission for a resource created by `subject`.
    #[must_use]
    pub fn for_subject(subject: &Subject) -> Self {
        Self::new(subject.name(), subject.primary_group(), Self::DEFAULT_MODE)
    }

    /// Owner account.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Owning group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Mode bits.
    #[must_use]
    pub fn mode(&self) -> u16 {
        self.mode
    }

    /// Replaces the mode bits.
    #[must_use]
    pub fn with_mode(mut self, mode: u16) -> Self {
        self.mode = mode & 0o777;
        self
    }

    /// Whether `subject` owns the resource.
    #[must_use]
    pub fn is_owner(&self, subject: &Subject) -> bool {
        subject.name() == self.owner
    }

    /// Whether `subject` holds `access`. DBA subjects always pass.
    #[must_use]
    pub fn validate(&self, subject: &Subject, access: Access) -> bool {
        if subject.is_dba() {
            return true;
        }
        let bit = access as u16;
        if self.is_owner(subject) {
            return self.mode & (bit << 6) != 0;
        }
        if subject.has_group(&self.group) {
            return self.mode & (bit << 3) != 0;
        }
        self.mode & bit != 0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for shift in [6, 3, 0] {
            let triple = (self.mode >> shift) & 0o7;
            for (bit, ch) in [(4, 'r'), (2, 'w'), (1, 'u')] {
                write!(f, "{}", if triple & bit != 0 { ch } else { '-' })?;
            }
        }
        write!(f, " {} {}", self.owner, self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_group_other_bits() {
        let perm = Permission::new("alice", "editors", 0o750);
        let alice = Subject::new("alice");
        let bob = Subject::new("bob").with_group("editors");
        let eve = Subject::new("eve");

        assert!(perm.validate(&alice, Access::Write));
        assert!(perm.validate(&bob, Access::Read));
        assert!(!perm.validate(&bob, Access::Write));
        assert!(!perm.validate(&eve, Access::Read));
        assert!(perm.validate(&Subject::system(), Access::Update));
    }

    #[test]
    fn defaults() {
        let perm = Permission::for_subject(&Subject::guest());
        assert_eq!(perm.mode(), 0o755);
        assert_eq!(perm.owner(), "guest");
        assert!(Subject::system().is_dba());
        assert!(!Subject::guest().is_dba());
    }

    #[test]
    fn display_uses_rwu() {
        let perm = Permission::new("admin", "dba", 0o754);
        assert_eq!(perm.to_string(), "rwur-ur-- admin dba");
        assert_eq!(perm.with_mode(0o1777).mode(), 0o777);
    }
}
