//! Security Model
//!
//! Bitmask ACLs. A [`SecurityGroup`] holds an ordered set of [`AccessRule`]
//! entries plus an inheritance flag; managed groups are owned 1:1 by a node
//! and die with it, unmanaged groups are shared administrator-managed
//! resources.
//!
//! # Persisted Mask Forms
//!
//! A [`PermissionMask`] serializes as a binary digit string, one character
//! per flag in the fixed order R/W/C/D/A (`"10110"`). The positional letter
//! form (`"R-CD-"`) is for humans and log lines only.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use thiserror::Error;
use uuid::Uuid;

/// The five permission flags, in persisted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    CreateChild,
    Delete,
    /// Change ACL and ownership.
    Administer,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Permission::Read,
        Permission::Write,
        Permission::CreateChild,
        Permission::Delete,
        Permission::Administer,
    ];

    fn bit(self) -> u8 {
        match self {
            Permission::Read => 1 << 0,
            Permission::Write => 1 << 1,
            Permission::CreateChild => 1 << 2,
            Permission::Delete => 1 << 3,
            Permission::Administer => 1 << 4,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Permission::Read => 'R',
            Permission::Write => 'W',
            Permission::CreateChild => 'C',
            Permission::Delete => 'D',
            Permission::Administer => 'A',
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Read => "Read",
            Permission::Write => "Write",
            Permission::CreateChild => "CreateChild",
            Permission::Delete => "Delete",
            Permission::Administer => "Administer",
        };
        write!(f, "{}", name)
    }
}

/// Error parsing a persisted permission bit string.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid permission bit string: {0}")]
pub struct MaskParseError(pub String);

/// A set of permission flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionMask(u8);

impl PermissionMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        let mut mask = Self::empty();
        for p in Permission::ALL {
            mask |= p.into();
        }
        mask
    }

    pub fn of(perms: &[Permission]) -> Self {
        let mut mask = Self::empty();
        for p in perms {
            mask |= (*p).into();
        }
        mask
    }

    pub fn contains(self, perm: Permission) -> bool {
        self.0 & perm.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Fixed-order binary digit form, e.g. `"10110"`.
    pub fn to_bit_string(self) -> String {
        Permission::ALL
            .iter()
            .map(|p| if self.contains(*p) { '1' } else { '0' })
            .collect()
    }

    pub fn from_bit_string(s: &str) -> Result<Self, MaskParseError> {
        if s.len() != Permission::ALL.len() {
            return Err(MaskParseError(s.to_string()));
        }
        let mut mask = Self::empty();
        for (c, p) in s.chars().zip(Permission::ALL) {
            match c {
                '1' => mask |= p.into(),
                '0' => {}
                _ => return Err(MaskParseError(s.to_string())),
            }
        }
        Ok(mask)
    }

    /// Positional letter form for humans, e.g. `"R-CD-"`.
    pub fn to_letter_string(self) -> String {
        Permission::ALL
            .iter()
            .map(|p| if self.contains(*p) { p.letter() } else { '-' })
            .collect()
    }
}

impl From<Permission> for PermissionMask {
    fn from(p: Permission) -> Self {
        Self(p.bit())
    }
}

impl BitOr for PermissionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PermissionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PermissionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_letter_string())
    }
}

// The bit string is the persisted representation.
impl Serialize for PermissionMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_bit_string())
    }
}

impl<'de> Deserialize<'de> for PermissionMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PermissionMask::from_bit_string(&s).map_err(de::Error::custom)
    }
}

/// One ACL entry: an authority granted a set of flags.
///
/// Absence of a matching rule denies; there is no negative rule form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub authority: String,
    pub mask: PermissionMask,
}

impl AccessRule {
    pub fn new(authority: impl Into<String>, mask: PermissionMask) -> Self {
        Self {
            authority: authority.into(),
            mask,
        }
    }
}

/// ACL container attached to a node (managed) or shared (unmanaged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub tenant: String,
    pub id: Uuid,
    /// Ordered; evaluation is a union so order only matters for display.
    pub rules: Vec<AccessRule>,
    /// Whether ancestor groups contribute along the sg chain.
    pub inherits: bool,
    /// Managed groups are owned 1:1 by a node and destroyed with it.
    pub managed: bool,
    /// Owning node for managed groups.
    pub node_internal_id: Option<i64>,
}

impl SecurityGroup {
    pub fn managed(tenant: impl Into<String>, node_internal_id: i64) -> Self {
        Self {
            tenant: tenant.into(),
            id: Uuid::new_v4(),
            rules: Vec::new(),
            inherits: true,
            managed: true,
            node_internal_id: Some(node_internal_id),
        }
    }

    pub fn unmanaged(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            id: Uuid::new_v4(),
            rules: Vec::new(),
            inherits: true,
            managed: false,
            node_internal_id: None,
        }
    }

    /// Union of all rules matching any of the given authority names.
    pub fn mask_for<'a>(&self, authorities: impl Iterator<Item = &'a str>) -> PermissionMask {
        let names: Vec<&str> = authorities.collect();
        let mut mask = PermissionMask::empty();
        for rule in &self.rules {
            if names.contains(&rule.authority.as_str()) {
                mask |= rule.mask;
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_string_round_trip() {
        let mask = PermissionMask::of(&[Permission::Read, Permission::CreateChild, Permission::Delete]);
        assert_eq!(mask.to_bit_string(), "10110");
        assert_eq!(PermissionMask::from_bit_string("10110").unwrap(), mask);
    }

    #[test]
    fn letter_string_is_positional() {
        let mask = PermissionMask::of(&[Permission::Read, Permission::Administer]);
        assert_eq!(mask.to_letter_string(), "R---A");
    }

    #[test]
    fn rejects_bad_bit_strings() {
        assert!(PermissionMask::from_bit_string("101").is_err());
        assert!(PermissionMask::from_bit_string("1012x").is_err());
    }

    #[test]
    fn union_of_matching_rules() {
        let mut sg = SecurityGroup::unmanaged("acme");
        sg.rules.push(AccessRule::new("alice", Permission::Read.into()));
        sg.rules.push(AccessRule::new("editors", Permission::Write.into()));
        sg.rules.push(AccessRule::new("bob", Permission::Delete.into()));

        let mask = sg.mask_for(["alice", "editors"].into_iter());
        assert!(mask.contains(Permission::Read));
        assert!(mask.contains(Permission::Write));
        assert!(!mask.contains(Permission::Delete));
    }

    #[test]
    fn empty_mask_denies_everything() {
        let mask = PermissionMask::empty();
        for p in Permission::ALL {
            assert!(!mask.contains(p));
        }
    }
}
