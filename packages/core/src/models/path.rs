//! Path Structures
//!
//! Denormalized ancestor chains. Every active node carries one [`NodePath`]
//! per hard parent; exactly one of them is flagged primary. The chain is kept
//! both as a parsed id list and as the persisted colon-delimited string so
//! mutation code never re-splits strings in a loop.
//!
//! # Persisted Form
//!
//! The on-disk string layout is fixed for interop: `:id1:id2:…:` with a
//! leading and trailing colon (`:` alone for the empty chain). The chain ends
//! with the node's own internal id, so a node's path also answers "is X an
//! ancestor-or-self of me" with a single membership test.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors parsing a persisted ancestor-chain string.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathParseError {
    #[error("Path string must start and end with ':': {0}")]
    MissingDelimiters(String),

    #[error("Path component is not a numeric id: {0}")]
    InvalidComponent(String),
}

/// An ordered chain of node internal ids, root first.
///
/// The string form (`Display` / [`AncestorChain::parse`]) is the persisted
/// representation; the id list is the working representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AncestorChain(Vec<i64>);

impl AncestorChain {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_ids(ids: Vec<i64>) -> Self {
        Self(ids)
    }

    /// Parse the persisted `:id1:id2:` form.
    pub fn parse(s: &str) -> Result<Self, PathParseError> {
        if s == ":" {
            return Ok(Self::empty());
        }
        let inner = s
            .strip_prefix(':')
            .and_then(|rest| rest.strip_suffix(':'))
            .ok_or_else(|| PathParseError::MissingDelimiters(s.to_string()))?;
        let ids = inner
            .split(':')
            .map(|part| {
                part.parse::<i64>()
                    .map_err(|_| PathParseError::InvalidComponent(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(ids))
    }

    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    pub fn last(&self) -> Option<i64> {
        self.0.last().copied()
    }

    /// The chain extended by one id (child derivation).
    pub fn child(&self, id: i64) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        Self(ids)
    }

    pub fn starts_with(&self, prefix: &AncestorChain) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Replace `old_prefix` with `new_prefix`, keeping the suffix. Returns
    /// `None` when the chain does not start with `old_prefix`.
    pub fn replace_prefix(&self, old_prefix: &AncestorChain, new_prefix: &AncestorChain) -> Option<Self> {
        if !self.starts_with(old_prefix) {
            return None;
        }
        let mut ids = new_prefix.0.clone();
        ids.extend_from_slice(&self.0[old_prefix.0.len()..]);
        Some(Self(ids))
    }
}

impl fmt::Display for AncestorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, ":");
        }
        write!(f, ":")?;
        for id in &self.0 {
            write!(f, "{}:", id)?;
        }
        Ok(())
    }
}

impl From<AncestorChain> for String {
    fn from(chain: AncestorChain) -> Self {
        chain.to_string()
    }
}

impl TryFrom<String> for AncestorChain {
    type Error = PathParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

/// A denormalized path row for one node.
///
/// `ancestors` follows one hard-parent chain down to and including the node
/// itself. `sg_chain` is the analogous security-group chain: the internal ids
/// of the ancestor-or-self nodes whose security groups govern this node,
/// truncated at the nearest non-inheriting boundary. `level` is the depth of
/// the node below the tenant root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePath {
    pub ancestors: AncestorChain,
    pub sg_chain: AncestorChain,
    pub level: u32,
    /// True for the single path that follows only primary hard edges.
    pub primary: bool,
}

impl NodePath {
    pub fn new(ancestors: AncestorChain, sg_chain: AncestorChain, primary: bool) -> Self {
        let level = ancestors.len().saturating_sub(1) as u32;
        Self {
            ancestors,
            sg_chain,
            level,
            primary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_the_persisted_form() {
        let chain = AncestorChain::from_ids(vec![1, 42, 7]);
        let s = chain.to_string();
        assert_eq!(s, ":1:42:7:");
        assert_eq!(AncestorChain::parse(&s).unwrap(), chain);
    }

    #[test]
    fn empty_chain_is_a_single_colon() {
        assert_eq!(AncestorChain::empty().to_string(), ":");
        assert_eq!(AncestorChain::parse(":").unwrap(), AncestorChain::empty());
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            AncestorChain::parse("1:2:"),
            Err(PathParseError::MissingDelimiters(_))
        ));
        assert!(matches!(
            AncestorChain::parse(":1:x:"),
            Err(PathParseError::InvalidComponent(_))
        ));
    }

    #[test]
    fn prefix_replacement_preserves_the_suffix() {
        let chain = AncestorChain::from_ids(vec![1, 2, 3, 4]);
        let old_prefix = AncestorChain::from_ids(vec![1, 2]);
        let new_prefix = AncestorChain::from_ids(vec![9]);
        let rewritten = chain.replace_prefix(&old_prefix, &new_prefix).unwrap();
        assert_eq!(rewritten, AncestorChain::from_ids(vec![9, 3, 4]));

        let unrelated = AncestorChain::from_ids(vec![5, 6]);
        assert!(unrelated.replace_prefix(&old_prefix, &new_prefix).is_none());
    }

    #[test]
    fn level_is_depth_below_root() {
        let path = NodePath::new(
            AncestorChain::from_ids(vec![1, 2, 3]),
            AncestorChain::from_ids(vec![1, 2, 3]),
            true,
        );
        assert_eq!(path.level, 2);
    }
}
