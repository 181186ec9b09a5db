use std::fmt;

use crate::error::{RamusError, Result};

/// Identifier of a neighbor element stored in an adjacency trie.
///
/// Vertex ids come from the surrounding graph store; the trie never mints
/// them, it only indexes them.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ElemId(pub u64);

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ElemId {
    fn from(value: u64) -> Self {
        ElemId(value)
    }
}

impl From<ElemId> for u64 {
    fn from(value: ElemId) -> Self {
        value.0
    }
}

/// Configuration for one adjacency trie.
#[derive(Copy, Clone, Debug)]
pub struct TrieOptions {
    /// Property values stored per element. Zero disables the side-table.
    pub props_per_entry: usize,
    /// Maximum number of entries a single leaf may hold.
    pub leaf_capacity: usize,
}

impl Default for TrieOptions {
    fn default() -> Self {
        Self {
            props_per_entry: 0,
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
        }
    }
}

/// Default leaf capacity used by [`TrieOptions::default`].
pub const DEFAULT_LEAF_CAPACITY: usize = 256;

impl TrieOptions {
    /// Options with `props` property values carried per element.
    pub fn with_props(props: usize) -> Self {
        Self {
            props_per_entry: props,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.leaf_capacity < 2 || self.leaf_capacity > u16::MAX as usize {
            return Err(RamusError::Invalid("leaf capacity out of range"));
        }
        Ok(())
    }
}
