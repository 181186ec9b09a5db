//! Concurrent adjacency index built on a copy-on-write adaptive radix trie.
//!
//! Each [`AdjacencyTrie`] holds the sorted neighbor set of one vertex, keyed
//! by the big-endian bytes of the 64-bit neighbor id. Readers register with
//! the [`epoch::ReaderRegistry`], publish a timestamp from the shared
//! [`epoch::VersionClock`], and traverse an immutable snapshot; writers claim
//! a per-transaction [`epoch::Arena`] and either mutate in place (single
//! writer, no readers) or produce a new version through copy-on-write,
//! retiring the replaced path once the reader watermark allows it.

#![warn(missing_docs)]

pub mod epoch;
mod error;
pub mod trie;
mod types;

pub use error::{RamusError, Result};
pub use trie::{
    AdjacencyTrie, CowInsert, CowRemove, EntryRef, RemoveOutcome, TrieSnapshot, TrieStats,
};
pub use types::{ElemId, TrieOptions, DEFAULT_LEAF_CAPACITY};
