//! Batch subtree construction from a pre-sorted id range.
//!
//! Building bottom-up is far cheaper than repeated single insertion for
//! initial load and for pointer expansion of a full single-run leaf: one node
//! is allocated at the first divergence depth, the range is partitioned into
//! next-byte runs, and each run either packs into a leaf or sub-builds.
//! Consecutive small runs share one leaf through offset-tagged slots.

use tracing::trace;

use crate::epoch::Arena;
use crate::error::{RamusError, Result};
use crate::types::{ElemId, TrieOptions};

use super::key::{Key, KEY_LEN};
use super::node::{ChildRef, Node};
use super::{AdjacencyTrie, PendingResource};

impl AdjacencyTrie {
    /// Builds a trie from a strictly ascending id slice in one pass.
    ///
    /// `props`, when the trie carries a property side-table, must hold
    /// `props_per_entry` values per id, in id order.
    pub fn from_sorted(
        ids: &[ElemId],
        props: Option<&[u64]>,
        opts: TrieOptions,
        arena: &mut Arena,
    ) -> Result<Self> {
        opts.validate()?;
        let ppe = opts.props_per_entry;
        if ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RamusError::Invalid("ids not strictly ascending"));
        }
        let props = props.unwrap_or(&[]);
        if props.len() != ids.len() * ppe {
            return Err(RamusError::Invalid("property table length mismatch"));
        }
        if ids.is_empty() {
            return Ok(AdjacencyTrie::from_parts(None, 0, opts, Vec::new()));
        }
        let raw: Vec<u64> = ids.iter().map(|id| id.0).collect();
        let root = if raw.len() <= opts.leaf_capacity {
            build_root_leaf(&raw, props, ppe, arena)
        } else {
            build_node(&raw, props, ppe, opts.leaf_capacity, arena)?
        };
        Ok(AdjacencyTrie::from_parts(
            Some(root),
            raw.len(),
            opts,
            Vec::<PendingResource>::new(),
        ))
    }
}

fn build_root_leaf(ids: &[u64], props: &[u64], ppe: usize, arena: &mut Arena) -> ChildRef {
    let first = Key::from_id(ids[0]);
    if ids.len() == 1 {
        // Match what a first single insert produces.
        let leaf = arena.alloc_leaf(0, true, *first.bytes());
        unsafe { leaf.as_mut() }.push_id(ids[0], props);
        return ChildRef::Leaf(leaf, 0);
    }
    let divergence = Key::common_prefix_len(ids[0], ids[ids.len() - 1]);
    let leaf = arena.alloc_leaf(divergence, false, *first.bytes());
    {
        let body = unsafe { leaf.as_mut() };
        for (i, &id) in ids.iter().enumerate() {
            body.push_id(id, &props[i * ppe..(i + 1) * ppe]);
        }
    }
    ChildRef::Leaf(leaf, 0)
}

/// Builds an internal subtree covering `ids`, which must span at least two
/// distinct next-byte runs below their common prefix.
pub(crate) fn build_node(
    ids: &[u64],
    props: &[u64],
    ppe: usize,
    cap: usize,
    arena: &mut Arena,
) -> Result<ChildRef> {
    debug_assert!(ids.len() >= 2);
    let depth = Key::common_prefix_len(ids[0], ids[ids.len() - 1]);
    if depth >= KEY_LEN {
        return Err(RamusError::Corruption("batch range without divergence"));
    }
    let prefix = *Key::from_id(ids[0]).bytes();

    // Partition into runs of the byte at the divergence depth.
    let mut runs: Vec<(u8, usize, usize)> = Vec::new();
    let mut start = 0usize;
    while start < ids.len() {
        let byte = Key::from_id(ids[start]).byte(depth);
        let end = start
            + ids[start..].partition_point(|&id| Key::from_id(id).byte(depth) == byte);
        runs.push((byte, start, end));
        start = end;
    }
    trace!(depth, runs = runs.len(), entries = ids.len(), "batch building node");

    let mut node = Node::new4(depth, prefix);
    while node.capacity() < runs.len() {
        node.layout = node.grown_layout();
    }

    // Greedily pack consecutive leaf-sized runs into shared leaves; anything
    // larger sub-builds one level down.
    let mut group: Vec<(u8, usize, usize)> = Vec::new();
    let mut group_len = 0usize;
    for &(byte, run_start, run_end) in &runs {
        let run_len = run_end - run_start;
        if run_len > cap {
            flush_group(&mut node, &mut group, &mut group_len, ids, props, ppe, arena);
            let child = build_node(
                &ids[run_start..run_end],
                &props[run_start * ppe..run_end * ppe],
                ppe,
                cap,
                arena,
            )?;
            node.add_child(byte, child);
            continue;
        }
        if group_len + run_len > cap {
            flush_group(&mut node, &mut group, &mut group_len, ids, props, ppe, arena);
        }
        group.push((byte, run_start, run_end));
        group_len += run_len;
    }
    flush_group(&mut node, &mut group, &mut group_len, ids, props, ppe, arena);

    Ok(ChildRef::Node(arena.alloc_node(node)))
}

/// Packs the pending run group into one leaf, binding each run's slot at its
/// offset inside the shared array.
fn flush_group(
    node: &mut Node,
    group: &mut Vec<(u8, usize, usize)>,
    group_len: &mut usize,
    ids: &[u64],
    props: &[u64],
    ppe: usize,
    arena: &mut Arena,
) {
    if group.is_empty() {
        return;
    }
    let depth = node.depth as usize;
    let first = group[0].1;
    let last = group[group.len() - 1].2;
    let single_byte = group.len() == 1;
    let leaf = arena.alloc_leaf(depth, single_byte, *Key::from_id(ids[first]).bytes());
    {
        let body = unsafe { leaf.as_mut() };
        for i in first..last {
            body.push_id(ids[i], &props[i * ppe..(i + 1) * ppe]);
        }
    }
    for (extra, &(byte, run_start, _)) in group.iter().enumerate() {
        node.add_child(byte, ChildRef::Leaf(leaf, (run_start - first) as u16));
        if extra > 0 {
            leaf.add_ref();
        }
    }
    group.clear();
    *group_len = 0;
}
