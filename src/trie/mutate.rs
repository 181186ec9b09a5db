//! In-place mutation: the single-writer path.
//!
//! These operations mutate nodes and leaves directly and are only legal while
//! no reader is registered and no other live tree version shares structure
//! with this one. The multi-version path lives in [`super::cow`].

use tracing::trace;

use crate::epoch::Arena;
use crate::error::{RamusError, Result};
use crate::types::ElemId;

use super::builder::build_node;
use super::key::Key;
use super::leaf::LeafRef;
use super::node::{ChildRef, Node, NodeRef};
use super::{release_child, AdjacencyTrie};

/// Result of a removal.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoveOutcome {
    /// Whether the element was present and removed.
    pub removed: bool,
    /// Whether the removal dropped a slot, leaf, or node.
    pub structural_change: bool,
}

impl AdjacencyTrie {
    /// Inserts an element in place, returning `false` if it was already
    /// present.
    ///
    /// Single-writer path: the caller must hold the writer arena for this
    /// tree and guarantee that no registered reader and no other live
    /// version can reach its nodes.
    pub fn insert_element(&mut self, id: ElemId, props: &[u64], arena: &mut Arena) -> Result<bool> {
        let ppe = self.options().props_per_entry;
        if props.len() != ppe {
            return Err(RamusError::Invalid("property row length mismatch"));
        }
        let cap = self.options().leaf_capacity;
        let key = Key::from_id(id.0);
        let inserted = match self.root() {
            None => {
                let leaf = arena.alloc_leaf(0, true, *key.bytes());
                unsafe { leaf.as_mut() }.push_id(id.0, props);
                self.set_root(Some(ChildRef::Leaf(leaf, 0)));
                true
            }
            Some(ChildRef::Leaf(l, _)) => {
                self.insert_into_root_leaf(l, key, id.0, props, ppe, cap, arena)?
            }
            Some(ChildRef::Node(n)) => {
                let (inserted, patch) = insert_descend(n, 0, key, id.0, props, ppe, cap, arena)?;
                if let Some(new_root) = patch {
                    self.set_root(Some(new_root));
                }
                inserted
            }
        };
        if inserted {
            self.adjust_len(1);
        }
        Ok(inserted)
    }

    /// Removes an element in place.
    ///
    /// Same single-writer contract as [`AdjacencyTrie::insert_element`].
    pub fn remove_element(&mut self, id: ElemId, arena: &mut Arena) -> RemoveOutcome {
        let ppe = self.options().props_per_entry;
        let key = Key::from_id(id.0);
        let outcome = match self.root() {
            None => RemoveOutcome::default(),
            Some(ChildRef::Leaf(l, _)) => {
                match l.get().position(id.0) {
                    Ok(idx) => {
                        unsafe { l.as_mut() }.remove_at(idx, ppe);
                        if l.get().is_empty() {
                            release_child(ChildRef::Leaf(l, 0), Some(arena));
                            self.set_root(None);
                            RemoveOutcome {
                                removed: true,
                                structural_change: true,
                            }
                        } else {
                            RemoveOutcome {
                                removed: true,
                                structural_change: false,
                            }
                        }
                    }
                    Err(_) => RemoveOutcome::default(),
                }
            }
            Some(ChildRef::Node(n)) => {
                let (removed, structural, emptied) = remove_descend(n, 0, key, ppe, arena);
                if emptied {
                    self.set_root(None);
                }
                RemoveOutcome {
                    removed,
                    structural_change: structural || emptied,
                }
            }
        };
        if outcome.removed {
            self.adjust_len(-1);
        }
        outcome
    }

    fn insert_into_root_leaf(
        &mut self,
        l: LeafRef,
        key: Key,
        id: u64,
        props: &[u64],
        ppe: usize,
        cap: usize,
        arena: &mut Arena,
    ) -> Result<bool> {
        let depth = l.get().depth as usize;
        let mismatch = key.mismatch(&l.get().prefix, 0, depth);
        if mismatch < depth {
            // The id diverges inside the leaf's compressed path: branch at
            // the first disagreeing byte.
            unsafe { l.as_mut() }.reshape(mismatch, true);
            let mut branch = Node::new4(mismatch, *key.bytes());
            branch.add_child(l.get().prefix[mismatch], ChildRef::Leaf(l, 0));
            let single = arena.alloc_leaf(mismatch, true, *key.bytes());
            unsafe { single.as_mut() }.push_id(id, props);
            branch.add_child(key.byte(mismatch), ChildRef::Leaf(single, 0));
            self.set_root(Some(ChildRef::Node(arena.alloc_node(branch))));
            return Ok(true);
        }
        if l.get().single_byte && key.byte(depth) != l.get().prefix[depth] {
            unsafe { l.as_mut() }.reshape(depth, false);
        }
        if l.get().position(id).is_ok() {
            return Ok(false);
        }
        if l.get().len() == cap {
            // Promote the root leaf to a node whose slots index the shared
            // array by run, then let the node path split or expand it.
            let runs = l.get().run_starts();
            let mut node = Node::new4(depth, *key.bytes());
            for &(byte, start) in &runs {
                if node.is_full() {
                    node.layout = node.grown_layout();
                }
                node.add_child(byte, ChildRef::Leaf(l, start as u16));
            }
            for _ in 1..runs.len() {
                l.add_ref();
            }
            let nref = arena.alloc_node(node);
            self.set_root(Some(ChildRef::Node(nref)));
            let (inserted, patch) = insert_descend(nref, 0, key, id, props, ppe, cap, arena)?;
            if let Some(new_root) = patch {
                self.set_root(Some(new_root));
            }
            return Ok(inserted);
        }
        let idx = match l.get().position(id) {
            Ok(_) => return Ok(false),
            Err(idx) => idx,
        };
        unsafe { l.as_mut() }.insert_at(idx, id, props, ppe);
        Ok(true)
    }
}

pub(super) fn insert_descend(
    nref: NodeRef,
    checked: usize,
    key: Key,
    id: u64,
    props: &[u64],
    ppe: usize,
    cap: usize,
    arena: &mut Arena,
) -> Result<(bool, Option<ChildRef>)> {
    let depth = nref.get().depth as usize;
    let mismatch = key.mismatch(&nref.get().prefix, checked, depth);
    if mismatch < depth {
        // Case (a): the node's compressed prefix disagrees with the key.
        // Interpose a 4-way branch between the existing subtree and a new
        // singleton leaf.
        let mut branch = Node::new4(mismatch, *key.bytes());
        branch.add_child(nref.get().prefix[mismatch], ChildRef::Node(nref));
        let single = arena.alloc_leaf(mismatch, true, *key.bytes());
        unsafe { single.as_mut() }.push_id(id, props);
        branch.add_child(key.byte(mismatch), ChildRef::Leaf(single, 0));
        return Ok((true, Some(ChildRef::Node(arena.alloc_node(branch)))));
    }
    let byte = key.byte(depth);
    loop {
        match nref.get().find_child(byte) {
            Some(ChildRef::Node(child)) => {
                let (inserted, patch) =
                    insert_descend(child, depth + 1, key, id, props, ppe, cap, arena)?;
                if let Some(replacement) = patch {
                    unsafe { nref.as_mut() }.set_child(byte, replacement);
                }
                return Ok((inserted, None));
            }
            Some(ChildRef::Leaf(l, _)) => {
                match leaf_zone_insert(nref, byte, l, true, id, props, ppe, cap, arena)? {
                    Zone::Done(inserted) => return Ok((inserted, None)),
                    Zone::Retry => continue,
                }
            }
            None => {
                // Case (c): no slot for this byte yet. Probe a sibling leaf
                // that can absorb the new run before materializing a fresh
                // singleton.
                if let Some((_, sibling, _)) = nref.get().nearest_leaf(byte) {
                    match leaf_zone_insert(nref, byte, sibling, false, id, props, ppe, cap, arena)? {
                        Zone::Done(inserted) => return Ok((inserted, None)),
                        Zone::Retry => continue,
                    }
                }
                let node = unsafe { nref.as_mut() };
                if node.is_full() {
                    trace!(depth, fanout = node.capacity(), "growing node tier");
                    node.layout = node.grown_layout();
                }
                let leaf = arena.alloc_leaf(depth, true, *key.bytes());
                unsafe { leaf.as_mut() }.push_id(id, props);
                node.add_child(byte, ChildRef::Leaf(leaf, 0));
                return Ok((true, None));
            }
        }
    }
}

enum Zone {
    Done(bool),
    Retry,
}

/// Insert into (or alongside) a leaf reached through `nref`'s slot table.
///
/// `has_slot` says whether the dispatch byte already owns a slot into `l`;
/// when it does not, the leaf is a sibling absorbing a brand-new run.
#[allow(clippy::too_many_arguments)]
fn leaf_zone_insert(
    nref: NodeRef,
    byte: u8,
    l: LeafRef,
    has_slot: bool,
    id: u64,
    props: &[u64],
    ppe: usize,
    cap: usize,
    arena: &mut Arena,
) -> Result<Zone> {
    if !has_slot && l.get().single_byte {
        // A single-byte leaf cannot host a foreign run; drop the flag and
        // re-encode one tier wider.
        let depth = nref.get().depth as usize;
        trace!(depth, "widening single-byte leaf to absorb new run");
        unsafe { l.as_mut() }.reshape(depth, false);
    }
    if l.get().position(id).is_ok() {
        return Ok(Zone::Done(false));
    }
    if l.get().len() == cap {
        if l.get().single_run() {
            pointer_expansion(nref, l, ppe, cap, arena)?;
        } else {
            split_leaf(nref, l, ppe, arena);
        }
        return Ok(Zone::Retry);
    }
    let idx = match l.get().position(id) {
        Ok(_) => return Ok(Zone::Done(false)),
        Err(idx) => idx,
    };
    unsafe { l.as_mut() }.insert_at(idx, id, props, ppe);
    let node = unsafe { nref.as_mut() };
    node.shift_offsets_after_insert(l, idx, byte);
    if !has_slot {
        if node.is_full() {
            trace!(fanout = node.capacity(), "growing node tier");
            node.layout = node.grown_layout();
        }
        node.add_child(byte, ChildRef::Leaf(l, idx as u16));
        l.add_ref();
    }
    Ok(Zone::Done(true))
}

/// Replaces a full single-run leaf with a one-level-deeper subtree built from
/// its entries, instead of a count-based split that could not advance the
/// trie.
fn pointer_expansion(
    nref: NodeRef,
    l: LeafRef,
    ppe: usize,
    cap: usize,
    arena: &mut Arena,
) -> Result<()> {
    let run_byte = l.get().dispatch_byte_at(0);
    let ids: Vec<u64> = l.get().ids().collect();
    let props = l.get().props.clone();
    trace!(
        entries = ids.len(),
        byte = run_byte,
        "pointer expansion of full single-run leaf"
    );
    let node = unsafe { nref.as_mut() };
    let sub = build_node(&ids, &props, ppe, cap, arena)?;
    node.set_child(run_byte, sub);
    if l.dec_ref() == 1 {
        arena.recycle_leaf(unsafe { l.into_box() });
    } else {
        return Err(RamusError::Corruption("expanded leaf still referenced"));
    }
    Ok(())
}

/// Splits a full multi-run leaf at the run boundary nearest its midpoint and
/// retargets every slot past the boundary to the new right-hand leaf.
fn split_leaf(nref: NodeRef, l: LeafRef, ppe: usize, arena: &mut Arena) {
    let node = unsafe { nref.as_mut() };
    let depth = node.depth as usize;
    let len = l.get().len();
    let target = len / 2;
    let runs = l.get().run_starts();
    let split = runs
        .iter()
        .skip(1)
        .map(|&(_, start)| start)
        .min_by_key(|&start| start.abs_diff(target))
        .expect("split of multi-run leaf");
    trace!(len, split, "splitting full leaf at run boundary");

    let (tail_ids, tail_props) = unsafe { l.as_mut() }.split_tail(split, ppe);
    let right = arena.alloc_leaf(depth, false, *Key::from_id(tail_ids[0]).bytes());
    {
        let right_leaf = unsafe { right.as_mut() };
        for (i, &tid) in tail_ids.iter().enumerate() {
            right_leaf.push_id(tid, &tail_props[i * ppe..(i + 1) * ppe]);
        }
        if right_leaf.single_run() {
            right_leaf.reshape(depth, true);
        }
    }
    {
        let left_leaf = unsafe { l.as_mut() };
        if left_leaf.single_run() {
            left_leaf.reshape(depth, true);
        }
    }

    let slots = node.leaf_slots(l);
    let mut moved = 0usize;
    for &(slot_byte, off) in &slots {
        if (off as usize) >= split {
            node.set_child(slot_byte, ChildRef::Leaf(right, off - split as u16));
            moved += 1;
        }
    }
    debug_assert!(moved >= 1 && moved < slots.len());
    for _ in 1..moved {
        right.add_ref();
    }
    for _ in 0..moved {
        l.dec_ref();
    }
}

/// Returns (removed, structural_change, node_emptied). When the node empties
/// it recycles itself before returning; the caller only drops its slot.
pub(super) fn remove_descend(
    nref: NodeRef,
    checked: usize,
    key: Key,
    ppe: usize,
    arena: &mut Arena,
) -> (bool, bool, bool) {
    let depth = nref.get().depth as usize;
    if key.mismatch(&nref.get().prefix, checked, depth) != depth {
        return (false, false, false);
    }
    let byte = key.byte(depth);
    match nref.get().find_child(byte) {
        None => (false, false, false),
        Some(ChildRef::Node(child)) => {
            let (removed, structural, emptied) = remove_descend(child, depth + 1, key, ppe, arena);
            let node = unsafe { nref.as_mut() };
            if emptied {
                node.remove_child(byte);
                if node.child_count() == 0 {
                    if nref.dec_ref() == 1 {
                        arena.recycle_node(unsafe { nref.into_box() });
                    }
                    return (removed, true, true);
                }
            }
            (removed, structural || emptied, false)
        }
        Some(ChildRef::Leaf(l, off)) => {
            let idx = match l.get().position(key.id()) {
                Ok(idx) => idx,
                Err(_) => return (false, false, false),
            };
            let node = unsafe { nref.as_mut() };
            let slots = node.leaf_slots(l);
            let this = slots
                .iter()
                .position(|&(b, _)| b == byte)
                .expect("dispatched slot present");
            let run_end = slots
                .get(this + 1)
                .map(|&(_, o)| o as usize)
                .unwrap_or_else(|| l.get().len());
            let run_len = run_end - off as usize;

            unsafe { l.as_mut() }.remove_at(idx, ppe);
            node.shift_offsets_after_remove(l, idx);

            let mut structural = false;
            if run_len == 1 {
                node.remove_child(byte);
                structural = true;
                if l.dec_ref() == 1 {
                    debug_assert!(l.get().is_empty());
                    arena.recycle_leaf(unsafe { l.into_box() });
                }
                if node.child_count() == 0 {
                    if nref.dec_ref() == 1 {
                        arena.recycle_node(unsafe { nref.into_box() });
                    }
                    return (true, true, true);
                }
            }
            (true, structural, false)
        }
    }
}
