//! Concurrent adjacency trie.
//!
//! One [`AdjacencyTrie`] holds the sorted neighbor set of a single vertex as
//! a compressed radix trie over the big-endian bytes of the 64-bit neighbor
//! id. Mutation comes in two flavors: an in-place path for the single-writer
//! case with no registered readers, and a copy-on-write path that never
//! touches anything reachable from an already-published root, so concurrent
//! readers keep a consistent point-in-time view.

mod builder;
mod cow;
mod intersect;
mod key;
mod leaf;
mod mutate;
mod node;

pub use cow::{CowInsert, CowRemove};
pub use mutate::RemoveOutcome;

use std::fmt;
use std::marker::PhantomData;

use crate::epoch::{Arena, ReaderGuard};
use crate::error::{RamusError, Result};
use crate::types::{ElemId, TrieOptions};

use key::Key;

pub(crate) use key::KEY_LEN;
pub(crate) use leaf::{Leaf, LeafRef, LeafWidth};
pub(crate) use node::{ChildRef, Node, NodeRef};

/// Ownership tag for one resource touched by an in-flight COW transaction.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum PendingTag {
    /// Original node replaced by a fresh copy on the mutation path.
    Copied,
    /// Original subtree adopted unchanged by the new tree; its reference
    /// count was raised at mount time.
    MountedShared,
    /// Original leaf whose slots were all retargeted to a fresh copy; it
    /// stays owned by the replaced node and dies with it.
    LeafOwned,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct PendingResource {
    pub(crate) tag: PendingTag,
    pub(crate) child: ChildRef,
}

/// Adjacency set of one vertex, backed by an adaptive radix trie.
pub struct AdjacencyTrie {
    root: Option<ChildRef>,
    len: usize,
    opts: TrieOptions,
    pending: Vec<PendingResource>,
}

impl AdjacencyTrie {
    /// Creates an empty trie.
    pub fn new(opts: TrieOptions) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            root: None,
            len: 0,
            opts,
            pending: Vec::new(),
        })
    }

    pub(crate) fn from_parts(
        root: Option<ChildRef>,
        len: usize,
        opts: TrieOptions,
        pending: Vec<PendingResource>,
    ) -> Self {
        Self {
            root,
            len,
            opts,
            pending,
        }
    }

    /// Number of elements stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the trie holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The options this trie was created with.
    pub fn options(&self) -> TrieOptions {
        self.opts
    }

    pub(crate) fn root(&self) -> Option<ChildRef> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Option<ChildRef>) {
        self.root = root;
    }

    pub(crate) fn take_root(&mut self) -> Option<ChildRef> {
        self.len = 0;
        self.root.take()
    }

    pub(crate) fn adjust_len(&mut self, delta: isize) {
        self.len = (self.len as isize + delta) as usize;
    }

    pub(crate) fn pending(&self) -> &[PendingResource] {
        &self.pending
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Locates an element, returning a handle into its leaf.
    pub fn search(&self, id: ElemId) -> Option<EntryRef<'_>> {
        let (leaf, idx) = search_from(self.root, id.0)?;
        Some(EntryRef {
            leaf,
            idx,
            ppe: self.opts.props_per_entry,
            _marker: PhantomData,
        })
    }

    /// Membership test.
    pub fn has_element(&self, id: ElemId) -> bool {
        search_from(self.root, id.0).is_some()
    }

    /// Looks up one property value of an element.
    ///
    /// Errors if the trie was not configured with a property side-table or
    /// `prop` is out of range; returns `Ok(None)` when the id is absent.
    pub fn get_property(&self, id: ElemId, prop: usize) -> Result<Option<u64>> {
        let ppe = self.opts.props_per_entry;
        if ppe == 0 {
            return Err(RamusError::Invalid("properties not configured"));
        }
        if prop >= ppe {
            return Err(RamusError::Invalid("property index out of range"));
        }
        Ok(search_from(self.root, id.0).map(|(leaf, idx)| leaf.get().prop_at(idx, prop, ppe)))
    }

    /// Visits every element in ascending id order.
    pub fn for_each(&self, mut f: impl FnMut(ElemId)) {
        for_each_from(self.root, &mut |id| f(ElemId(id)));
    }

    /// Visits every element at leaf granularity, without a global order
    /// guarantee between leaves.
    pub fn for_each_unordered(&self, mut f: impl FnMut(ElemId)) {
        for_each_unordered_from(self.root, &mut |id| f(ElemId(id)));
    }

    /// Collects every element in ascending order.
    pub fn to_vec(&self) -> Vec<ElemId> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each(|id| out.push(id));
        out
    }

    /// Captures a read-only view tied to a published reader registration.
    ///
    /// The snapshot stays valid for the guard's whole lifetime even if a
    /// writer supersedes this tree: copy-on-write never mutates anything
    /// reachable from the captured root, and reclamation is gated on the
    /// guard's published timestamp.
    pub fn snapshot<'g>(&self, _guard: &'g ReaderGuard<'g>) -> TrieSnapshot<'g> {
        TrieSnapshot {
            root: self.root,
            len: self.len,
            opts: self.opts,
            _guard: PhantomData,
        }
    }

    /// Structural statistics, mainly for tests and diagnostics.
    pub fn stats(&self) -> TrieStats {
        let mut stats = TrieStats::default();
        if let Some(root) = self.root {
            collect_stats(root, &mut stats);
        }
        stats
    }

    /// Walks the whole structure checking the representation invariants.
    ///
    /// This is a debugging aid for tests; it is not part of any production
    /// code path.
    pub fn verify_invariants(&self) -> Result<()> {
        if let Some(root) = self.root {
            let count = verify_child(root, 0)?;
            if count != self.len {
                return Err(RamusError::Corruption("element count mismatch"));
            }
        } else if self.len != 0 {
            return Err(RamusError::Corruption("empty tree with nonzero len"));
        }
        Ok(())
    }
}

impl Default for AdjacencyTrie {
    fn default() -> Self {
        Self {
            root: None,
            len: 0,
            opts: TrieOptions::default(),
            pending: Vec::new(),
        }
    }
}

impl Drop for AdjacencyTrie {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            release_child(root, None);
        }
    }
}

impl fmt::Debug for AdjacencyTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdjacencyTrie")
            .field("len", &self.len)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Handle to one located element inside a leaf.
pub struct EntryRef<'a> {
    leaf: LeafRef,
    idx: usize,
    ppe: usize,
    _marker: PhantomData<&'a AdjacencyTrie>,
}

impl EntryRef<'_> {
    /// The element id this entry stores.
    pub fn id(&self) -> ElemId {
        ElemId(self.leaf.get().id_at(self.idx))
    }

    /// One property value of the entry, if configured and in range.
    pub fn property(&self, prop: usize) -> Option<u64> {
        if prop >= self.ppe {
            return None;
        }
        Some(self.leaf.get().prop_at(self.idx, prop, self.ppe))
    }
}

/// Read-only view of a trie captured under a published reader registration.
#[derive(Copy, Clone)]
pub struct TrieSnapshot<'g> {
    root: Option<ChildRef>,
    len: usize,
    opts: TrieOptions,
    _guard: PhantomData<&'g ()>,
}

impl TrieSnapshot<'_> {
    /// Number of elements in the snapshot.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the snapshot holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Membership test against the captured version.
    pub fn has_element(&self, id: ElemId) -> bool {
        search_from(self.root, id.0).is_some()
    }

    /// Property lookup against the captured version.
    pub fn get_property(&self, id: ElemId, prop: usize) -> Result<Option<u64>> {
        let ppe = self.opts.props_per_entry;
        if ppe == 0 {
            return Err(RamusError::Invalid("properties not configured"));
        }
        if prop >= ppe {
            return Err(RamusError::Invalid("property index out of range"));
        }
        Ok(search_from(self.root, id.0).map(|(leaf, idx)| leaf.get().prop_at(idx, prop, ppe)))
    }

    /// Ascending traversal of the captured version.
    pub fn for_each(&self, mut f: impl FnMut(ElemId)) {
        for_each_from(self.root, &mut |id| f(ElemId(id)));
    }

    /// Leaf-granular traversal of the captured version.
    pub fn for_each_unordered(&self, mut f: impl FnMut(ElemId)) {
        for_each_unordered_from(self.root, &mut |id| f(ElemId(id)));
    }

    /// Collects the captured version in ascending order.
    pub fn to_vec(&self) -> Vec<ElemId> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each(|id| out.push(id));
        out
    }
}

/// Structural statistics for one trie.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TrieStats {
    /// Internal nodes per fanout tier.
    pub nodes4: usize,
    /// Internal nodes per fanout tier.
    pub nodes16: usize,
    /// Internal nodes per fanout tier.
    pub nodes48: usize,
    /// Internal nodes per fanout tier.
    pub nodes256: usize,
    /// Leaves per suffix width.
    pub leaves8: usize,
    /// Leaves per suffix width.
    pub leaves16: usize,
    /// Leaves per suffix width.
    pub leaves32: usize,
    /// Leaves per suffix width.
    pub leaves64: usize,
    /// Total elements.
    pub elements: usize,
    /// Pointer slots referencing a leaf also referenced by a sibling slot.
    pub shared_leaf_slots: usize,
}

impl TrieStats {
    /// Total internal node count.
    pub fn nodes(&self) -> usize {
        self.nodes4 + self.nodes16 + self.nodes48 + self.nodes256
    }

    /// Total leaf count.
    pub fn leaves(&self) -> usize {
        self.leaves8 + self.leaves16 + self.leaves32 + self.leaves64
    }
}

// ---------------------------------------------------------------------------
// Shared read paths over raw children.

pub(crate) fn search_from(root: Option<ChildRef>, id: u64) -> Option<(LeafRef, usize)> {
    let key = Key::from_id(id);
    let mut child = root?;
    let mut checked = 0usize;
    loop {
        match child {
            ChildRef::Node(nref) => {
                let n = nref.get();
                let depth = n.depth as usize;
                if key.mismatch(&n.prefix, checked, depth) != depth {
                    return None;
                }
                child = n.find_child(key.byte(depth))?;
                checked = depth + 1;
            }
            ChildRef::Leaf(l, _) => {
                let leaf = l.get();
                let eff = leaf.effective_depth();
                if checked < eff && key.mismatch(&leaf.prefix, checked, eff) != eff {
                    return None;
                }
                return leaf.position(id).ok().map(|idx| (l, idx));
            }
        }
    }
}

pub(crate) fn for_each_from(root: Option<ChildRef>, f: &mut impl FnMut(u64)) {
    let Some(child) = root else { return };
    match child {
        ChildRef::Node(n) => visit_node_ordered(n, f),
        ChildRef::Leaf(l, _) => {
            let leaf = l.get();
            for i in 0..leaf.len() {
                f(leaf.id_at(i));
            }
        }
    }
}

fn visit_node_ordered(nref: NodeRef, f: &mut impl FnMut(u64)) {
    let n = nref.get();
    let mut iter = n.children().peekable();
    while let Some((_, child)) = iter.next() {
        match child {
            ChildRef::Node(m) => visit_node_ordered(m, f),
            ChildRef::Leaf(l, off) => {
                let end = match iter.peek() {
                    Some((_, ChildRef::Leaf(l2, off2))) if *l2 == l => *off2 as usize,
                    _ => l.get().len(),
                };
                let leaf = l.get();
                for i in off as usize..end {
                    f(leaf.id_at(i));
                }
            }
        }
    }
}

pub(crate) fn for_each_unordered_from(root: Option<ChildRef>, f: &mut impl FnMut(u64)) {
    let Some(child) = root else { return };
    visit_child_unordered(child, f);
}

fn visit_child_unordered(child: ChildRef, f: &mut impl FnMut(u64)) {
    match child {
        ChildRef::Node(nref) => {
            for (_, c) in nref.get().children() {
                visit_child_unordered(c, f);
            }
        }
        // A shared leaf is visited once, through its offset-zero slot.
        ChildRef::Leaf(l, 0) => {
            let leaf = l.get();
            for i in 0..leaf.len() {
                f(leaf.id_at(i));
            }
        }
        ChildRef::Leaf(_, _) => {}
    }
}

// ---------------------------------------------------------------------------
// Reference-counted release.

/// Drops one reference to `child`, recursively freeing any object whose count
/// reaches zero. With an arena, freed objects land on its free-lists for
/// reuse; without one they return to the allocator.
pub(crate) fn release_child(child: ChildRef, mut arena: Option<&mut Arena>) {
    match child {
        ChildRef::Node(n) => {
            if n.dec_ref() == 1 {
                let children: Vec<ChildRef> = n.get().children().map(|(_, c)| c).collect();
                for c in children {
                    release_child(c, arena.as_deref_mut());
                }
                let boxed = unsafe { n.into_box() };
                match arena {
                    Some(a) => a.recycle_node(boxed),
                    None => drop(boxed),
                }
            }
        }
        ChildRef::Leaf(l, _) => {
            if l.dec_ref() == 1 {
                let boxed = unsafe { l.into_box() };
                match arena {
                    Some(a) => a.recycle_leaf(boxed),
                    None => drop(boxed),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stats and invariant walks.

fn collect_stats(child: ChildRef, stats: &mut TrieStats) {
    match child {
        ChildRef::Node(nref) => {
            let n = nref.get();
            match &n.layout {
                node::NodeLayout::N4(_) => stats.nodes4 += 1,
                node::NodeLayout::N16(_) => stats.nodes16 += 1,
                node::NodeLayout::N48(_) => stats.nodes48 += 1,
                node::NodeLayout::N256(_) => stats.nodes256 += 1,
            }
            let mut prev_leaf: Option<LeafRef> = None;
            for (_, c) in n.children() {
                match c {
                    ChildRef::Leaf(l, _) => {
                        if prev_leaf == Some(l) {
                            stats.shared_leaf_slots += 1;
                        } else {
                            collect_stats(c, stats);
                        }
                        prev_leaf = Some(l);
                    }
                    ChildRef::Node(_) => {
                        prev_leaf = None;
                        collect_stats(c, stats);
                    }
                }
            }
        }
        ChildRef::Leaf(l, _) => {
            let leaf = l.get();
            match leaf.width() {
                LeafWidth::W8 => stats.leaves8 += 1,
                LeafWidth::W16 => stats.leaves16 += 1,
                LeafWidth::W32 => stats.leaves32 += 1,
                LeafWidth::W64 => stats.leaves64 += 1,
            }
            stats.elements += leaf.len();
        }
    }
}

/// Validates the subtree under `child`, returning its element count.
fn verify_child(child: ChildRef, checked: usize) -> Result<usize> {
    match child {
        ChildRef::Node(nref) => {
            let n = nref.get();
            let depth = n.depth as usize;
            if depth >= KEY_LEN || depth < checked {
                return Err(RamusError::Corruption("node depth out of range"));
            }
            if nref.ref_count() == 0 {
                return Err(RamusError::Corruption("node with zero refs"));
            }
            if n.child_count() == 0 {
                return Err(RamusError::Corruption("node without children"));
            }
            let mut total = 0usize;
            let mut prev_byte: Option<u8> = None;
            let mut prev_leaf: Option<(LeafRef, u16)> = None;
            let mut closed_leaves: Vec<LeafRef> = Vec::new();
            for (byte, c) in n.children() {
                if let Some(p) = prev_byte {
                    if byte <= p {
                        return Err(RamusError::Corruption("children out of byte order"));
                    }
                }
                prev_byte = Some(byte);
                match c {
                    ChildRef::Node(m) => {
                        let mn = m.get();
                        if mn.depth as usize <= depth {
                            return Err(RamusError::Corruption("child depth not below parent"));
                        }
                        if mn.prefix[depth] != byte {
                            return Err(RamusError::Corruption("child prefix byte mismatch"));
                        }
                        if let Some((pl, _)) = prev_leaf {
                            closed_leaves.push(pl);
                        }
                        total += verify_child(c, depth + 1)?;
                        prev_leaf = None;
                    }
                    ChildRef::Leaf(l, off) => {
                        let leaf = l.get();
                        if leaf.depth as usize != depth {
                            return Err(RamusError::Corruption("leaf depth mismatch"));
                        }
                        if (off as usize) >= leaf.len() {
                            return Err(RamusError::Corruption("slot offset out of bounds"));
                        }
                        if leaf.dispatch_byte_at(off as usize) != byte {
                            return Err(RamusError::Corruption("slot byte does not start its run"));
                        }
                        let seg_start = off as usize;
                        match prev_leaf {
                            Some((pl, poff)) if pl == l => {
                                if poff >= off {
                                    return Err(RamusError::Corruption(
                                        "shared leaf offsets not increasing",
                                    ));
                                }
                                // The previous segment already verified the
                                // leaf body; only count this segment's span.
                            }
                            other => {
                                // Slots of one leaf must be contiguous in
                                // byte order.
                                if closed_leaves.contains(&l) {
                                    return Err(RamusError::Corruption(
                                        "shared leaf slots not contiguous",
                                    ));
                                }
                                if let Some((pl, _)) = other {
                                    closed_leaves.push(pl);
                                }
                                verify_leaf_body(l)?;
                            }
                        }
                        // Segment length is counted via the next slot's
                        // offset or the leaf end.
                        total += segment_len(n, byte, l, seg_start);
                        prev_leaf = Some((l, off));
                    }
                }
            }
            Ok(total)
        }
        ChildRef::Leaf(l, off) => {
            if off != 0 {
                return Err(RamusError::Corruption("root leaf with nonzero offset"));
            }
            verify_leaf_body(l)?;
            Ok(l.get().len())
        }
    }
}

fn segment_len(n: &Node, byte: u8, leaf: LeafRef, start: usize) -> usize {
    let mut end = leaf.get().len();
    let mut take_next = false;
    for (b, c) in n.children() {
        if take_next {
            if let ChildRef::Leaf(l2, off2) = c {
                if l2 == leaf {
                    end = off2 as usize;
                }
            }
            break;
        }
        if b == byte {
            take_next = true;
        }
    }
    end - start
}

fn verify_leaf_body(l: LeafRef) -> Result<()> {
    let leaf = l.get();
    if l.ref_count() == 0 {
        return Err(RamusError::Corruption("leaf with zero refs"));
    }
    if leaf.is_empty() {
        return Err(RamusError::Corruption("empty leaf still linked"));
    }
    if leaf.width() != LeafWidth::for_depth(leaf.effective_depth()) {
        return Err(RamusError::Corruption("leaf width does not match depth"));
    }
    if leaf.single_byte && !leaf.single_run() {
        return Err(RamusError::Corruption("single-byte leaf spans runs"));
    }
    let mut prev: Option<u64> = None;
    for id in leaf.ids() {
        if let Some(p) = prev {
            if id <= p {
                return Err(RamusError::Corruption("leaf entries not strictly sorted"));
            }
        }
        prev = Some(id);
    }
    Ok(())
}
