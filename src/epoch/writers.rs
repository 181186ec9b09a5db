//! Writer arenas.
//!
//! Each in-flight writer claims one arena slot: a bundle of free-lists, one
//! per node fanout tier and leaf width, recycled across the transaction
//! without touching a shared allocator lock. Registration spin-scans the
//! fixed slot table with `try_lock`; the slot is exclusively owned until the
//! guard drops, which drains the lists back to the underlying allocator.

use std::hint;
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::trie::{Leaf, LeafRef, LeafWidth, Node, NodeRef, KEY_LEN};

/// Number of writer arena slots.
pub const MAX_WRITER_ARENAS: usize = 16;

/// Upper bound kept per free-list; overflow returns to the allocator.
const MAX_POOLED: usize = 128;

/// Per-writer free-lists of reusable nodes and leaves.
#[derive(Default)]
pub struct Arena {
    nodes4: Vec<Box<Node>>,
    nodes16: Vec<Box<Node>>,
    nodes48: Vec<Box<Node>>,
    nodes256: Vec<Box<Node>>,
    leaves8: Vec<Box<Leaf>>,
    leaves16: Vec<Box<Leaf>>,
    leaves32: Vec<Box<Leaf>>,
    leaves64: Vec<Box<Leaf>>,
}

impl Arena {
    /// Creates an arena with empty free-lists.
    ///
    /// A standalone arena works for single-threaded use; concurrent writers
    /// should claim one through [`WriterRegistry::register`] instead.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total objects currently pooled.
    pub fn pooled(&self) -> usize {
        self.nodes4.len()
            + self.nodes16.len()
            + self.nodes48.len()
            + self.nodes256.len()
            + self.leaves8.len()
            + self.leaves16.len()
            + self.leaves32.len()
            + self.leaves64.len()
    }

    /// Returns every pooled object to the allocator.
    pub fn drain(&mut self) {
        self.nodes4.clear();
        self.nodes16.clear();
        self.nodes48.clear();
        self.nodes256.clear();
        self.leaves8.clear();
        self.leaves16.clear();
        self.leaves32.clear();
        self.leaves64.clear();
    }

    fn node_list(&mut self, capacity: usize) -> &mut Vec<Box<Node>> {
        match capacity {
            4 => &mut self.nodes4,
            16 => &mut self.nodes16,
            48 => &mut self.nodes48,
            _ => &mut self.nodes256,
        }
    }

    fn leaf_list(&mut self, width: LeafWidth) -> &mut Vec<Box<Leaf>> {
        match width {
            LeafWidth::W8 => &mut self.leaves8,
            LeafWidth::W16 => &mut self.leaves16,
            LeafWidth::W32 => &mut self.leaves32,
            LeafWidth::W64 => &mut self.leaves64,
        }
    }

    pub(crate) fn alloc_node(&mut self, node: Node) -> NodeRef {
        match self.node_list(node.capacity()).pop() {
            Some(mut boxed) => {
                *boxed = node;
                NodeRef::alloc(boxed)
            }
            None => NodeRef::alloc(Box::new(node)),
        }
    }

    pub(crate) fn recycle_node(&mut self, boxed: Box<Node>) {
        let list = self.node_list(boxed.capacity());
        if list.len() < MAX_POOLED {
            list.push(boxed);
        }
    }

    pub(crate) fn alloc_leaf(
        &mut self,
        depth: usize,
        single_byte: bool,
        prefix: [u8; KEY_LEN],
    ) -> LeafRef {
        let width = LeafWidth::for_depth(depth + single_byte as usize);
        match self.leaf_list(width).pop() {
            Some(mut boxed) => {
                boxed.reset(depth, single_byte, prefix);
                LeafRef::alloc(boxed)
            }
            None => LeafRef::alloc(Box::new(Leaf::new(depth, single_byte, prefix))),
        }
    }

    pub(crate) fn recycle_leaf(&mut self, mut boxed: Box<Leaf>) {
        boxed.entries.clear();
        boxed.props.clear();
        let width = boxed.width();
        let list = self.leaf_list(width);
        if list.len() < MAX_POOLED {
            list.push(boxed);
        }
    }
}

/// Registry of writer arena slots.
pub struct WriterRegistry {
    slots: [Mutex<Arena>; MAX_WRITER_ARENAS],
}

impl WriterRegistry {
    /// Creates a registry with every arena slot free.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(Arena::new())),
        }
    }

    /// Claims an arena slot, spinning while every slot is held.
    pub fn register(&self) -> ArenaGuard<'_> {
        loop {
            if let Some(guard) = self.try_register() {
                return guard;
            }
            hint::spin_loop();
        }
    }

    /// Claims an arena slot without spinning, if one is free right now.
    pub fn try_register(&self) -> Option<ArenaGuard<'_>> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(mut guard) = slot.try_lock() {
                // Re-initialize: a crashed or sloppy previous owner must not
                // leak pooled objects into this transaction.
                guard.drain();
                trace!(slot = idx, "writer arena acquired");
                return Some(ArenaGuard { guard, idx });
            }
        }
        None
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive ownership of one arena slot for the duration of a transaction.
pub struct ArenaGuard<'a> {
    guard: MutexGuard<'a, Arena>,
    idx: usize,
}

impl ArenaGuard<'_> {
    /// Index of the owned slot.
    pub fn slot(&self) -> usize {
        self.idx
    }
}

impl Deref for ArenaGuard<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        &self.guard
    }
}

impl DerefMut for ArenaGuard<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        &mut self.guard
    }
}

impl Drop for ArenaGuard<'_> {
    fn drop(&mut self) {
        trace!(slot = self.idx, pooled = self.guard.pooled(), "writer arena released");
        self.guard.drain();
    }
}
