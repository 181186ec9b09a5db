//! Copy-on-write mutation: the multi-version path.
//!
//! Every node and leaf from the root to the mutation point is copied before
//! modification; the original path stays intact for any reader that captured
//! the old root. Originals encountered along the way are recorded in the new
//! tree's pending-resource list so commit can free the replaced path (or
//! defer it behind the reader watermark) and abort can unwind reference
//! counts.

use tracing::debug;

use crate::epoch::{Arena, GarbageBin, ReaderRegistry};
use crate::error::{RamusError, Result};
use crate::types::ElemId;

use super::key::Key;
use super::leaf::LeafRef;
use super::mutate::{insert_descend, remove_descend};
use super::node::{ChildRef, NodeRef};
use super::{release_child, search_from, AdjacencyTrie, PendingResource, PendingTag};

/// Result of [`AdjacencyTrie::insert_element_copy`].
#[derive(Debug)]
pub struct CowInsert {
    /// Whether the id was new. `false` means no new version was produced.
    pub is_new: bool,
    /// The new version for the caller to install, when one was produced.
    pub tree: Option<AdjacencyTrie>,
}

/// Result of [`AdjacencyTrie::remove_element_copy`].
#[derive(Debug)]
pub struct CowRemove {
    /// Whether the element was present in the source version.
    pub removed: bool,
    /// Whether the removal dropped a slot, leaf, or node.
    pub structural_change: bool,
    /// The new version for the caller to install, when one was produced.
    pub tree: Option<AdjacencyTrie>,
}

impl AdjacencyTrie {
    /// Copy-on-write insert. The source version is left untouched; the
    /// returned tree shares every unchanged subtree with it.
    ///
    /// The caller installs the returned root, then finishes the transaction
    /// with [`AdjacencyTrie::handle_resources_copied`] (commit) or
    /// [`AdjacencyTrie::handle_resources_ref`] (abort).
    pub fn insert_element_copy(
        &self,
        id: ElemId,
        props: &[u64],
        arena: &mut Arena,
    ) -> Result<CowInsert> {
        let ppe = self.options().props_per_entry;
        if props.len() != ppe {
            return Err(RamusError::Invalid("property row length mismatch"));
        }
        if search_from(self.root(), id.0).is_some() {
            return Ok(CowInsert {
                is_new: false,
                tree: None,
            });
        }
        let cap = self.options().leaf_capacity;
        let key = Key::from_id(id.0);
        let mut pending: Vec<PendingResource> = Vec::new();
        let tree = match self.root() {
            None => {
                let leaf = arena.alloc_leaf(0, true, *key.bytes());
                unsafe { leaf.as_mut() }.push_id(id.0, props);
                AdjacencyTrie::from_parts(
                    Some(ChildRef::Leaf(leaf, 0)),
                    1,
                    self.options(),
                    pending,
                )
            }
            Some(ChildRef::Leaf(l, _)) => {
                let copy = copy_leaf(l, 1, arena);
                pending.push(PendingResource {
                    tag: PendingTag::LeafOwned,
                    child: ChildRef::Leaf(l, 0),
                });
                let mut tree = AdjacencyTrie::from_parts(
                    Some(ChildRef::Leaf(copy, 0)),
                    self.len(),
                    self.options(),
                    pending,
                );
                // Everything reachable from the copied root leaf is fresh, so
                // the single-writer path applies as-is.
                let inserted = tree.insert_element(id, props, arena)?;
                debug_assert!(inserted);
                tree
            }
            Some(ChildRef::Node(root)) => {
                let new_root =
                    cow_insert_node(root, 0, key, id.0, props, ppe, cap, arena, &mut pending)?;
                AdjacencyTrie::from_parts(Some(new_root), self.len() + 1, self.options(), pending)
            }
        };
        Ok(CowInsert {
            is_new: true,
            tree: Some(tree),
        })
    }

    /// Copy-on-write removal, symmetric to
    /// [`AdjacencyTrie::insert_element_copy`].
    pub fn remove_element_copy(&self, id: ElemId, arena: &mut Arena) -> Result<CowRemove> {
        if search_from(self.root(), id.0).is_none() {
            return Ok(CowRemove {
                removed: false,
                structural_change: false,
                tree: None,
            });
        }
        let ppe = self.options().props_per_entry;
        let key = Key::from_id(id.0);
        let mut pending: Vec<PendingResource> = Vec::new();
        let (new_root, structural) = match self.root() {
            None => unreachable!("membership pre-checked"),
            Some(ChildRef::Leaf(l, _)) => {
                let copy = copy_leaf(l, 1, arena);
                pending.push(PendingResource {
                    tag: PendingTag::LeafOwned,
                    child: ChildRef::Leaf(l, 0),
                });
                let idx = copy
                    .get()
                    .position(id.0)
                    .expect("pre-checked element present");
                unsafe { copy.as_mut() }.remove_at(idx, ppe);
                if copy.get().is_empty() {
                    if copy.dec_ref() == 1 {
                        arena.recycle_leaf(unsafe { copy.into_box() });
                    }
                    (None, true)
                } else {
                    (Some(ChildRef::Leaf(copy, 0)), false)
                }
            }
            Some(ChildRef::Node(root)) => {
                cow_remove_node(root, 0, key, ppe, arena, &mut pending)?
            }
        };
        let tree = AdjacencyTrie::from_parts(new_root, self.len() - 1, self.options(), pending);
        Ok(CowRemove {
            removed: true,
            structural_change: structural,
            tree: Some(tree),
        })
    }

    /// Commits a COW transaction: frees the replaced originals of the
    /// superseded version, deferring to the garbage bin while any reader's
    /// published watermark predates `commit_ts`.
    pub fn handle_resources_copied(
        &mut self,
        mut old: AdjacencyTrie,
        arena: &mut Arena,
        readers: &ReaderRegistry,
        garbage: &GarbageBin,
        commit_ts: u64,
    ) {
        let (copied, mounted, owned) = self.pending_counts();
        debug!(
            copied,
            mounted, owned, commit_ts, "committing copy-on-write transaction"
        );
        self.clear_pending();
        if let Some(root) = old.take_root() {
            match readers.watermark() {
                Some(watermark) if watermark < commit_ts => garbage.defer(commit_ts, root),
                _ => release_child(root, Some(arena)),
            }
        }
    }

    /// Aborts a COW transaction: the fresh copies are returned to the arena
    /// and every mounted-unchanged reference count is unwound. The source
    /// version is untouched.
    pub fn handle_resources_ref(mut self, arena: &mut Arena) {
        let (copied, mounted, owned) = self.pending_counts();
        debug!(copied, mounted, owned, "aborting copy-on-write transaction");
        self.clear_pending();
        if let Some(root) = self.take_root() {
            release_child(root, Some(arena));
        }
    }

    fn pending_counts(&self) -> (usize, usize, usize) {
        let mut copied = 0;
        let mut mounted = 0;
        let mut owned = 0;
        for entry in self.pending() {
            match entry.tag {
                PendingTag::Copied => copied += 1,
                PendingTag::MountedShared => mounted += 1,
                PendingTag::LeafOwned => owned += 1,
            }
        }
        (copied, mounted, owned)
    }
}

/// Which original child of a node being copied must *not* be mounted,
/// because the copy will replace it.
#[derive(Copy, Clone)]
enum Skip {
    None,
    Byte(u8),
    Leaf(LeafRef),
}

/// Copies a node, raising the reference count of every adopted child and
/// recording it as mounted-unchanged.
fn copy_node_mounting(
    nref: NodeRef,
    skip: Skip,
    arena: &mut Arena,
    pending: &mut Vec<PendingResource>,
) -> NodeRef {
    let copy = nref.get().clone_shallow();
    for (byte, child) in nref.get().children() {
        let skipped = match skip {
            Skip::None => false,
            Skip::Byte(b) => byte == b,
            Skip::Leaf(l) => matches!(child, ChildRef::Leaf(cl, _) if cl == l),
        };
        if !skipped {
            child.add_ref();
            pending.push(PendingResource {
                tag: PendingTag::MountedShared,
                child,
            });
        }
    }
    arena.alloc_node(copy)
}

/// Copies a leaf body; the copy starts with `refs` claims.
fn copy_leaf(l: LeafRef, refs: usize, arena: &mut Arena) -> LeafRef {
    let src = l.get();
    let copy = arena.alloc_leaf(src.depth as usize, src.single_byte, src.prefix);
    {
        let body = unsafe { copy.as_mut() };
        for i in 0..src.len() {
            body.push_id(src.id_at(i), &[]);
        }
        body.props.extend_from_slice(&src.props);
    }
    for _ in 1..refs {
        copy.add_ref();
    }
    copy
}

/// COW insert below an internal node whose prefix has not been checked past
/// `checked`. Returns the replacement child for the parent slot.
#[allow(clippy::too_many_arguments)]
fn cow_insert_node(
    nref: NodeRef,
    checked: usize,
    key: Key,
    id: u64,
    props: &[u64],
    ppe: usize,
    cap: usize,
    arena: &mut Arena,
    pending: &mut Vec<PendingResource>,
) -> Result<ChildRef> {
    let depth = nref.get().depth as usize;
    let mismatch = key.mismatch(&nref.get().prefix, checked, depth);
    if mismatch < depth {
        // Branch above the node: the whole original subtree is adopted
        // unchanged by the new version.
        nref.add_ref();
        pending.push(PendingResource {
            tag: PendingTag::MountedShared,
            child: ChildRef::Node(nref),
        });
        let mut branch = super::Node::new4(mismatch, *key.bytes());
        branch.add_child(nref.get().prefix[mismatch], ChildRef::Node(nref));
        let single = arena.alloc_leaf(mismatch, true, *key.bytes());
        unsafe { single.as_mut() }.push_id(id, props);
        branch.add_child(key.byte(mismatch), ChildRef::Leaf(single, 0));
        return Ok(ChildRef::Node(arena.alloc_node(branch)));
    }

    let byte = key.byte(depth);
    match nref.get().find_child(byte) {
        Some(ChildRef::Node(child)) => {
            let copy = copy_node_mounting(nref, Skip::Byte(byte), arena, pending);
            pending.push(PendingResource {
                tag: PendingTag::Copied,
                child: ChildRef::Node(nref),
            });
            let new_child =
                cow_insert_node(child, depth + 1, key, id, props, ppe, cap, arena, pending)?;
            unsafe { copy.as_mut() }.set_child(byte, new_child);
            Ok(ChildRef::Node(copy))
        }
        other => {
            // Leaf-copy lookup: resolve the target leaf in the original so
            // the copy can retarget every slot bound to it.
            let target = match other {
                Some(ChildRef::Leaf(l, _)) => Some(l),
                None => nref.get().nearest_leaf(byte).map(|(_, l, _)| l),
                Some(ChildRef::Node(_)) => unreachable!(),
            };
            let copy = match target {
                Some(l) => {
                    let copy = copy_node_mounting(nref, Skip::Leaf(l), arena, pending);
                    let slots = nref.get().leaf_slots(l);
                    let leaf_copy = copy_leaf(l, slots.len(), arena);
                    for &(slot_byte, off) in &slots {
                        unsafe { copy.as_mut() }
                            .set_child(slot_byte, ChildRef::Leaf(leaf_copy, off));
                    }
                    pending.push(PendingResource {
                        tag: PendingTag::LeafOwned,
                        child: ChildRef::Leaf(l, 0),
                    });
                    copy
                }
                None => copy_node_mounting(nref, Skip::None, arena, pending),
            };
            pending.push(PendingResource {
                tag: PendingTag::Copied,
                child: ChildRef::Node(nref),
            });
            // The dispatch zone of the copy now holds only fresh objects;
            // the single-writer insert logic finishes the job.
            let (inserted, patch) = insert_descend(copy, checked, key, id, props, ppe, cap, arena)?;
            debug_assert!(inserted && patch.is_none());
            Ok(ChildRef::Node(copy))
        }
    }
}

/// COW removal below an internal node. Returns the replacement child (or
/// `None` when the subtree vanished) and whether the change was structural.
fn cow_remove_node(
    nref: NodeRef,
    checked: usize,
    key: Key,
    ppe: usize,
    arena: &mut Arena,
    pending: &mut Vec<PendingResource>,
) -> Result<(Option<ChildRef>, bool)> {
    let depth = nref.get().depth as usize;
    let byte = key.byte(depth);
    match nref.get().find_child(byte) {
        Some(ChildRef::Node(child)) => {
            let copy = copy_node_mounting(nref, Skip::Byte(byte), arena, pending);
            pending.push(PendingResource {
                tag: PendingTag::Copied,
                child: ChildRef::Node(nref),
            });
            let (sub, structural) = cow_remove_node(child, depth + 1, key, ppe, arena, pending)?;
            match sub {
                Some(new_child) => {
                    unsafe { copy.as_mut() }.set_child(byte, new_child);
                    Ok((Some(ChildRef::Node(copy)), structural))
                }
                None => {
                    unsafe { copy.as_mut() }.remove_child(byte);
                    if copy.get().child_count() == 0 {
                        if copy.dec_ref() == 1 {
                            arena.recycle_node(unsafe { copy.into_box() });
                        }
                        Ok((None, true))
                    } else {
                        Ok((Some(ChildRef::Node(copy)), true))
                    }
                }
            }
        }
        Some(ChildRef::Leaf(l, _)) => {
            let copy = copy_node_mounting(nref, Skip::Leaf(l), arena, pending);
            let slots = nref.get().leaf_slots(l);
            let leaf_copy = copy_leaf(l, slots.len(), arena);
            for &(slot_byte, off) in &slots {
                unsafe { copy.as_mut() }.set_child(slot_byte, ChildRef::Leaf(leaf_copy, off));
            }
            pending.push(PendingResource {
                tag: PendingTag::LeafOwned,
                child: ChildRef::Leaf(l, 0),
            });
            pending.push(PendingResource {
                tag: PendingTag::Copied,
                child: ChildRef::Node(nref),
            });
            let (removed, structural, emptied) = remove_descend(copy, checked, key, ppe, arena);
            debug_assert!(removed);
            if emptied {
                Ok((None, true))
            } else {
                Ok((Some(ChildRef::Node(copy)), structural))
            }
        }
        None => Err(RamusError::Corruption("pre-checked element lost its path")),
    }
}
