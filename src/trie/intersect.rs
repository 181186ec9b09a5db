//! Structural set intersection.
//!
//! Two tries are matched by prefix: subtrees whose compressed prefixes
//! disagree are skipped wholesale, equal-depth nodes merge their children in
//! ascending byte order, and leaf segments merge element-wise. Count-only and
//! materializing variants share the control flow through a sink. The variant
//! against an external pre-sorted array narrows the array by binary search
//! instead of walking a second trie.

use smallvec::SmallVec;

use crate::types::ElemId;

use super::key::KEY_LEN;
use super::leaf::LeafRef;
use super::node::{ChildRef, Node, NodeRef};
use super::{search_from, AdjacencyTrie};

impl AdjacencyTrie {
    /// Number of elements present in both tries.
    pub fn intersect(&self, other: &AdjacencyTrie) -> usize {
        let mut sink = CountSink(0);
        intersect_roots(self.root(), other.root(), &mut sink);
        sink.0
    }

    /// Appends the ascending intersection of both tries to `out`.
    pub fn intersect_into(&self, other: &AdjacencyTrie, out: &mut Vec<ElemId>) {
        let mut sink = CollectSink(out);
        intersect_roots(self.root(), other.root(), &mut sink);
    }

    /// Number of elements also present in a strictly ascending slice.
    pub fn range_intersect(&self, sorted: &[ElemId]) -> usize {
        let mut sink = CountSink(0);
        if let Some(root) = self.root() {
            range_side(root_side(root), sorted, &mut sink);
        }
        sink.0
    }

    /// Appends the ascending intersection with a strictly ascending slice.
    pub fn range_intersect_into(&self, sorted: &[ElemId], out: &mut Vec<ElemId>) {
        let mut sink = CollectSink(out);
        if let Some(root) = self.root() {
            range_side(root_side(root), sorted, &mut sink);
        }
    }
}

trait IntersectSink {
    fn push(&mut self, id: u64);
}

struct CountSink(usize);

impl IntersectSink for CountSink {
    fn push(&mut self, _id: u64) {
        self.0 += 1;
    }
}

struct CollectSink<'a>(&'a mut Vec<ElemId>);

impl IntersectSink for CollectSink<'_> {
    fn push(&mut self, id: u64) {
        self.0.push(ElemId(id));
    }
}

/// One side of the structural merge: an internal subtree or a leaf segment.
#[derive(Copy, Clone)]
enum Side {
    Node(NodeRef),
    Seg(LeafRef, usize, usize),
}

fn root_side(root: ChildRef) -> Side {
    match root {
        ChildRef::Node(n) => Side::Node(n),
        ChildRef::Leaf(l, _) => Side::Seg(l, 0, l.get().len()),
    }
}

fn intersect_roots(a: Option<ChildRef>, b: Option<ChildRef>, sink: &mut impl IntersectSink) {
    if let (Some(a), Some(b)) = (a, b) {
        intersect_sides(root_side(a), root_side(b), sink);
    }
}

fn intersect_sides(a: Side, b: Side, sink: &mut impl IntersectSink) {
    match (a, b) {
        (Side::Seg(la, sa, ea), Side::Seg(lb, sb, eb)) => {
            merge_segments(la, sa, ea, lb, sb, eb, sink)
        }
        (Side::Seg(l, s, e), Side::Node(n)) | (Side::Node(n), Side::Seg(l, s, e)) => {
            // The bounded segment probes the subtree directly.
            let leaf = l.get();
            for i in s..e {
                let id = leaf.id_at(i);
                if search_from(Some(ChildRef::Node(n)), id).is_some() {
                    sink.push(id);
                }
            }
        }
        (Side::Node(na), Side::Node(nb)) => intersect_nodes(na, nb, sink),
    }
}

fn intersect_nodes(na: NodeRef, nb: NodeRef, sink: &mut impl IntersectSink) {
    let a = na.get();
    let b = nb.get();
    let da = a.depth as usize;
    let db = b.depth as usize;
    let shared = da.min(db);
    for i in 0..shared {
        if a.prefix[i] != b.prefix[i] {
            return;
        }
    }
    if da < db {
        // Descend the shallower trie toward the deeper one's prefix.
        if let Some(side) = side_of_child(a, b.prefix[da]) {
            intersect_sides(side, Side::Node(nb), sink);
        }
        return;
    }
    if db < da {
        if let Some(side) = side_of_child(b, a.prefix[db]) {
            intersect_sides(Side::Node(na), side, sink);
        }
        return;
    }
    // Equal depth: two-pointer walk over byte-ordered children.
    let left = child_sides(a);
    let right = child_sides(b);
    let mut i = 0;
    let mut j = 0;
    while i < left.len() && j < right.len() {
        let (ba, sa) = left[i];
        let (bb, sb) = right[j];
        if ba == bb {
            intersect_sides(sa, sb, sink);
            i += 1;
            j += 1;
        } else if ba < bb {
            i += 1;
        } else {
            j += 1;
        }
    }
}

fn merge_segments(
    la: LeafRef,
    mut sa: usize,
    ea: usize,
    lb: LeafRef,
    mut sb: usize,
    eb: usize,
    sink: &mut impl IntersectSink,
) {
    let a = la.get();
    let b = lb.get();
    while sa < ea && sb < eb {
        let ida = a.id_at(sa);
        let idb = b.id_at(sb);
        if ida == idb {
            sink.push(ida);
            sa += 1;
            sb += 1;
        } else if ida < idb {
            sa += 1;
        } else {
            sb += 1;
        }
    }
}

/// Byte-ordered (byte, side) view of a node's children, with leaf segments
/// bounded by the next slot into the same shared leaf.
fn child_sides(n: &Node) -> SmallVec<[(u8, Side); 16]> {
    let mut sides = SmallVec::new();
    let mut iter = n.children().peekable();
    while let Some((byte, child)) = iter.next() {
        let side = match child {
            ChildRef::Node(m) => Side::Node(m),
            ChildRef::Leaf(l, off) => {
                let end = match iter.peek() {
                    Some((_, ChildRef::Leaf(l2, off2))) if *l2 == l => *off2 as usize,
                    _ => l.get().len(),
                };
                Side::Seg(l, off as usize, end)
            }
        };
        sides.push((byte, side));
    }
    sides
}

fn side_of_child(n: &Node, byte: u8) -> Option<Side> {
    match n.find_child(byte)? {
        ChildRef::Node(m) => Some(Side::Node(m)),
        ChildRef::Leaf(l, off) => {
            let mut end = l.get().len();
            let mut past = false;
            for (b, child) in n.children() {
                if past {
                    if let ChildRef::Leaf(l2, off2) = child {
                        if l2 == l {
                            end = off2 as usize;
                        }
                    }
                    break;
                }
                if b == byte {
                    past = true;
                }
            }
            Some(Side::Seg(l, off as usize, end))
        }
    }
}

/// Intersection of a subtree with a strictly ascending id slice.
fn range_side(side: Side, sorted: &[ElemId], sink: &mut impl IntersectSink) {
    if sorted.is_empty() {
        return;
    }
    match side {
        Side::Seg(l, s, e) => {
            let leaf = l.get();
            if s >= e {
                return;
            }
            let lo = leaf.id_at(s);
            let hi = leaf.id_at(e - 1);
            let from = sorted.partition_point(|id| id.0 < lo);
            let to = sorted.partition_point(|id| id.0 <= hi);
            let sub = &sorted[from..to];
            let mut i = s;
            let mut j = 0;
            while i < e && j < sub.len() {
                let ida = leaf.id_at(i);
                let idb = sub[j].0;
                if ida == idb {
                    sink.push(ida);
                    i += 1;
                    j += 1;
                } else if ida < idb {
                    i += 1;
                } else {
                    j += 1;
                }
            }
        }
        Side::Node(nref) => {
            let n = nref.get();
            let (lo, hi) = prefix_bounds(&n.prefix, n.depth as usize);
            let from = sorted.partition_point(|id| id.0 < lo);
            let to = sorted.partition_point(|id| id.0 <= hi);
            let sub = &sorted[from..to];
            if sub.is_empty() {
                return;
            }
            for (_, side) in child_sides(n) {
                range_side(side, sub, sink);
            }
        }
    }
}

/// Smallest and largest id reachable below a prefix of `depth` bytes.
fn prefix_bounds(prefix: &[u8; KEY_LEN], depth: usize) -> (u64, u64) {
    let mut lo = [0u8; KEY_LEN];
    let mut hi = [0xFFu8; KEY_LEN];
    lo[..depth].copy_from_slice(&prefix[..depth]);
    hi[..depth].copy_from_slice(&prefix[..depth]);
    (u64::from_be_bytes(lo), u64::from_be_bytes(hi))
}
