//! Reader registration slots.
//!
//! A fixed table of single-word slots, each packing {lock bit, published bit,
//! timestamp}. Registration spin-scans for a free slot and claims it with a
//! compare-and-swap on the lock bit; the slot is then "acquiring" until the
//! reader publishes its snapshot timestamp, which also releases the lock bit.
//! The published timestamp stays in the slot until explicit unregister (guard
//! drop) clears it. No reader ever blocks on a condition variable; contention
//! only arises while every slot is momentarily occupied.

use std::hint;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

/// Number of reader slots.
pub const MAX_READERS: usize = 64;

const LOCK_BIT: u64 = 1 << 63;
const PUBLISHED_BIT: u64 = 1 << 62;
const TS_MASK: u64 = PUBLISHED_BIT - 1;

/// Registry of active reader watermark timestamps.
pub struct ReaderRegistry {
    slots: [AtomicU64; MAX_READERS],
}

impl ReaderRegistry {
    /// Creates a registry with every slot free.
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Claims a free slot, spinning while the table is momentarily full.
    pub fn register(&self) -> ReaderSlot<'_> {
        loop {
            if let Some(slot) = self.try_register() {
                return slot;
            }
            hint::spin_loop();
        }
    }

    /// Claims a free slot without spinning, if one is available right now.
    pub fn try_register(&self) -> Option<ReaderSlot<'_>> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .compare_exchange(0, LOCK_BIT, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                trace!(slot = idx, "reader slot acquired");
                return Some(ReaderSlot {
                    registry: self,
                    idx,
                });
            }
        }
        None
    }

    /// Minimum published timestamp among occupied slots.
    ///
    /// Slots still acquiring do not gate reclamation: the timestamp they will
    /// publish is sampled after acquisition and cannot predate a commit that
    /// already passed the watermark check.
    pub fn watermark(&self) -> Option<u64> {
        let mut min: Option<u64> = None;
        for slot in &self.slots {
            let word = slot.load(Ordering::Acquire);
            if word & PUBLISHED_BIT != 0 {
                let ts = word & TS_MASK;
                min = Some(min.map_or(ts, |m| m.min(ts)));
            }
        }
        min
    }

    /// Occupancy snapshot for diagnostics.
    pub fn snapshot(&self) -> ReaderTableSnapshot {
        let mut active = 0;
        let mut published = 0;
        for slot in &self.slots {
            let word = slot.load(Ordering::Acquire);
            if word != 0 {
                active += 1;
            }
            if word & PUBLISHED_BIT != 0 {
                published += 1;
            }
        }
        ReaderTableSnapshot {
            active,
            published,
            watermark: self.watermark(),
        }
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of reader slot occupancy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReaderTableSnapshot {
    /// Slots claimed, published or not.
    pub active: usize,
    /// Slots with a published timestamp.
    pub published: usize,
    /// Minimum published timestamp, if any.
    pub watermark: Option<u64>,
}

/// A claimed slot that has not published its timestamp yet.
pub struct ReaderSlot<'a> {
    registry: &'a ReaderRegistry,
    idx: usize,
}

impl<'a> ReaderSlot<'a> {
    /// Publishes the snapshot timestamp, releasing the lock bit. The slot
    /// stays occupied until the returned guard is dropped.
    pub fn publish(self, timestamp: u64) -> ReaderGuard<'a> {
        debug_assert_eq!(timestamp & !TS_MASK, 0, "timestamp overflows slot word");
        self.registry.slots[self.idx]
            .store(PUBLISHED_BIT | (timestamp & TS_MASK), Ordering::Release);
        let guard = ReaderGuard {
            registry: self.registry,
            idx: self.idx,
            timestamp,
        };
        mem::forget(self);
        guard
    }
}

impl Drop for ReaderSlot<'_> {
    fn drop(&mut self) {
        // Abandoned before publishing.
        self.registry.slots[self.idx].store(0, Ordering::Release);
    }
}

/// A published reader registration. Snapshots taken under this guard stay
/// valid until it drops.
pub struct ReaderGuard<'a> {
    registry: &'a ReaderRegistry,
    idx: usize,
    timestamp: u64,
}

impl ReaderGuard<'_> {
    /// The timestamp this reader published.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        trace!(slot = self.idx, "reader slot released");
        self.registry.slots[self.idx].store(0, Ordering::Release);
    }
}
