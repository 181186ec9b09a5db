//! Deferred reclamation of superseded versions.
//!
//! When a COW commit finds a reader whose published timestamp predates the
//! commit, the replaced path cannot be freed yet: that reader may still be
//! traversing it. The old root parks here, tagged with its superseding
//! timestamp, until the reader watermark moves past it.

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::readers::ReaderRegistry;
use super::writers::Arena;
use crate::trie::{release_child, ChildRef};

struct GarbageEntry {
    superseded_at: u64,
    root: ChildRef,
}

/// Parking lot for superseded roots awaiting a safe reclamation point.
#[derive(Default)]
pub struct GarbageBin {
    entries: Mutex<Vec<GarbageEntry>>,
}

impl GarbageBin {
    /// Creates an empty bin.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn defer(&self, superseded_at: u64, root: ChildRef) {
        trace!(superseded_at, "deferring superseded root");
        self.entries.lock().push(GarbageEntry {
            superseded_at,
            root,
        });
    }

    /// Frees every deferred root no registered reader can still observe,
    /// returning how many were reclaimed.
    pub fn reclaim(&self, readers: &ReaderRegistry, arena: &mut Arena) -> usize {
        let watermark = readers.watermark();
        let ready: Vec<GarbageEntry> = {
            let mut entries = self.entries.lock();
            let mut kept = Vec::new();
            let mut ready = Vec::new();
            for entry in entries.drain(..) {
                let safe = watermark.map_or(true, |w| entry.superseded_at <= w);
                if safe {
                    ready.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            *entries = kept;
            ready
        };
        let count = ready.len();
        for entry in ready {
            release_child(entry.root, Some(arena));
        }
        if count > 0 {
            debug!(count, ?watermark, "reclaimed superseded roots");
        }
        count
    }

    /// Number of roots still parked.
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }

    /// Diagnostic snapshot.
    pub fn stats(&self) -> GarbageStats {
        let entries = self.entries.lock();
        GarbageStats {
            pending: entries.len(),
            oldest: entries.iter().map(|e| e.superseded_at).min(),
        }
    }
}

/// Summary of deferred-reclamation state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GarbageStats {
    /// Superseded roots not yet reclaimed.
    pub pending: usize,
    /// Oldest superseding timestamp still parked.
    pub oldest: Option<u64>,
}

impl Drop for GarbageBin {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().drain(..) {
            release_child(entry.root, None);
        }
    }
}
