//! Fixed-capacity circular log of scenario evaluations (§4.6). `Add` never
//! fails; `Last(n)` returns a consistent snapshot of the newest entries.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::evaluator::CandidateResult;

/// One evaluation record: which route was hit, which scenario (if any)
/// matched, and the per-candidate detail behind that decision.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub matched_id: String,
    pub candidates: Vec<CandidateResult>,
    pub rate_limited: bool,
}

/// Bounded circular log guarded by a reader-writer lock: `Add` takes the
/// write lock, `Last` the read lock, matching the concurrency discipline in
/// §5.
pub struct RingBuffer {
    capacity: usize,
    entries: RwLock<VecDeque<TraceEntry>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Total; overwrites the oldest entry once at capacity.
    pub fn add(&self, entry: TraceEntry) {
        let mut guard = self.entries.write();
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    /// Up to `n` newest entries, oldest first, i.e. in chronological order.
    pub fn last(&self, n: usize) -> Vec<TraceEntry> {
        let guard = self.entries.read();
        let take = n.min(guard.len());
        guard.iter().rev().take(take).rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
