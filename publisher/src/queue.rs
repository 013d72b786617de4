//! FIFO queue of batches awaiting delivery
//!
//! Batches leave the queue only when sent, dropped by policy, or evicted (oldest
//! first) to keep the queue under its bound.

use crate::batch::Batch;
use std::collections::VecDeque;

/// Outcome of trimming the queue to its bound
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eviction {
    /// Batches removed from the head
    pub batches: usize,
    /// Samples carried by those batches
    pub samples: usize,
}

impl Eviction {
    pub fn is_empty(&self) -> bool {
        self.batches == 0
    }
}

/// Ordered batches, oldest at the front
#[derive(Debug, Default)]
pub struct PendingQueue {
    batches: VecDeque<Batch>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append batches at the tail, preserving their order
    pub fn extend(&mut self, batches: impl IntoIterator<Item = Batch>) {
        self.batches.extend(batches);
    }

    /// Detach the whole queue, leaving it empty
    pub fn take(&mut self) -> VecDeque<Batch> {
        std::mem::take(&mut self.batches)
    }

    /// Put `older` back ahead of whatever is currently queued
    pub fn requeue_front(&mut self, mut older: VecDeque<Batch>) {
        if older.is_empty() {
            return;
        }
        older.append(&mut self.batches);
        self.batches = older;
    }

    /// Evict the oldest batches until, together with `ahead` batches held
    /// elsewhere in front of this queue, at most `max_len` remain.
    ///
    /// A bound of zero means unbounded.
    pub fn enforce_bound(&mut self, max_len: usize, ahead: usize) -> Eviction {
        let allowed = max_len.saturating_sub(ahead);
        if max_len == 0 || self.batches.len() <= allowed {
            return Eviction::default();
        }

        let excess = self.batches.len() - allowed;
        let samples = self.batches.drain(..excess).map(|b| b.len()).sum();
        Eviction {
            batches: excess,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total samples across queued batches
    pub fn sample_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter()
    }
}
