use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::clock::TimeMs;
use crate::event::EventPriority;
use crate::handle::EventHandle;

/// One heap entry. The ordering key is snapshotted at push time; an entry
/// whose handle generation no longer matches its slot is stale and gets
/// filtered lazily when it reaches the top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub fire_at: TimeMs,
    pub priority: EventPriority,
    pub handle: EventHandle,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap yields the earliest entry first:
        // time, then priority, then slot index as the stable tie-break.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.handle.index().cmp(&self.handle.index()))
            .then_with(|| other.handle.generation().cmp(&self.handle.generation()))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending firings.
#[derive(Default)]
pub(crate) struct DispatchQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    pub fn peek(&self) -> Option<QueueEntry> {
        self.heap.peek().copied()
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Empties the heap, returning the entries in arbitrary order.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        std::mem::take(&mut self.heap).into_vec()
    }

    /// Replaces the heap contents wholesale, for the bulk rebuild.
    pub fn replace(&mut self, entries: Vec<QueueEntry>) {
        self.heap = BinaryHeap::from(entries);
    }
}
