use std::collections::HashSet;

use crate::clock::TimeMs;
use crate::event::{CatchUp, EventCallback, EventKind, EventPriority, ExceptionPolicy};
use crate::handle::EventHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventStatus {
    Alive,
    Cancelled,
}

/// Slot contents for one scheduled event.
pub(crate) struct EventRecord {
    pub kind: EventKind,
    pub interval_ms: TimeMs,
    pub policy: ExceptionPolicy,
    pub priority: EventPriority,
    pub catchup: CatchUp,
    pub status: EventStatus,
    /// Absolute virtual time of the next firing.
    pub fire_at: TimeMs,
    /// Taken out of the slot for the duration of the event's own dispatch.
    pub callback: Option<EventCallback>,
}

struct EventSlot {
    generation: u32,
    record: Option<EventRecord>,
}

/// Stable-indexed event storage: records, per-slot generations, and the
/// free list of recyclable slots.
///
/// Generations only ever move forward. Whenever a slot leaves the live set
/// (a one-shot fires, a cancellation is harvested, a clear lands) its
/// generation is bumped, so every handle issued before that point stops
/// validating.
pub(crate) struct EventSlab {
    slots: Vec<EventSlot>,
    free: Vec<u32>,
    alive: usize,
}

impl EventSlab {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            alive: 0,
        }
    }

    /// Number of records currently `Alive`.
    #[inline]
    pub fn alive(&self) -> usize {
        self.alive
    }

    /// Installs `record` in a recycled or fresh slot.
    ///
    /// The issued handle carries the slot generation plus `generation_offset`;
    /// the offset anticipates a deferred clear that will bump every slot
    /// before the handle is next used.
    pub fn allocate(&mut self, record: EventRecord, generation_offset: u32) -> EventHandle {
        debug_assert_eq!(record.status, EventStatus::Alive);
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                debug_assert!(slot.record.is_none(), "free-listed slot still occupied");
                slot.record = Some(record);
                index
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("event slab exhausted u32 indices");
                self.slots.push(EventSlot {
                    generation: 0,
                    record: Some(record),
                });
                index
            }
        };
        self.alive += 1;
        let generation = self.slots[index as usize]
            .generation
            .wrapping_add(generation_offset);
        EventHandle::new(index, generation)
    }

    /// The record addressed by `handle`, if the handle still validates.
    pub fn get(&self, handle: EventHandle) -> Option<&EventRecord> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn get_mut(&mut self, handle: EventHandle) -> Option<&mut EventRecord> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.record.as_mut()
    }

    /// Record access by bare index, bypassing the generation check.
    ///
    /// Only sound while the slot is pinned by an in-flight dispatch: nothing
    /// may recycle a slot whose callback is running.
    pub fn record_at_mut(&mut self, index: u32) -> Option<&mut EventRecord> {
        self.slots.get_mut(index as usize)?.record.as_mut()
    }

    #[inline]
    pub fn generation(&self, index: u32) -> u32 {
        self.slots[index as usize].generation
    }

    /// Invalidates every previously issued handle for `index`.
    pub fn bump_generation(&mut self, index: u32) -> u32 {
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.generation
    }

    /// Marks the record `Cancelled`. Returns false for stale handles and
    /// records that are already cancelled.
    pub fn mark_cancelled(&mut self, handle: EventHandle) -> bool {
        match self.get_mut(handle) {
            Some(record) if record.status == EventStatus::Alive => {
                record.status = EventStatus::Cancelled;
                self.alive -= 1;
                true
            }
            _ => false,
        }
    }

    /// Cancels whatever event occupies `index`, stale or not.
    ///
    /// Used by the `Cancel` exception policy, which must reach the fired
    /// event even after its callback retargeted itself to a new generation.
    pub fn mark_cancelled_at(&mut self, index: u32) -> bool {
        match self.record_at_mut(index) {
            Some(record) if record.status == EventStatus::Alive => {
                record.status = EventStatus::Cancelled;
                self.alive -= 1;
                true
            }
            _ => false,
        }
    }

    /// Empties the slot, bumps its generation, and returns it to the free
    /// list. Returns the status the record held.
    pub fn harvest(&mut self, index: u32) -> Option<EventStatus> {
        let slot = &mut self.slots[index as usize];
        let record = slot.record.take()?;
        if record.status == EventStatus::Alive {
            self.alive -= 1;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(record.status)
    }

    /// Drops every record except those in `retained`, bumps every slot
    /// generation by `generation_bump`, and rebuilds the free list.
    ///
    /// The retained slots are the ones reserved by schedules journaled after
    /// a deferred clear; the bump re-synchronizes their offset handles.
    pub fn clear_retaining(&mut self, generation_bump: u32, retained: &HashSet<u32>) {
        self.free.clear();
        self.alive = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let index = i as u32;
            slot.generation = slot.generation.wrapping_add(generation_bump);
            if retained.contains(&index) {
                if slot
                    .record
                    .as_ref()
                    .is_some_and(|record| record.status == EventStatus::Alive)
                {
                    self.alive += 1;
                }
            } else {
                slot.record = None;
                self.free.push(index);
            }
        }
    }
}
