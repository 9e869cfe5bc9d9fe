use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::clock::{TimeMs, VirtualClock};
use crate::error::{Result, SchedulerError};
use crate::event::{CatchUp, EventDesc, EventKind, EventPriority, ExceptionPolicy};
use crate::handle::EventHandle;
use crate::queue::{DispatchQueue, QueueEntry};
use crate::slab::{EventRecord, EventSlab, EventStatus};

/// A mutation recorded during a dispatch window, applied when it closes.
enum DeferredOp {
    /// Heap push for an event whose record was installed mid-window.
    Schedule { handle: EventHandle },
    /// Heap push for a retargeted event; its generation bump already landed.
    Requeue { handle: EventHandle },
    /// Structural clear. Always the first entry: recording one discards
    /// everything journaled before it.
    Clear,
}

/// A deterministic one-shot/repeating event scheduler driven by a virtual
/// clock.
///
/// The host delivers time explicitly through [`tick`](Self::tick); the
/// scheduler never consults wall time. Within one tick, due events fire in
/// strict `(fire time, priority, slot index)` order. Callbacks may re-enter
/// any operation except `tick`/`run` themselves; mutations that would
/// disturb the live dispatch are journaled and applied when the window
/// closes, so an event scheduled from inside a callback never fires before
/// the next tick.
///
/// Handles are generation-tagged: once an event retires, every handle to it
/// permanently stops validating, even after its slot is recycled.
///
/// All operations are single-threaded; the scheduler is not `Sync` and the
/// host serializes calls.
pub struct EventScheduler {
    clock: VirtualClock,
    slab: EventSlab,
    queue: DispatchQueue,
    journal: Vec<DeferredOp>,
    /// True for the duration of one `tick`/`run` call and its callbacks.
    ticking: bool,
    /// Clears recorded during the current window; offsets the generations of
    /// handles issued after them so those handles survive the flush.
    pending_clear: u32,
    paused: bool,
    paused_ms: TimeMs,
    fire_count: u64,
    /// Upper bound on heap entries that lazy filtering will discard: stale
    /// entries stranded by generation bumps plus unharvested cancellations.
    /// The bulk rebuild zeroes it.
    garbage: usize,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self {
            clock: VirtualClock::new(),
            slab: EventSlab::new(),
            queue: DispatchQueue::new(),
            journal: Vec::new(),
            ticking: false,
            pending_clear: 0,
            paused: false,
            paused_ms: 0,
            fire_count: 0,
            garbage: 0,
        }
    }

    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> TimeMs {
        self.clock.now_ms()
    }

    /// Number of live (scheduled, not yet retired or cancelled) events.
    #[inline]
    pub fn size(&self) -> usize {
        self.slab.alive()
    }

    /// Total callbacks dispatched since creation or the last out-of-window
    /// [`clear`](Self::clear).
    #[inline]
    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// Heap entries currently held, live and garbage alike. Diagnostic; the
    /// bulk rebuild keeps this bounded by `2 * size() + 1`.
    #[inline]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Schedules an event to first fire `delay_ms` from now.
    ///
    /// # Panics
    ///
    /// Panics if `delay_ms` is negative, or if the descriptor is repeating
    /// with a non-positive interval.
    pub fn schedule_after(&mut self, delay_ms: TimeMs, desc: EventDesc) -> EventHandle {
        assert!(delay_ms >= 0, "schedule_after: negative delay {delay_ms}");
        let fire_at = self
            .clock
            .now_ms()
            .checked_add(delay_ms)
            .expect("event fire time overflowed TimeMs");
        self.insert(fire_at, desc)
    }

    /// Schedules an event to first fire at the absolute virtual time `at_ms`.
    ///
    /// # Panics
    ///
    /// Panics if `at_ms` is in the past, or if the descriptor is repeating
    /// with a non-positive interval.
    pub fn schedule_at(&mut self, at_ms: TimeMs, desc: EventDesc) -> EventHandle {
        assert!(
            at_ms >= self.clock.now_ms(),
            "schedule_at: {at_ms} is before the current time {}",
            self.clock.now_ms()
        );
        self.insert(at_ms, desc)
    }

    fn insert(&mut self, fire_at: TimeMs, desc: EventDesc) -> EventHandle {
        if desc.kind == EventKind::Repeat {
            assert!(
                desc.interval_ms > 0,
                "repeating event requires a positive interval, got {}",
                desc.interval_ms
            );
        }
        let priority = desc.priority;
        let record = EventRecord {
            kind: desc.kind,
            interval_ms: desc.interval_ms,
            policy: desc.policy,
            priority,
            catchup: desc.catchup,
            status: EventStatus::Alive,
            fire_at,
            callback: Some(desc.callback),
        };
        let handle = self.slab.allocate(record, self.pending_clear);
        if self.ticking {
            // No heap entry until the window closes: the event must not fire
            // within the pass that created it.
            self.journal.push(DeferredOp::Schedule { handle });
            trace!(index = handle.index(), fire_at, "schedule deferred");
        } else {
            self.queue.push(QueueEntry {
                fire_at,
                priority,
                handle,
            });
        }
        handle
    }

    /// Cancels the event, if the handle still addresses a live one.
    ///
    /// Returns whether the event was alive. Idempotent; silently ignores
    /// stale, invalid, and already-cancelled handles.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        if !self.slab.mark_cancelled(handle) {
            return false;
        }
        trace!(index = handle.index(), "cancelled");
        self.garbage += 1;
        self.maybe_rebuild();
        true
    }

    /// Whether the handle still addresses a live event.
    pub fn is_alive(&self, handle: EventHandle) -> bool {
        self.slab
            .get(handle)
            .is_some_and(|record| record.status == EventStatus::Alive)
    }

    /// The next event to fire and its fire time, after discarding any stale
    /// or cancelled entries from the top of the heap.
    pub fn peek(&mut self) -> Option<(EventHandle, TimeMs)> {
        self.settle_top()
            .map(|entry| (entry.handle, entry.fire_at))
    }

    /// Advances the virtual clock by `delta_ms` and fires every event that
    /// becomes due, in `(fire time, priority, slot index)` order.
    ///
    /// `tick(0)` is meaningful: it fires events already due without moving
    /// the clock — in particular events scheduled during the previous tick.
    /// While paused, the delta accumulates instead (see [`pause`](Self::pause)).
    ///
    /// # Errors
    ///
    /// Returns the callback's error if an event with
    /// [`ExceptionPolicy::Rethrow`] fails. The failed event's bookkeeping and
    /// the journaled mutations are applied before the error surfaces, so the
    /// scheduler remains consistent and ticking may continue.
    ///
    /// # Panics
    ///
    /// Panics if `delta_ms` is negative or if called from inside a callback.
    pub fn tick(&mut self, delta_ms: TimeMs) -> Result<()> {
        assert!(delta_ms >= 0, "tick: negative delta {delta_ms}");
        assert!(!self.ticking, "tick re-entered from inside a dispatch window");
        if self.paused {
            self.paused_ms = self
                .paused_ms
                .checked_add(delta_ms)
                .expect("paused accumulator overflowed TimeMs");
            return Ok(());
        }
        self.clock.advance(delta_ms);
        self.dispatch_window(false)
    }

    /// Advances the clock to the absolute time `at_ms`, firing due events.
    /// Times at or before the current time dispatch a `tick(0)`.
    pub fn tick_until(&mut self, at_ms: TimeMs) -> Result<()> {
        let delta_ms = (at_ms - self.clock.now_ms()).max(0);
        self.tick(delta_ms)
    }

    /// Fires events until the heap drains, advancing the clock to each
    /// event's fire time.
    ///
    /// A live repeating event re-queues itself forever, so `run` only
    /// returns once every remaining event is one-shot or cancelled. Events
    /// scheduled from inside callbacks are journaled and do not fire within
    /// this call. No-op while paused.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a callback.
    pub fn run(&mut self) -> Result<()> {
        assert!(!self.ticking, "run re-entered from inside a dispatch window");
        if self.paused {
            return Ok(());
        }
        self.dispatch_window(true)
    }

    /// Empties the scheduler: cancels every event, resets the clock, the
    /// fire counter, and the pause state.
    ///
    /// From inside a callback the clear is journaled: it lands when the
    /// dispatch window closes, it supersedes mutations journaled before it,
    /// and events scheduled *after* it in the same window survive. A
    /// journaled clear does not reset the clock or the fire counter —
    /// rewinding time mid-window would corrupt the fire times of those
    /// surviving events.
    pub fn clear(&mut self) {
        if self.ticking {
            self.journal.clear();
            self.journal.push(DeferredOp::Clear);
            self.pending_clear += 1;
            debug!("clear deferred to end of dispatch window");
            return;
        }
        self.queue.clear();
        self.slab.clear_retaining(1, &HashSet::new());
        self.garbage = 0;
        self.clock.reset();
        self.fire_count = 0;
        self.paused = false;
        self.paused_ms = 0;
        debug!("scheduler cleared");
    }

    /// Freezes the clock. Subsequent ticks accumulate their deltas instead
    /// of advancing time or firing anything.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreezes the clock and immediately dispatches one synthetic tick for
    /// the accumulated paused time, as if the pause had not happened.
    pub fn resume(&mut self) -> Result<()> {
        if !self.paused {
            return Ok(());
        }
        self.paused = false;
        let backlog_ms = std::mem::take(&mut self.paused_ms);
        self.tick(backlog_ms)
    }

    /// Changes a repeating event's cycle length, effective from its next
    /// reschedule.
    ///
    /// # Panics
    ///
    /// Panics on a non-positive interval or a stale/invalid handle.
    pub fn set_interval(&mut self, handle: EventHandle, interval_ms: TimeMs) {
        assert!(
            interval_ms > 0,
            "set_interval: non-positive interval {interval_ms}"
        );
        self.live_record_mut(handle, "set_interval").interval_ms = interval_ms;
    }

    /// Switches an event between one-shot and repeating.
    ///
    /// # Panics
    ///
    /// Panics on a stale/invalid handle, or when switching to
    /// [`EventKind::Repeat`] while the event's interval is non-positive.
    pub fn set_kind(&mut self, handle: EventHandle, kind: EventKind) {
        let record = self.live_record_mut(handle, "set_kind");
        if kind == EventKind::Repeat {
            assert!(
                record.interval_ms > 0,
                "set_kind: repeating event requires a positive interval"
            );
        }
        record.kind = kind;
    }

    /// # Panics
    ///
    /// Panics on a stale/invalid handle.
    pub fn set_exception_policy(&mut self, handle: EventHandle, policy: ExceptionPolicy) {
        self.live_record_mut(handle, "set_exception_policy").policy = policy;
    }

    /// # Panics
    ///
    /// Panics on a stale/invalid handle.
    pub fn set_catchup(&mut self, handle: EventHandle, catchup: CatchUp) {
        self.live_record_mut(handle, "set_catchup").catchup = catchup;
    }

    /// Changes an event's priority, returning the replacement handle.
    ///
    /// Reordering invalidates the event's current heap entry by bumping the
    /// slot generation, so the handle passed in goes stale; use the returned
    /// one from here on.
    ///
    /// # Panics
    ///
    /// Panics on a stale/invalid handle.
    pub fn set_priority(&mut self, handle: EventHandle, priority: EventPriority) -> EventHandle {
        let (fire_at, index) = {
            let record = self.live_record_mut(handle, "set_priority");
            if record.priority == priority {
                return handle;
            }
            record.priority = priority;
            (record.fire_at, handle.index())
        };
        self.queue_fresh(index, fire_at, priority)
    }

    /// Postpones (or with a negative delta, advances) the event's next fire
    /// time, returning the replacement handle; the one passed in goes stale.
    ///
    /// # Panics
    ///
    /// Panics on a stale/invalid handle or on fire-time overflow.
    pub fn delay(&mut self, handle: EventHandle, delta_ms: TimeMs) -> EventHandle {
        let at_ms = self
            .live_record_mut(handle, "delay")
            .fire_at
            .checked_add(delta_ms)
            .expect("event fire time overflowed TimeMs");
        self.retarget(handle, at_ms)
    }

    /// Moves the event's next fire time to the absolute time `at_ms`,
    /// returning the replacement handle; the one passed in goes stale.
    ///
    /// # Panics
    ///
    /// Panics on a stale/invalid handle.
    pub fn set_next_fire(&mut self, handle: EventHandle, at_ms: TimeMs) -> EventHandle {
        self.live_record_mut(handle, "set_next_fire");
        self.retarget(handle, at_ms)
    }

    fn retarget(&mut self, handle: EventHandle, at_ms: TimeMs) -> EventHandle {
        let (index, priority) = {
            let record = self
                .slab
                .get_mut(handle)
                .expect("retarget of a handle that just validated");
            record.fire_at = at_ms;
            (handle.index(), record.priority)
        };
        self.queue_fresh(index, at_ms, priority)
    }

    /// Strands the event's current heap entry behind a generation bump and
    /// queues a fresh one. Pushes due-now entries through the journal while
    /// a window is open, so a reorder can never make an event fire twice in
    /// one pass.
    fn queue_fresh(&mut self, index: u32, fire_at: TimeMs, priority: EventPriority) -> EventHandle {
        let generation = self.slab.bump_generation(index);
        self.garbage += 1;
        let fresh = EventHandle::new(index, generation);
        if self.ticking && fire_at <= self.clock.now_ms() {
            self.journal.push(DeferredOp::Requeue { handle: fresh });
            trace!(index, fire_at, "requeue deferred");
        } else {
            self.queue.push(QueueEntry {
                fire_at,
                priority,
                handle: fresh,
            });
            self.maybe_rebuild();
        }
        fresh
    }

    fn live_record_mut(&mut self, handle: EventHandle, op: &str) -> &mut EventRecord {
        match self.slab.get_mut(handle) {
            Some(record) if record.status == EventStatus::Alive => record,
            _ => panic!("{op}: stale or invalid event handle {handle:?}"),
        }
    }

    /// Discards stale and cancelled entries (and collapses the backlog of an
    /// overdue `Latest` repeat) until the heap top is live, then returns it
    /// without popping.
    fn settle_top(&mut self) -> Option<QueueEntry> {
        loop {
            let entry = self.queue.peek()?;
            let index = entry.handle.index();

            let Some(record) = self.slab.get(entry.handle) else {
                // Stale generation: the slot was retargeted or recycled.
                self.queue.pop();
                self.garbage = self.garbage.saturating_sub(1);
                continue;
            };

            if record.status == EventStatus::Cancelled {
                self.queue.pop();
                self.harvest_slot(index);
                continue;
            }

            debug_assert_eq!(entry.fire_at, record.fire_at);

            if record.kind == EventKind::Repeat
                && record.catchup == CatchUp::Latest
                && self.clock.now_ms() > record.fire_at
            {
                let skipped = (self.clock.now_ms() - record.fire_at) / record.interval_ms;
                if skipped > 0 {
                    // Collapse the missed cycles into a single upcoming
                    // firing at the most recent elapsed boundary.
                    let fire_at = record.fire_at + skipped * record.interval_ms;
                    let priority = record.priority;
                    self.queue.pop();
                    self.slab
                        .get_mut(entry.handle)
                        .expect("live record vanished during collapse")
                        .fire_at = fire_at;
                    self.queue.push(QueueEntry {
                        fire_at,
                        priority,
                        handle: entry.handle,
                    });
                    continue;
                }
            }

            return Some(entry);
        }
    }

    /// One dispatch window: fire due events, then close the window, apply
    /// the journal, and re-check the garbage threshold.
    ///
    /// With `drain` set the clock chases each event's fire time and the loop
    /// only ends when the heap empties; otherwise events beyond the current
    /// time end the pass.
    fn dispatch_window(&mut self, drain: bool) -> Result<()> {
        debug_assert!(self.journal.is_empty());
        self.ticking = true;
        let mut failure = None;

        while let Some(entry) = self.settle_top() {
            if entry.fire_at > self.clock.now_ms() {
                if !drain {
                    break;
                }
                self.clock.advance(entry.fire_at - self.clock.now_ms());
            }
            self.queue.pop();
            if let Err(err) = self.fire(entry) {
                failure = Some(err);
                break;
            }
        }

        self.ticking = false;
        self.flush_journal();
        self.maybe_rebuild();

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Dispatches one popped entry under its exception policy and performs
    /// the post-callback bookkeeping (retire, cancel, or reschedule).
    fn fire(&mut self, entry: QueueEntry) -> Result<()> {
        let handle = entry.handle;
        let index = handle.index();
        self.fire_count += 1;

        let (mut callback, policy) = {
            let record = self
                .slab
                .get_mut(handle)
                .expect("fired event lost its record");
            debug_assert_eq!(record.status, EventStatus::Alive);
            (
                record
                    .callback
                    .take()
                    .expect("event callback already taken"),
                record.policy,
            )
        };

        trace!(index, at = entry.fire_at, "fire");
        let result = callback(self, handle);

        // The slot cannot be recycled while its callback runs (removals are
        // deferred or lazy), so the record is still present to take the
        // callback back.
        self.slab
            .record_at_mut(index)
            .expect("record vanished during its own callback")
            .callback = Some(callback);

        let mut rethrow = None;
        if let Err(source) = result {
            match policy {
                ExceptionPolicy::Swallow => {
                    warn!(index, error = %source, "callback error swallowed");
                }
                ExceptionPolicy::Cancel => {
                    // By index: the callback may have retargeted itself onto
                    // a new generation, and the cancel must still reach it.
                    if self.slab.mark_cancelled_at(index) {
                        self.garbage += 1;
                    }
                }
                ExceptionPolicy::Rethrow => rethrow = Some(source),
            }
        }

        let (status, kind) = {
            let record = self
                .slab
                .record_at_mut(index)
                .expect("record vanished after dispatch");
            (record.status, record.kind)
        };

        if status == EventStatus::Cancelled {
            // Cancelled by its own callback or by the Cancel policy.
            self.harvest_slot(index);
        } else if self.slab.generation(index) != handle.generation() {
            // The callback retargeted its own event: a fresh entry is already
            // queued, and the entry we popped was the one the bump stranded.
            self.garbage = self.garbage.saturating_sub(1);
        } else if kind == EventKind::Repeat {
            let (fire_at, priority) = {
                let record = self
                    .slab
                    .record_at_mut(index)
                    .expect("record vanished after dispatch");
                record.fire_at = record
                    .fire_at
                    .checked_add(record.interval_ms)
                    .expect("repeat fire time overflowed TimeMs");
                (record.fire_at, record.priority)
            };
            self.queue.push(QueueEntry {
                fire_at,
                priority,
                handle,
            });
        } else {
            // One-shot retires.
            self.harvest_slot(index);
        }

        match rethrow {
            Some(source) => Err(SchedulerError::Callback { handle, source }),
            None => Ok(()),
        }
    }

    /// Applies the journal in insertion order. A `Clear` is always first;
    /// the slots reserved by the `Schedule` ops after it survive it.
    fn flush_journal(&mut self) {
        debug_assert!(!self.ticking);
        if self.journal.is_empty() {
            debug_assert_eq!(self.pending_clear, 0);
            return;
        }
        let ops = std::mem::take(&mut self.journal);
        let clear_bump = std::mem::take(&mut self.pending_clear);

        let mut start = 0;
        if matches!(ops.first(), Some(DeferredOp::Clear)) {
            start = 1;
            let retained: HashSet<u32> = ops[1..]
                .iter()
                .filter_map(|op| match op {
                    DeferredOp::Schedule { handle } => Some(handle.index()),
                    _ => None,
                })
                .collect();
            debug_assert!(clear_bump > 0);
            self.queue.clear();
            self.garbage = 0;
            self.slab.clear_retaining(clear_bump, &retained);
            debug!(retained = retained.len(), "deferred clear applied");
        } else {
            debug_assert_eq!(clear_bump, 0);
        }

        for op in &ops[start..] {
            let handle = match op {
                DeferredOp::Schedule { handle } | DeferredOp::Requeue { handle } => *handle,
                DeferredOp::Clear => continue,
            };
            match self.slab.get(handle) {
                Some(record) if record.status == EventStatus::Alive => {
                    self.queue.push(QueueEntry {
                        fire_at: record.fire_at,
                        priority: record.priority,
                        handle,
                    });
                }
                // Cancelled before the window closed: never enters the heap.
                Some(_) => self.harvest_slot(handle.index()),
                // Superseded by a later retarget in the same window.
                None => {}
            }
        }
    }

    fn harvest_slot(&mut self, index: u32) {
        if self.slab.harvest(index) == Some(EventStatus::Cancelled) {
            self.garbage = self.garbage.saturating_sub(1);
        }
    }

    fn maybe_rebuild(&mut self) {
        if !self.ticking && self.garbage > self.slab.alive() {
            self.rebuild();
        }
    }

    /// Bulk garbage collection: pops every entry, harvests the cancelled
    /// slots, drops the stale entries, and rebuilds the heap from what is
    /// left. Keeps heap growth bounded when far-future events are cancelled
    /// or retargeted en masse.
    fn rebuild(&mut self) {
        let before = self.queue.len();
        let entries = self.queue.drain();
        let mut kept = Vec::with_capacity(self.slab.alive());
        for entry in entries {
            match self.slab.get(entry.handle) {
                Some(record) if record.status == EventStatus::Alive => kept.push(entry),
                Some(_) => {
                    self.slab.harvest(entry.handle.index());
                }
                None => {}
            }
        }
        self.queue.replace(kept);
        self.garbage = 0;
        debug!(before, after = self.queue.len(), "rebuilt dispatch queue");
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}
