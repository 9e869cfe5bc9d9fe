//! Lazy garbage collection: the bulk rebuild bounds the heap, harvested
//! slots are recycled, and retained handles stay dead forever.

use std::collections::HashSet;

use pretty_assertions::assert_eq;
use tickline::{EventDesc, EventScheduler};

#[test]
fn mass_cancellation_triggers_a_rebuild_and_recycles_slots() {
    let mut sched = EventScheduler::new();

    let handles: Vec<_> = (0..10)
        .map(|i| sched.schedule_after(1_000_000 + i, EventDesc::once(|_, _| Ok(()))))
        .collect();

    for handle in &handles[..9] {
        assert!(sched.cancel(*handle));
    }

    // Cancelling nine of ten far-future events crossed the garbage > alive
    // threshold (twice), so the heap was rebuilt down to the live entry.
    assert!(
        sched.queue_depth() <= 2,
        "expected a rebuilt heap, depth = {}",
        sched.queue_depth()
    );
    assert_eq!(sched.size(), 1);

    let fresh: Vec<_> = (0..9)
        .map(|_| sched.schedule_after(500, EventDesc::once(|_, _| Ok(()))))
        .collect();

    let cancelled_slots: HashSet<u32> = handles[..9].iter().map(|h| h.index()).collect();
    let fresh_slots: HashSet<u32> = fresh.iter().map(|h| h.index()).collect();
    assert_eq!(fresh_slots, cancelled_slots);

    for handle in &handles[..9] {
        assert!(!sched.is_alive(*handle));
    }
    assert!(sched.is_alive(handles[9]));
}

#[test]
fn cancelled_handles_stay_dead_after_slot_reuse() {
    let mut sched = EventScheduler::new();

    let old = sched.schedule_after(1_000, EventDesc::once(|_, _| Ok(())));
    sched.cancel(old);
    assert!(!sched.is_alive(old));

    // Force the harvest and reoccupy the slot.
    let replacement = sched.schedule_after(1_000, EventDesc::once(|_, _| Ok(())));
    assert_eq!(replacement.index(), old.index());
    assert!(sched.is_alive(replacement));
    assert!(!sched.is_alive(old), "reused slot must not revive the old handle");

    sched.cancel(replacement);
    assert!(!sched.is_alive(replacement));
}

#[test]
fn eager_harvest_collects_a_cancelled_heap_top() {
    let mut sched = EventScheduler::new();

    let first = sched.schedule_after(10, EventDesc::once(|_, _| Ok(())));
    sched.schedule_after(20, EventDesc::once(|_, _| Ok(())));
    sched.cancel(first);

    // The cancelled entry sits at the heap top; peek discards it eagerly.
    assert_eq!(sched.peek().map(|(_, at)| at), Some(20));
    assert_eq!(sched.queue_depth(), 1);
}

#[test]
fn retargeting_garbage_also_counts_toward_the_rebuild() {
    let mut sched = EventScheduler::new();

    let mut handle = sched.schedule_after(1_000_000, EventDesc::once(|_, _| Ok(())));
    sched.schedule_after(1_000_000, EventDesc::once(|_, _| Ok(())));

    // Each retarget strands one stale entry; the rebuild keeps the heap from
    // growing without bound even though nothing is ever cancelled.
    for step in 0..50 {
        handle = sched.delay(handle, step);
        assert!(
            sched.queue_depth() <= 2 * sched.size() + 1,
            "depth {} exceeded bound at step {step}",
            sched.queue_depth()
        );
    }
    assert_eq!(sched.size(), 2);
}
