//! Mutations issued from inside callbacks: deferred schedules, immediate
//! cancellation, deferred retargets, and clear-during-dispatch.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tickline::{
    CallbackError, EventDesc, EventHandle, EventPriority, EventScheduler,
};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn recorder(
    log: &Log,
    name: &'static str,
) -> impl FnMut(&mut EventScheduler, EventHandle) -> Result<(), CallbackError> + 'static {
    let log = Rc::clone(log);
    move |_, _| {
        log.borrow_mut().push(name);
        Ok(())
    }
}

#[test]
fn child_scheduled_during_a_tick_fires_on_the_next_tick() {
    let log: Log = Rc::default();
    let mut sched = EventScheduler::new();

    let parent_log = Rc::clone(&log);
    sched.schedule_after(
        100,
        EventDesc::once(move |sched, _| {
            parent_log.borrow_mut().push("parent");
            let child_log = Rc::clone(&parent_log);
            sched.schedule_after(
                0,
                EventDesc::once(move |_, _| {
                    child_log.borrow_mut().push("child");
                    Ok(())
                }),
            );
            Ok(())
        }),
    );

    sched.tick(100).unwrap();
    assert_eq!(*log.borrow(), vec!["parent"]);

    // The child was due at t=100 the moment it was scheduled, but events
    // inserted during a pass never fire within it.
    sched.tick(0).unwrap();
    assert_eq!(*log.borrow(), vec!["parent", "child"]);
}

#[test]
fn deferred_schedule_is_observable_before_the_window_closes() {
    let seen_alive = Rc::new(RefCell::new(None));
    let mut sched = EventScheduler::new();

    let seen = Rc::clone(&seen_alive);
    sched.schedule_after(
        10,
        EventDesc::once(move |sched, _| {
            let child = sched.schedule_after(5, EventDesc::once(|_, _| Ok(())));
            *seen.borrow_mut() = Some((sched.is_alive(child), sched.size()));
            Ok(())
        }),
    );

    sched.tick(10).unwrap();
    // Inside the window the child already counted as alive, alongside the
    // parent whose dispatch was still in flight.
    assert_eq!(*seen_alive.borrow(), Some((true, 2)));
    assert_eq!(sched.size(), 1);
}

#[test]
fn repeat_cancelling_itself_fires_exactly_once() {
    let log: Log = Rc::default();
    let mut sched = EventScheduler::new();

    let cb_log = Rc::clone(&log);
    sched.schedule_after(
        100,
        EventDesc::repeat(100, move |sched, handle| {
            cb_log.borrow_mut().push("r");
            sched.cancel(handle);
            Ok(())
        }),
    );

    sched.tick(1_000).unwrap();
    assert_eq!(*log.borrow(), vec!["r"]);
    assert_eq!(sched.size(), 0);
}

#[test]
fn scheduling_then_cancelling_within_one_callback_never_fires() {
    let log: Log = Rc::default();
    let mut sched = EventScheduler::new();

    let outer_log = Rc::clone(&log);
    sched.schedule_after(
        10,
        EventDesc::once(move |sched, _| {
            let doomed_log = Rc::clone(&outer_log);
            let doomed = sched.schedule_after(
                0,
                EventDesc::once(move |_, _| {
                    doomed_log.borrow_mut().push("doomed");
                    Ok(())
                }),
            );
            assert!(sched.cancel(doomed));
            Ok(())
        }),
    );

    sched.tick(10).unwrap();
    sched.tick(0).unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(sched.size(), 0);
}

#[test]
fn retargeting_a_due_event_from_a_callback_defers_its_firing() {
    let log: Log = Rc::default();
    let mut sched = EventScheduler::new();

    // "b" is due at t=100 with Debug priority, so it would fire right after
    // "a"; a's callback retargets it to the (already reached) time 100,
    // which journals the requeue instead of firing it this pass.
    let b = sched.schedule_after(
        100,
        EventDesc::once(recorder(&log, "b")).priority(EventPriority::Debug),
    );
    let a_log = Rc::clone(&log);
    sched.schedule_after(
        100,
        EventDesc::once(move |sched, _| {
            a_log.borrow_mut().push("a");
            sched.set_next_fire(b, 100);
            Ok(())
        })
        .priority(EventPriority::System),
    );

    sched.tick(100).unwrap();
    assert_eq!(*log.borrow(), vec!["a"]);

    sched.tick(0).unwrap();
    assert_eq!(*log.borrow(), vec!["a", "b"]);
}

#[test]
fn clear_inside_a_callback_lands_when_the_window_closes() {
    let log: Log = Rc::default();
    let mut sched = EventScheduler::new();

    // "late" is due in the same pass and still fires: a journaled clear does
    // not disturb the dispatch in flight.
    sched.schedule_after(
        100,
        EventDesc::once(recorder(&log, "late")).priority(EventPriority::Debug),
    );
    let survivor = Rc::new(RefCell::new(EventHandle::INVALID));

    let a_log = Rc::clone(&log);
    let surv = Rc::clone(&survivor);
    let doomed_repeat = sched.schedule_after(50, EventDesc::repeat(50, recorder(&log, "doomed")));
    sched.schedule_after(
        100,
        EventDesc::once(move |sched, _| {
            a_log.borrow_mut().push("a");
            sched.clear();
            let child_log = Rc::clone(&a_log);
            *surv.borrow_mut() = sched.schedule_after(
                50,
                EventDesc::once(move |_, _| {
                    child_log.borrow_mut().push("survivor");
                    Ok(())
                }),
            );
            Ok(())
        })
        .priority(EventPriority::System),
    );

    sched.tick(100).unwrap();
    // "doomed" fired at t=50, and again at t=100 after "a" recorded the
    // clear: the clear only lands once the window closes.
    assert_eq!(*log.borrow(), vec!["doomed", "a", "doomed", "late"]);

    // Only the post-clear schedule survived, and the deferred clear kept the
    // clock where it was.
    assert_eq!(sched.size(), 1);
    assert_eq!(sched.now(), 100);
    assert!(!sched.is_alive(doomed_repeat));
    assert!(sched.is_alive(*survivor.borrow()));

    sched.tick(50).unwrap();
    assert_eq!(*log.borrow(), vec!["doomed", "a", "doomed", "late", "survivor"]);
    assert_eq!(sched.size(), 0);
}

#[test]
fn two_clears_in_one_window_keep_only_the_last_schedules() {
    let log: Log = Rc::default();
    let survivors = Rc::new(RefCell::new((EventHandle::INVALID, EventHandle::INVALID)));
    let mut sched = EventScheduler::new();

    let outer_log = Rc::clone(&log);
    let out = Rc::clone(&survivors);
    sched.schedule_after(
        10,
        EventDesc::once(move |sched, _| {
            sched.clear();
            let x = sched.schedule_after(20, EventDesc::once(recorder(&outer_log, "x")));
            sched.clear();
            let y = sched.schedule_after(20, EventDesc::once(recorder(&outer_log, "y")));
            *out.borrow_mut() = (x, y);
            Ok(())
        }),
    );

    sched.tick(10).unwrap();
    let (x, y) = *survivors.borrow();
    assert!(!sched.is_alive(x), "the second clear swept the first schedule");
    assert!(sched.is_alive(y));
    assert_eq!(sched.size(), 1);

    sched.tick(20).unwrap();
    assert_eq!(*log.borrow(), vec!["y"]);
}

#[test]
#[should_panic(expected = "re-entered")]
fn ticking_from_inside_a_callback_is_a_contract_failure() {
    let mut sched = EventScheduler::new();
    sched.schedule_after(
        10,
        EventDesc::once(|sched, _| {
            let _ = sched.tick(1);
            Ok(())
        }),
    );
    let _ = sched.tick(10);
}

#[test]
fn clear_discards_mutations_journaled_before_it() {
    let log: Log = Rc::default();
    let casualty_handle = Rc::new(RefCell::new(EventHandle::INVALID));
    let mut sched = EventScheduler::new();

    let outer_log = Rc::clone(&log);
    let smuggled = Rc::clone(&casualty_handle);
    sched.schedule_after(
        10,
        EventDesc::once(move |sched, _| {
            let casualty_log = Rc::clone(&outer_log);
            *smuggled.borrow_mut() = sched.schedule_after(
                0,
                EventDesc::once(move |_, _| {
                    casualty_log.borrow_mut().push("casualty");
                    Ok(())
                }),
            );
            sched.clear();
            Ok(())
        }),
    );

    sched.tick(10).unwrap();
    // The schedule journaled before the clear was swept away with everything
    // else once the window closed.
    assert!(!sched.is_alive(*casualty_handle.borrow()));
    sched.tick(100).unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(sched.size(), 0);
}
