//! A fixed-step game-loop host: a high-priority physics repeat, a spawner
//! that schedules one-shot children, and an autosave that collapses any
//! backlog after a pause.

use tickline::{CatchUp, EventDesc, EventPriority, EventScheduler};

const FRAME_MS: i64 = 16;

fn main() -> tickline::Result<()> {
    let mut sched = EventScheduler::new();

    sched.schedule_after(
        FRAME_MS,
        EventDesc::repeat(FRAME_MS, |sched, _| {
            if sched.now() % 160 == 0 {
                println!("[physics] step @ {}ms", sched.now());
            }
            Ok(())
        })
        .priority(EventPriority::System),
    );

    sched.schedule_after(
        100,
        EventDesc::repeat(100, |sched, _| {
            let born_at = sched.now();
            sched.schedule_after(
                50,
                EventDesc::once(move |sched, _| {
                    println!("[spawn] born @ {born_at}ms, expired @ {}ms", sched.now());
                    Ok(())
                }),
            );
            Ok(())
        }),
    );

    sched.schedule_after(
        250,
        EventDesc::repeat(250, |sched, _| {
            println!("[autosave] @ {}ms", sched.now());
            Ok(())
        })
        .priority(EventPriority::Debug)
        .catchup(CatchUp::Latest),
    );

    for _ in 0..20 {
        sched.tick(FRAME_MS)?;
    }

    // Simulate the window losing focus: time keeps arriving but nothing runs,
    // then resume replays the backlog (the autosave fires once for it).
    sched.pause();
    for _ in 0..60 {
        sched.tick(FRAME_MS)?;
    }
    println!("-- resuming after {}ms of backlog --", 60 * FRAME_MS);
    sched.resume()?;

    println!("clock: {}ms, live events: {}", sched.now(), sched.size());
    Ok(())
}
