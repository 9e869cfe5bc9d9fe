//! Minimal host loop: one one-shot, one repeat, ten 300ms ticks.

use tickline::{EventDesc, EventScheduler};

fn main() -> tickline::Result<()> {
    let mut sched = EventScheduler::new();

    sched.schedule_after(
        1_000,
        EventDesc::once(|sched, _| {
            println!("once @ {}ms", sched.now());
            Ok(())
        }),
    );
    sched.schedule_after(
        500,
        EventDesc::repeat(500, |sched, _| {
            println!("repeat @ {}ms", sched.now());
            Ok(())
        }),
    );

    for _ in 0..10 {
        sched.tick(300)?;
    }
    Ok(())
}
