#![forbid(unsafe_code)]

//! Deterministic discrete-time event scheduling.
//!
//! The host owns time: it delivers increments through
//! [`EventScheduler::tick`], and the scheduler fires due one-shot and
//! repeating callbacks in a deterministic `(time, priority, insertion)`
//! order. Nothing here consults the wall clock, which makes the scheduler
//! suitable for game loops, simulations, and tests that need identical
//! replays from identical inputs.
//!
//! Events are addressed by generation-tagged [`EventHandle`]s: slots are
//! recycled after an event retires, but a retained handle can never reach a
//! successor event. Callbacks may re-enter the scheduler — schedule, cancel,
//! retarget, even [`clear`](EventScheduler::clear) — and mutations that
//! would disturb the in-flight dispatch are journaled and applied when the
//! tick finishes.
//!
//! ```
//! use tickline::{EventDesc, EventScheduler};
//!
//! let mut sched = EventScheduler::new();
//! sched.schedule_after(1_000, EventDesc::once(|_, _| {
//!     println!("once @ 1000ms");
//!     Ok(())
//! }));
//! sched.schedule_after(500, EventDesc::repeat(500, |_, _| {
//!     println!("repeat every 500ms");
//!     Ok(())
//! }));
//!
//! for _ in 0..10 {
//!     sched.tick(300)?;
//! }
//! # Ok::<(), tickline::SchedulerError>(())
//! ```

mod clock;
mod error;
mod event;
mod handle;
mod queue;
mod scheduler;
mod slab;

pub use clock::TimeMs;
pub use error::{Result, SchedulerError};
pub use event::{CallbackError, CatchUp, EventCallback, EventDesc, EventKind, EventPriority, ExceptionPolicy};
pub use handle::EventHandle;
pub use scheduler::EventScheduler;
