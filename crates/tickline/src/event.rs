use crate::clock::TimeMs;
use crate::handle::EventHandle;
use crate::scheduler::EventScheduler;

/// How often an event fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Fires once at its scheduled time, then retires.
    Once,
    /// Fires at its scheduled time and every `interval_ms` thereafter.
    Repeat,
}

/// Relative firing order among events due at the same virtual time.
///
/// Lower variants fire first: `System < User < Debug`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    System,
    User,
    Debug,
}

/// What the dispatcher does when a callback returns an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionPolicy {
    /// Drop the error. Repeats continue on schedule; one-shots retire normally.
    Swallow,
    /// Cancel the event, repeating or not. The error is dropped.
    Cancel,
    /// Surface the error out of `tick`/`run` after the event's reschedule or
    /// retirement bookkeeping has completed.
    Rethrow,
}

/// How a repeating event treats a backlog of missed cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatchUp {
    /// Fire once per elapsed cycle.
    All,
    /// Collapse the whole backlog into a single firing at the most recent
    /// elapsed cycle boundary.
    Latest,
}

/// Error type callbacks may return; interpreted per [`ExceptionPolicy`].
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A scheduled operation.
///
/// The callback receives the scheduler (so it may schedule, cancel, or clear
/// re-entrantly) and its own handle (so it may cancel or retarget itself).
pub type EventCallback = Box<dyn FnMut(&mut EventScheduler, EventHandle) -> Result<(), CallbackError>>;

/// Configuration captured when an event is scheduled.
///
/// Defaults mirror the common case: one-shot, `User` priority, errors
/// swallowed, full catch-up.
pub struct EventDesc {
    pub kind: EventKind,
    /// Cycle length for [`EventKind::Repeat`]; unused for one-shots.
    pub interval_ms: TimeMs,
    pub policy: ExceptionPolicy,
    pub priority: EventPriority,
    pub catchup: CatchUp,
    pub(crate) callback: EventCallback,
}

impl EventDesc {
    /// A one-shot event.
    pub fn once<F>(callback: F) -> Self
    where
        F: FnMut(&mut EventScheduler, EventHandle) -> Result<(), CallbackError> + 'static,
    {
        Self {
            kind: EventKind::Once,
            interval_ms: 0,
            policy: ExceptionPolicy::Swallow,
            priority: EventPriority::User,
            catchup: CatchUp::All,
            callback: Box::new(callback),
        }
    }

    /// A repeating event with the given cycle length.
    ///
    /// The interval must be strictly positive; `schedule_*` enforces this.
    pub fn repeat<F>(interval_ms: TimeMs, callback: F) -> Self
    where
        F: FnMut(&mut EventScheduler, EventHandle) -> Result<(), CallbackError> + 'static,
    {
        Self {
            kind: EventKind::Repeat,
            interval_ms,
            ..Self::once(callback)
        }
    }

    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn catchup(mut self, catchup: CatchUp) -> Self {
        self.catchup = catchup;
        self
    }
}
