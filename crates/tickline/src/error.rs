use thiserror::Error;

use crate::event::CallbackError;
use crate::handle::EventHandle;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A callback with [`ExceptionPolicy::Rethrow`](crate::ExceptionPolicy::Rethrow)
    /// returned an error. The scheduler's bookkeeping for the event completed
    /// before propagation, so ticking may simply continue.
    #[error("callback for event {handle:?} failed: {source}")]
    Callback {
        handle: EventHandle,
        #[source]
        source: CallbackError,
    },
}
