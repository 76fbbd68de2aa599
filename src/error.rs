//! Errors reported by the synchronization primitives.

use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed error returned by a failing post-phase action.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors reported by the synchronization primitives.
///
/// Timeouts are not errors: blocking operations report them as `false`.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The calling thread does not hold the [`Mutex`](crate::Mutex).
    #[error("the calling thread does not hold the mutex")]
    NotOwner,
    /// Releasing would raise the available count above the capacity.
    #[error("releasing would exceed the capacity of {capacity}")]
    Overflow {
        /// Configured capacity.
        capacity: usize,
    },
    /// The operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    /// An argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The post-phase action of a [`PhaseBarrier`](crate::PhaseBarrier) failed.
    #[error(transparent)]
    PhaseFault(#[from] BarrierPhaseFault),
    /// The [`PhaseBarrier`](crate::PhaseBarrier) has been disposed of.
    #[error("the barrier has been disposed of")]
    Disposed,
}

/// The post-phase action of a [`PhaseBarrier`](crate::PhaseBarrier) failed.
///
/// Every participant of the phase receives a clone sharing the same cause.
#[derive(Clone, Debug, thiserror::Error)]
#[error("post-phase action of phase {phase} failed: {cause}")]
pub struct BarrierPhaseFault {
    /// The phase whose action failed.
    phase: u64,
    /// The error returned or the panic raised by the action.
    cause: Arc<dyn StdError + Send + Sync + 'static>,
}

impl BarrierPhaseFault {
    /// Creates a new [`BarrierPhaseFault`].
    pub(crate) fn new(phase: u64, cause: BoxError) -> Self {
        Self {
            phase,
            cause: Arc::from(cause),
        }
    }

    /// Returns the phase whose post-phase action failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{Error, PhaseBarrier};
    ///
    /// let barrier = PhaseBarrier::with_action(1, |_| Err("d'oh".into()));
    /// let Err(Error::PhaseFault(fault)) = barrier.signal_and_wait(None) else {
    ///     unreachable!();
    /// };
    /// assert_eq!(fault.phase(), 0);
    /// assert_eq!(fault.cause().to_string(), "d'oh");
    /// ```
    #[inline]
    #[must_use]
    pub fn phase(&self) -> u64 {
        self.phase
    }

    /// Returns the cause of the failure.
    #[inline]
    #[must_use]
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }
}

impl PartialEq for BarrierPhaseFault {
    fn eq(&self, other: &Self) -> bool {
        self.phase == other.phase && Arc::ptr_eq(&self.cause, &other.cause)
    }
}

impl Eq for BarrierPhaseFault {}

/// A post-phase action panicked.
#[derive(Debug, thiserror::Error)]
#[error("post-phase action panicked: {0}")]
pub(crate) struct ActionPanicked(pub(crate) String);
