//! [`PhaseBarrier`] is a cyclic rendezvous point for a changing set of participants.

#![deny(unsafe_code)]

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::mem::take;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

#[cfg(not(feature = "loom"))]
use std::sync::{Mutex as StdMutex, MutexGuard};

#[cfg(feature = "loom")]
use loom::sync::{Mutex as StdMutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::{ActionPanicked, BarrierPhaseFault, BoxError, Error};
use crate::opcode::Opcode;
use crate::sync_primitive;
use crate::wait_queue::{Entry, WaitQueue};

/// Action run by the last participant to arrive, before the others are released.
type PostPhaseAction = dyn Fn(&PhaseBarrier) -> Result<(), BoxError> + Send + Sync;

/// [`PhaseBarrier`] is a cyclic rendezvous point for a changing set of participants.
///
/// Every participant calls [`signal_and_wait`](PhaseBarrier::signal_and_wait) once per phase.
/// When the last one arrives, it runs the optional post-phase action, the phase number advances,
/// and everybody is released. If the action fails, every participant of that phase observes the
/// same [`BarrierPhaseFault`]; the barrier itself keeps working for the next phase.
///
/// Participants can only be added or removed between phases.
pub struct PhaseBarrier {
    /// Mutable barrier state.
    inner: StdMutex<Inner>,
    /// Post-phase action.
    action: Option<Box<PostPhaseAction>>,
}

/// Mutable state of a [`PhaseBarrier`].
struct Inner {
    /// Number of participants per phase.
    participants: usize,
    /// Number of participants that have arrived in the current phase.
    arrived: usize,
    /// Current phase number.
    phase: u64,
    /// The post-phase action is running.
    post_phase: bool,
    /// The barrier has been disposed of.
    disposed: bool,
    /// Participants blocked in the current phase.
    waiters: VecDeque<Arc<Entry>>,
    /// Outcome shared by the participants of the current phase.
    outcome: Arc<PhaseOutcome>,
}

/// Outcome of a single phase.
struct PhaseOutcome {
    /// Set before participants are woken with [`Entry::FAULTED`].
    fault: StdMutex<Option<BarrierPhaseFault>>,
}

impl PhaseBarrier {
    /// Maximum number of participants.
    pub const MAX_PARTICIPANTS: usize = WaitQueue::DATA_MASK;

    /// Creates a new [`PhaseBarrier`] without a post-phase action.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::PhaseBarrier;
    ///
    /// let barrier = PhaseBarrier::new(1);
    ///
    /// assert_eq!(barrier.signal_and_wait(None), Ok(true));
    /// assert_eq!(barrier.current_phase(), 1);
    /// ```
    #[must_use]
    pub fn new(participants: usize) -> Self {
        Self::with_boxed_action(participants, None)
    }

    /// Creates a new [`PhaseBarrier`] that runs `action` at the end of every phase.
    ///
    /// The action runs on the thread of the last participant to arrive, before any participant
    /// is released. An error returned or a panic raised by the action is reported to every
    /// participant of the phase as [`Error::PhaseFault`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::AtomicU64;
    /// use std::sync::atomic::Ordering::Relaxed;
    /// use std::thread;
    ///
    /// use syncpoint::PhaseBarrier;
    ///
    /// let completed = Arc::new(AtomicU64::new(0));
    /// let completed_clone = completed.clone();
    /// let barrier = Arc::new(PhaseBarrier::with_action(2, move |barrier| {
    ///     completed_clone.store(barrier.current_phase() + 1, Relaxed);
    ///     Ok(())
    /// }));
    ///
    /// let barrier_clone = barrier.clone();
    /// let thread = thread::spawn(move || barrier_clone.signal_and_wait(None));
    ///
    /// assert_eq!(barrier.signal_and_wait(None), Ok(true));
    /// assert_eq!(thread.join().unwrap(), Ok(true));
    /// assert_eq!(completed.load(Relaxed), 1);
    /// ```
    #[must_use]
    pub fn with_action<F>(participants: usize, action: F) -> Self
    where
        F: Fn(&PhaseBarrier) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self::with_boxed_action(participants, Some(Box::new(action)))
    }

    /// Returns the current phase number.
    #[inline]
    #[must_use]
    pub fn current_phase(&self) -> u64 {
        self.lock().phase
    }

    /// Returns the number of participants.
    #[inline]
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.lock().participants
    }

    /// Returns the number of participants yet to arrive in the current phase.
    #[inline]
    #[must_use]
    pub fn participants_remaining(&self) -> usize {
        let inner = self.lock();
        inner.participants - inner.arrived
    }

    /// Returns `true` if the barrier has been disposed of.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Adds a participant.
    ///
    /// Returns the phase the new participant joins.
    ///
    /// # Errors
    ///
    /// Same as [`add_participants`](Self::add_participants).
    #[inline]
    pub fn add_participant(&self) -> Result<u64, Error> {
        self.add_participants(1)
    }

    /// Adds `count` participants.
    ///
    /// Returns the phase the new participants join.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the barrier has been disposed of,
    /// [`Error::InvalidOperation`] if a phase is in progress, or [`Error::InvalidArgument`] if
    /// `count` is zero or the total would exceed [`MAX_PARTICIPANTS`](Self::MAX_PARTICIPANTS).
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::PhaseBarrier;
    ///
    /// let barrier = PhaseBarrier::new(3);
    ///
    /// assert_eq!(barrier.add_participants(2), Ok(0));
    /// assert!(barrier.remove_participant().is_ok());
    /// assert_eq!(barrier.participant_count(), 4);
    /// ```
    pub fn add_participants(&self, count: usize) -> Result<u64, Error> {
        if count == 0 {
            return Err(Error::InvalidArgument(
                "participant count must be greater than zero",
            ));
        }
        let mut inner = self.lock();
        inner.check_between_phases()?;
        let Some(participants) = inner
            .participants
            .checked_add(count)
            .filter(|&p| p <= Self::MAX_PARTICIPANTS)
        else {
            return Err(Error::InvalidArgument("too many participants"));
        };
        inner.participants = participants;
        debug!(phase = inner.phase, added = count, participants, "barrier participants added");
        Ok(inner.phase)
    }

    /// Removes a participant.
    ///
    /// # Errors
    ///
    /// Same as [`remove_participants`](Self::remove_participants).
    #[inline]
    pub fn remove_participant(&self) -> Result<(), Error> {
        self.remove_participants(1)
    }

    /// Removes `count` participants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disposed`] if the barrier has been disposed of,
    /// [`Error::InvalidOperation`] if a phase is in progress, or [`Error::InvalidArgument`] if
    /// `count` is zero or greater than the number of participants.
    pub fn remove_participants(&self, count: usize) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::InvalidArgument(
                "participant count must be greater than zero",
            ));
        }
        let mut inner = self.lock();
        inner.check_between_phases()?;
        if count > inner.participants {
            return Err(Error::InvalidArgument(
                "cannot remove more participants than registered",
            ));
        }
        inner.participants -= count;
        debug!(
            phase = inner.phase,
            removed = count,
            participants = inner.participants,
            "barrier participants removed"
        );
        Ok(())
    }

    /// Signals that a participant has reached the barrier, and waits for the others.
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` if the timeout elapsed, in which case the
    /// arrival is withdrawn and the phase still needs the participant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PhaseFault`] if the post-phase action failed, [`Error::Disposed`] if the
    /// barrier is or gets disposed of, or [`Error::InvalidOperation`] if every participant has
    /// already arrived, there is no participant, or it is called from the post-phase action.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::PhaseBarrier;
    ///
    /// let barrier = PhaseBarrier::new(2);
    ///
    /// assert_eq!(barrier.signal_and_wait(Some(Duration::from_millis(1))), Ok(false));
    /// assert_eq!(barrier.participants_remaining(), 2);
    /// ```
    pub fn signal_and_wait(&self, timeout: Option<Duration>) -> Result<bool, Error> {
        let deadline = sync_primitive::deadline(timeout);
        let mut inner = self.lock();
        if inner.disposed {
            return Err(Error::Disposed);
        }
        if inner.post_phase {
            return Err(Error::InvalidOperation(
                "cannot signal the barrier from the post-phase action",
            ));
        }
        if inner.participants == 0 {
            return Err(Error::InvalidOperation("the barrier has no participants"));
        }
        if inner.arrived >= inner.participants {
            return Err(Error::InvalidOperation(
                "every participant has already arrived",
            ));
        }

        inner.arrived += 1;
        if inner.arrived == inner.participants {
            return self.finish_phase(inner);
        }

        let entry = Entry::new_sync(Opcode::Wait);
        inner.waiters.push_back(entry.clone());
        let outcome = inner.outcome.clone();
        drop(inner);

        let result = if let Some(result) = entry.poll_result_sync(deadline) {
            result
        } else {
            let mut inner = self.lock();
            if let Some(pos) = inner.waiters.iter().position(|e| Arc::ptr_eq(e, &entry)) {
                inner.waiters.remove(pos);
                inner.arrived -= 1;
                debug!(phase = inner.phase, "barrier arrival withdrawn on timeout");
                return Ok(false);
            }
            drop(inner);

            // The phase completed while timing out; the result is on its way.
            entry.poll_result_sync(None).unwrap_or(Entry::GRANTED)
        };
        outcome.decode(result)
    }

    /// Disposes of the barrier.
    ///
    /// Blocked participants are released with [`Error::Disposed`], and every subsequent call
    /// fails the same way. Disposing of a disposed barrier has no effect.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{Error, PhaseBarrier};
    ///
    /// let barrier = PhaseBarrier::new(2);
    /// barrier.dispose();
    ///
    /// assert!(barrier.is_disposed());
    /// assert_eq!(barrier.signal_and_wait(None), Err(Error::Disposed));
    /// ```
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        let waiters = take(&mut inner.waiters);
        inner.arrived = 0;
        debug!(phase = inner.phase, released = waiters.len(), "barrier disposed");
        for entry in waiters {
            entry.set_result(Entry::DISPOSED);
        }
    }

    /// Creates a new [`PhaseBarrier`].
    fn with_boxed_action(participants: usize, action: Option<Box<PostPhaseAction>>) -> Self {
        Self {
            inner: StdMutex::new(Inner {
                participants: participants.min(Self::MAX_PARTICIPANTS),
                arrived: 0,
                phase: 0,
                post_phase: false,
                disposed: false,
                waiters: VecDeque::new(),
                outcome: Arc::new(PhaseOutcome::new()),
            }),
            action,
        }
    }

    /// Runs the post-phase action and releases the participants of the phase.
    ///
    /// Called by the last participant to arrive.
    fn finish_phase(&self, mut inner: MutexGuard<'_, Inner>) -> Result<bool, Error> {
        let phase = inner.phase;
        let participants = inner.participants;
        let waiters = take(&mut inner.waiters);
        let outcome = inner.outcome.clone();
        inner.post_phase = true;
        drop(inner);

        let fault = self.run_action(phase);

        let mut inner = self.lock();
        inner.phase = phase.wrapping_add(1);
        inner.arrived = 0;
        inner.post_phase = false;
        inner.outcome = Arc::new(PhaseOutcome::new());
        drop(inner);

        let result = if let Some(fault) = fault {
            warn!(phase, participants, error = %fault.cause(), "barrier post-phase action failed");
            outcome.record(fault);
            Entry::FAULTED
        } else {
            debug!(phase, participants, "barrier phase completed");
            Entry::GRANTED
        };
        for entry in waiters {
            entry.set_result(result);
        }
        outcome.decode(result)
    }

    /// Runs the post-phase action, converting an error or a panic into a fault.
    fn run_action(&self, phase: u64) -> Option<BarrierPhaseFault> {
        let action = self.action.as_ref()?;
        let cause: BoxError = match catch_unwind(AssertUnwindSafe(|| action(self))) {
            Ok(Ok(())) => return None,
            Ok(Err(error)) => error,
            Err(payload) => Box::new(ActionPanicked(panic_message(payload.as_ref()))),
        };
        Some(BarrierPhaseFault::new(phase, cause))
    }

    /// Locks the barrier state.
    ///
    /// The post-phase action never runs while the lock is held, so a poisoned lock is still
    /// consistent.
    #[inline]
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PhaseBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("PhaseBarrier")
            .field("phase", &inner.phase)
            .field("participants", &inner.participants)
            .field("arrived", &inner.arrived)
            .field("post_phase", &inner.post_phase)
            .field("disposed", &inner.disposed)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

impl Inner {
    /// Checks that participants can be added or removed.
    fn check_between_phases(&self) -> Result<(), Error> {
        if self.disposed {
            return Err(Error::Disposed);
        }
        if self.post_phase || self.arrived != 0 {
            return Err(Error::InvalidOperation(
                "participants cannot change while a phase is in progress",
            ));
        }
        Ok(())
    }
}

impl PhaseOutcome {
    fn new() -> Self {
        Self {
            fault: StdMutex::new(None),
        }
    }

    fn record(&self, fault: BarrierPhaseFault) {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(fault);
    }

    /// Converts a wait queue entry result into the outcome seen by a participant.
    fn decode(&self, result: u8) -> Result<bool, Error> {
        match result {
            Entry::FAULTED => {
                let fault = self
                    .fault
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                fault.map_or(Ok(true), |fault| Err(Error::PhaseFault(fault)))
            }
            Entry::DISPOSED => Err(Error::Disposed),
            _ => Ok(true),
        }
    }
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
