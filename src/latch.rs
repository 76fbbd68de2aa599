//! [`CountdownLatch`] releases its waiters once it has been signaled a fixed number of times.

#![deny(unsafe_code)]

use std::fmt;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::time::Duration;

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;

use tracing::debug;

use crate::error::Error;
use crate::opcode::Opcode;
use crate::sync_primitive::{self, SyncPrimitive};
use crate::wait_queue::WaitQueue;

/// [`CountdownLatch`] releases its waiters once it has been signaled a fixed number of times.
///
/// The remaining count only decreases until it reaches zero, after which the latch stays set and
/// every wait returns immediately. [`reset`](CountdownLatch::reset) rearms the latch as long as
/// nobody is waiting on it.
pub struct CountdownLatch {
    /// Remaining count.
    state: AtomicUsize,
    /// Threads and tasks waiting for the count to reach zero.
    wait_queue: WaitQueue,
    /// The count the latch was last armed with.
    initial: AtomicUsize,
}

impl CountdownLatch {
    /// Maximum count.
    pub const MAX_COUNT: usize = WaitQueue::DATA_MASK;

    /// Creates a new [`CountdownLatch`].
    ///
    /// A latch created with a zero count is already set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `initial_count` is greater than
    /// [`MAX_COUNT`](Self::MAX_COUNT).
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::CountdownLatch;
    ///
    /// let latch = CountdownLatch::new(2).unwrap();
    /// assert_eq!(latch.remaining(), 2);
    /// assert!(!latch.is_set());
    ///
    /// assert!(CountdownLatch::new(0).unwrap().is_set());
    /// ```
    pub fn new(initial_count: usize) -> Result<Self, Error> {
        Self::check_count(initial_count)?;
        Ok(Self {
            state: AtomicUsize::new(initial_count),
            wait_queue: WaitQueue::new(),
            initial: AtomicUsize::new(initial_count),
        })
    }

    /// Returns the remaining count.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.load(Relaxed) & WaitQueue::DATA_MASK
    }

    /// Returns the count the latch was last armed with.
    #[inline]
    #[must_use]
    pub fn initial_count(&self) -> usize {
        self.initial.load(Relaxed)
    }

    /// Returns `true` if the remaining count is zero.
    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.remaining() == 0
    }

    /// Decrements the remaining count.
    ///
    /// Returns `true` if this call brought the count to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the latch is already set.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{CountdownLatch, Error};
    ///
    /// let latch = CountdownLatch::new(2).unwrap();
    ///
    /// assert_eq!(latch.signal(), Ok(false));
    /// assert_eq!(latch.signal(), Ok(true));
    /// assert!(matches!(latch.signal(), Err(Error::InvalidOperation(_))));
    /// ```
    #[inline]
    pub fn signal(&self) -> Result<bool, Error> {
        self.signal_many(1)
    }

    /// Decrements the remaining count by `count`.
    ///
    /// Returns `true` if this call brought the count to zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `count` is zero, or [`Error::InvalidOperation`] if
    /// the latch is already set or `count` exceeds the remaining count. The latch is left
    /// unchanged on error.
    pub fn signal_many(&self, count: usize) -> Result<bool, Error> {
        if count == 0 {
            return Err(Error::InvalidArgument("signal count must be greater than zero"));
        }
        let previous = self.update(|remaining| {
            if remaining == 0 {
                Err(Error::InvalidOperation("the latch is already set"))
            } else if count > remaining {
                Err(Error::InvalidOperation(
                    "signal count exceeds the remaining count",
                ))
            } else {
                Ok(remaining - count)
            }
        })?;
        Ok(previous == count)
    }

    /// Increments the remaining count by `count`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the latch is already set, [`Error::InvalidArgument`]
    /// if `count` is zero, or [`Error::Overflow`] if the count would exceed
    /// [`MAX_COUNT`](Self::MAX_COUNT).
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::CountdownLatch;
    ///
    /// let latch = CountdownLatch::new(1).unwrap();
    /// assert!(latch.add_count(2).is_ok());
    /// assert_eq!(latch.remaining(), 3);
    ///
    /// assert_eq!(latch.signal_many(3), Ok(true));
    /// assert!(latch.add_count(1).is_err());
    /// ```
    pub fn add_count(&self, count: usize) -> Result<(), Error> {
        if self.try_add_count(count)? {
            Ok(())
        } else {
            Err(Error::InvalidOperation("the latch is already set"))
        }
    }

    /// Increments the remaining count by `count` unless the latch is already set.
    ///
    /// Returns `false` if the latch is already set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `count` is zero, or [`Error::Overflow`] if the count
    /// would exceed [`MAX_COUNT`](Self::MAX_COUNT).
    pub fn try_add_count(&self, count: usize) -> Result<bool, Error> {
        if count == 0 {
            return Err(Error::InvalidArgument("added count must be greater than zero"));
        }
        let result = self.update(|remaining| {
            if remaining == 0 {
                return Err(None);
            }
            remaining
                .checked_add(count)
                .filter(|&next| next <= Self::MAX_COUNT)
                .ok_or(Some(Error::Overflow {
                    capacity: Self::MAX_COUNT,
                }))
        });
        match result {
            Ok(_) => Ok(true),
            Err(None) => Ok(false),
            Err(Some(error)) => Err(error),
        }
    }

    /// Rearms the latch with `count`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if any thread or task is waiting on the latch, or
    /// [`Error::InvalidArgument`] if `count` is greater than [`MAX_COUNT`](Self::MAX_COUNT).
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::CountdownLatch;
    ///
    /// let latch = CountdownLatch::new(1).unwrap();
    /// assert_eq!(latch.signal(), Ok(true));
    ///
    /// assert!(latch.reset(3).is_ok());
    /// assert_eq!(latch.remaining(), 3);
    /// assert_eq!(latch.initial_count(), 3);
    /// ```
    pub fn reset(&self, count: usize) -> Result<(), Error> {
        Self::check_count(count)?;
        let mut state = self.state.load(Acquire);
        loop {
            if state & WaitQueue::WAITING_FLAG != 0 {
                return Err(Error::InvalidOperation(
                    "cannot reset a latch while it is being waited on",
                ));
            }
            match self.state.compare_exchange(state, count, AcqRel, Acquire) {
                Ok(_) => break,
                Err(new_state) => state = new_state,
            }
        }
        self.initial.store(count, Release);
        debug!(count, previous = state, "latch reset");
        Ok(())
    }

    /// Waits for the remaining count to reach zero.
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout elapsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// use syncpoint::CountdownLatch;
    ///
    /// let latch = Arc::new(CountdownLatch::new(3).unwrap());
    ///
    /// let workers: Vec<_> = (0..3)
    ///     .map(|_| {
    ///         let latch = latch.clone();
    ///         thread::spawn(move || latch.signal().unwrap())
    ///     })
    ///     .collect();
    ///
    /// assert!(latch.wait(None));
    ///
    /// let completions = workers
    ///     .into_iter()
    ///     .map(|w| w.join().unwrap())
    ///     .filter(|&brought_to_zero| brought_to_zero)
    ///     .count();
    /// assert_eq!(completions, 1);
    /// ```
    #[inline]
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.wait_sync(Opcode::Wait, sync_primitive::deadline(timeout))
    }

    /// Waits for the remaining count to reach zero asynchronously.
    #[inline]
    pub async fn wait_async(&self) {
        self.wait_resources_async(Opcode::Wait).await;
    }

    /// Checks that `count` fits in the state word.
    #[inline]
    fn check_count(count: usize) -> Result<(), Error> {
        if count > Self::MAX_COUNT {
            return Err(Error::InvalidArgument("count is too large"));
        }
        Ok(())
    }
}

impl fmt::Debug for CountdownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        f.debug_struct("CountdownLatch")
            .field("state", &state)
            .field("initial", &self.initial_count())
            .field("remaining", &(state & WaitQueue::DATA_MASK))
            .field("waiting", &(state & WaitQueue::WAITING_FLAG != 0))
            .finish()
    }
}

impl SyncPrimitive for CountdownLatch {
    #[inline]
    fn state(&self) -> &AtomicUsize {
        &self.state
    }

    #[inline]
    fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }

    #[inline]
    fn grant(&self, data: usize, opcode: Opcode) -> Option<usize> {
        debug_assert_eq!(opcode, Opcode::Wait);
        (data == 0).then_some(data)
    }

    #[inline]
    fn revoke(&self, data: usize, _opcode: Opcode) -> usize {
        data
    }
}
