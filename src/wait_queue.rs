//! Wait queue implementation.

use std::collections::VecDeque;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Instant;

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicU8;
#[cfg(not(feature = "loom"))]
use std::sync::{Mutex, MutexGuard};
#[cfg(not(feature = "loom"))]
use std::thread::{Thread, current, park, park_timeout};

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicU8;
#[cfg(feature = "loom")]
use loom::sync::{Mutex, MutexGuard};
#[cfg(feature = "loom")]
use loom::thread::{Thread, current, park};

use crate::opcode::Opcode;

/// Fair wait queue for the synchronization primitives in this crate.
///
/// Entries are pushed at the back and granted from the front. The owning primitive keeps
/// [`WAITING_FLAG`](Self::WAITING_FLAG) set in its state word exactly while the queue is not
/// empty, and only ever changes the flag while holding the queue lock.
pub(crate) struct WaitQueue {
    /// Waiting entries in arrival order.
    entries: Mutex<VecDeque<Arc<Entry>>>,
}

/// Wait queue entry.
pub(crate) struct Entry {
    /// Operation type.
    opcode: Opcode,
    /// Operation result; [`Entry::PENDING`] until set.
    result: AtomicU8,
    /// Monitors the result.
    monitor: Monitor,
}

/// Monitors the result.
enum Monitor {
    /// The waiting thread is unparked.
    Sync(Thread),
    /// The waker of the waiting task is woken.
    Async(Mutex<Option<Waker>>),
}

impl WaitQueue {
    /// Indicates that the wait queue is not empty.
    pub(crate) const WAITING_FLAG: usize = 1_usize << (usize::BITS - 1);

    /// Mask to extract primitive-specific data from a state word.
    pub(crate) const DATA_MASK: usize = !Self::WAITING_FLAG;

    /// Creates an empty [`WaitQueue`].
    #[cfg(not(feature = "loom"))]
    pub(crate) const fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Creates an empty [`WaitQueue`].
    #[cfg(feature = "loom")]
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Locks the wait queue.
    ///
    /// No user code runs while the lock is held, so a poisoned lock is still consistent.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WaitQueue {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Entry {
    /// No result has been set.
    pub(crate) const PENDING: u8 = 0;

    /// The requested resource was handed over, or the awaited condition was met.
    pub(crate) const GRANTED: u8 = 1;

    /// The operation completed, but with a fault.
    pub(crate) const FAULTED: u8 = 2;

    /// The synchronization primitive was disposed of.
    pub(crate) const DISPOSED: u8 = 3;

    /// Creates an entry monitored by the current thread.
    pub(crate) fn new_sync(opcode: Opcode) -> Arc<Self> {
        Arc::new(Self {
            opcode,
            result: AtomicU8::new(Self::PENDING),
            monitor: Monitor::Sync(current()),
        })
    }

    /// Creates an entry monitored by a task waker.
    pub(crate) fn new_async(opcode: Opcode) -> Arc<Self> {
        Arc::new(Self {
            opcode,
            result: AtomicU8::new(Self::PENDING),
            monitor: Monitor::Async(Mutex::new(None)),
        })
    }

    /// Returns the operation code.
    #[inline]
    pub(crate) const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Sets the result and wakes the waiter.
    pub(crate) fn set_result(&self, result: u8) {
        debug_assert_ne!(result, Self::PENDING);
        self.result.store(result, Release);
        match &self.monitor {
            Monitor::Sync(thread) => thread.unpark(),
            Monitor::Async(waker) => {
                let waker = waker.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
        }
    }

    /// Returns the result if it has been set.
    #[inline]
    pub(crate) fn try_result(&self) -> Option<u8> {
        let result = self.result.load(Acquire);
        (result != Self::PENDING).then_some(result)
    }

    /// Parks the current thread until the result is set or the deadline passes.
    ///
    /// Must be called by the thread that created the entry. Returns `None` on timeout.
    pub(crate) fn poll_result_sync(&self, deadline: Option<Instant>) -> Option<u8> {
        debug_assert!(matches!(self.monitor, Monitor::Sync(_)));
        loop {
            if let Some(result) = self.try_result() {
                return Some(result);
            }
            if !park_until(deadline) {
                return self.try_result();
            }
        }
    }

    /// Polls the result, asynchronously.
    pub(crate) fn poll_result_async(&self, cx: &mut Context<'_>) -> Poll<u8> {
        let Monitor::Async(waker) = &self.monitor else {
            debug_assert!(false, "polling a synchronous wait queue entry");
            return self.try_result().map_or(Poll::Pending, Poll::Ready);
        };

        // The result is stored before the waker is taken, so checking it under the waker lock
        // cannot miss a wake-up.
        let mut waker = waker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(result) = self.try_result() {
            return Poll::Ready(result);
        }
        match waker.as_ref() {
            Some(installed) if installed.will_wake(cx.waker()) => (),
            _ => {
                waker.replace(cx.waker().clone());
            }
        }
        Poll::Pending
    }
}

/// Parks the current thread until unparked or the deadline passes.
///
/// Returns `false` if the deadline had already passed.
#[cfg(not(feature = "loom"))]
fn park_until(deadline: Option<Instant>) -> bool {
    match deadline {
        None => park(),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            park_timeout(deadline - now);
        }
    }
    true
}

/// Parks the current thread until unparked; `loom` does not model timeouts.
#[cfg(feature = "loom")]
fn park_until(_deadline: Option<Instant>) -> bool {
    park();
    true
}
