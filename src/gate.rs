//! [`AutoResetGate`] and [`ManualResetGate`] are signaling primitives that block threads until
//! they are set.

#![deny(unsafe_code)]

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;

use crate::opcode::Opcode;
use crate::sync_primitive::{self, SyncPrimitive};
use crate::wait_queue::WaitQueue;

/// [`AutoResetGate`] lets exactly one waiter through per [`set`](AutoResetGate::set).
///
/// A successful wait consumes the signal. If nobody is waiting when the gate is set, the signal
/// stays until the next wait consumes it; setting an already set gate has no further effect.
/// This models a single-consumer hand-off between a producer and a consumer.
#[derive(Default)]
pub struct AutoResetGate {
    /// `1` if signaled, `0` otherwise.
    state: AtomicUsize,
    /// Threads and tasks waiting for a signal.
    wait_queue: WaitQueue,
}

/// [`ManualResetGate`] lets every waiter through while it is set.
///
/// The gate stays set until [`reset`](ManualResetGate::reset) is called, and setting it releases
/// all blocked waiters together. This models a persistent condition, such as "the gates are open".
#[derive(Default)]
pub struct ManualResetGate {
    /// `1` if signaled, `0` otherwise.
    state: AtomicUsize,
    /// Threads and tasks waiting for the gate to be set.
    wait_queue: WaitQueue,
}

impl AutoResetGate {
    /// Creates a new [`AutoResetGate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AutoResetGate;
    ///
    /// let gate = AutoResetGate::new(true);
    /// assert!(gate.is_set());
    /// ```
    #[inline]
    #[must_use]
    pub fn new(signaled: bool) -> Self {
        Self {
            state: AtomicUsize::new(usize::from(signaled)),
            wait_queue: WaitQueue::new(),
        }
    }

    /// Returns `true` if the gate holds an unconsumed signal.
    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.state.load(Relaxed) & WaitQueue::DATA_MASK != 0
    }

    /// Sets the gate.
    ///
    /// The longest-waiting waiter consumes the signal, or the next waiter does if none is
    /// waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::AutoResetGate;
    ///
    /// let gate = AutoResetGate::new(false);
    ///
    /// gate.set();
    /// gate.set();
    /// assert!(gate.wait(None));
    /// assert!(!gate.wait(Some(Duration::ZERO)));
    /// ```
    #[inline]
    pub fn set(&self) {
        let _: Result<usize, Infallible> = self.update(|_| Ok(1));
    }

    /// Clears an unconsumed signal.
    #[inline]
    pub fn reset(&self) {
        let _: Result<usize, Infallible> = self.update(|_| Ok(0));
    }

    /// Waits for the gate to be set, consuming the signal.
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout elapsed.
    #[inline]
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.wait_sync(Opcode::Acquire(1), sync_primitive::deadline(timeout))
    }

    /// Waits for the gate to be set asynchronously, consuming the signal.
    ///
    /// Dropping the future after it was handed the signal but before it completed puts the
    /// signal back.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AutoResetGate;
    ///
    /// let gate = AutoResetGate::new(true);
    ///
    /// async {
    ///     gate.wait_async().await;
    ///     assert!(!gate.is_set());
    /// };
    /// ```
    #[inline]
    pub async fn wait_async(&self) {
        self.wait_resources_async(Opcode::Acquire(1)).await;
    }
}

impl ManualResetGate {
    /// Creates a new [`ManualResetGate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::ManualResetGate;
    ///
    /// let gate = ManualResetGate::new(false);
    /// assert!(!gate.is_set());
    /// ```
    #[inline]
    #[must_use]
    pub fn new(signaled: bool) -> Self {
        Self {
            state: AtomicUsize::new(usize::from(signaled)),
            wait_queue: WaitQueue::new(),
        }
    }

    /// Returns `true` if the gate is set.
    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.state.load(Relaxed) & WaitQueue::DATA_MASK != 0
    }

    /// Sets the gate, releasing every waiter until it is reset.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::ManualResetGate;
    ///
    /// let gate = ManualResetGate::new(false);
    /// assert!(!gate.wait(Some(Duration::ZERO)));
    ///
    /// gate.set();
    /// assert!(gate.wait(None));
    /// assert!(gate.wait(None));
    ///
    /// gate.reset();
    /// assert!(!gate.wait(Some(Duration::ZERO)));
    /// ```
    #[inline]
    pub fn set(&self) {
        let _: Result<usize, Infallible> = self.update(|_| Ok(1));
    }

    /// Resets the gate; subsequent waiters block until it is set again.
    #[inline]
    pub fn reset(&self) {
        let _: Result<usize, Infallible> = self.update(|_| Ok(0));
    }

    /// Waits for the gate to be set.
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout elapsed.
    #[inline]
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.wait_sync(Opcode::Wait, sync_primitive::deadline(timeout))
    }

    /// Waits for the gate to be set asynchronously.
    #[inline]
    pub async fn wait_async(&self) {
        self.wait_resources_async(Opcode::Wait).await;
    }
}

impl fmt::Debug for AutoResetGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        f.debug_struct("AutoResetGate")
            .field("state", &state)
            .field("signaled", &(state & WaitQueue::DATA_MASK != 0))
            .field("waiting", &(state & WaitQueue::WAITING_FLAG != 0))
            .finish()
    }
}

impl fmt::Debug for ManualResetGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        f.debug_struct("ManualResetGate")
            .field("state", &state)
            .field("signaled", &(state & WaitQueue::DATA_MASK != 0))
            .field("waiting", &(state & WaitQueue::WAITING_FLAG != 0))
            .finish()
    }
}

impl SyncPrimitive for AutoResetGate {
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
        debug_assert_eq!(opcode, Opcode::Acquire(1));
        (data != 0).then_some(0)
    }

    #[inline]
    fn revoke(&self, _data: usize, _opcode: Opcode) -> usize {
        1
    }
}

impl SyncPrimitive for ManualResetGate {
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
        (data != 0).then_some(data)
    }

    #[inline]
    fn revoke(&self, data: usize, _opcode: Opcode) -> usize {
        data
    }
}
