//! [`Mutex`] is a mutual exclusion primitive with bounded-timeout acquisition.

#![deny(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::sync::PoisonError;
use std::sync::atomic::Ordering::Relaxed;
use std::time::{Duration, Instant};

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;
#[cfg(not(feature = "loom"))]
use std::sync::{Mutex as StdMutex, MutexGuard};
#[cfg(not(feature = "loom"))]
use std::thread::{ThreadId, current};

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;
#[cfg(feature = "loom")]
use loom::sync::{Mutex as StdMutex, MutexGuard};
#[cfg(feature = "loom")]
use loom::thread::{ThreadId, current};

use tracing::debug;

use crate::config::{Config, DefaultConfig};
use crate::error::Error;
use crate::opcode::Opcode;
use crate::sync_primitive::{self, SyncPrimitive};
use crate::wait_queue::WaitQueue;

/// [`Mutex`] is a mutual exclusion primitive with bounded-timeout acquisition.
///
/// At most one thread holds the [`Mutex`] at any instant, and only that thread can release it.
/// Waiting threads are served in arrival order once the [`Mutex`] is contended, however a thread
/// may acquire a free [`Mutex`] ahead of threads that are still spinning, so fairness is not
/// guaranteed.
///
/// Re-entrant acquisition fails with [`Error::InvalidOperation`] instead of deadlocking.
pub struct Mutex<C: Config = DefaultConfig> {
    /// `1` if held, `0` otherwise.
    state: AtomicUsize,
    /// Threads waiting for the [`Mutex`].
    wait_queue: WaitQueue,
    /// The thread holding the [`Mutex`].
    owner: StdMutex<Option<ThreadId>>,
    /// Spin configuration.
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> Mutex<C> {
    /// Creates a new unlocked [`Mutex`].
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::Mutex;
    ///
    /// let mutex: Mutex = Mutex::new();
    /// assert!(!mutex.is_locked());
    /// ```
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            wait_queue: WaitQueue::new(),
            owner: StdMutex::new(None),
            _config: PhantomData,
        }
    }

    /// Creates a new unlocked [`Mutex`].
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            wait_queue: WaitQueue::new(),
            owner: StdMutex::new(None),
            _config: PhantomData,
        }
    }

    /// Returns `true` if the [`Mutex`] is currently held by any thread.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) & WaitQueue::DATA_MASK != 0
    }

    /// Returns `true` if the calling thread holds the [`Mutex`].
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::Mutex;
    ///
    /// let mutex: Mutex = Mutex::new();
    /// assert!(!mutex.is_held_by_current_thread());
    ///
    /// assert_eq!(mutex.try_acquire(), Ok(true));
    /// assert!(mutex.is_held_by_current_thread());
    /// ```
    #[inline]
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner() == Some(current().id())
    }

    /// Acquires the [`Mutex`], blocking until it is held or the timeout elapses.
    ///
    /// `None` waits indefinitely. Returns `Ok(false)` if the timeout elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the calling thread already holds the [`Mutex`].
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::thread;
    /// use std::time::Duration;
    ///
    /// use syncpoint::Mutex;
    ///
    /// let mutex: Arc<Mutex> = Arc::new(Mutex::new());
    /// assert_eq!(mutex.acquire(None), Ok(true));
    ///
    /// let mutex_clone = mutex.clone();
    /// let thread = thread::spawn(move || mutex_clone.acquire(Some(Duration::from_millis(10))));
    /// assert_eq!(thread.join().unwrap(), Ok(false));
    ///
    /// assert!(mutex.release().is_ok());
    /// ```
    #[inline]
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<bool, Error> {
        self.acquire_internal(sync_primitive::deadline(timeout))
    }

    /// Acquires the [`Mutex`], blocking until it is held or the deadline passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the calling thread already holds the [`Mutex`].
    #[inline]
    pub fn acquire_until(&self, deadline: Instant) -> Result<bool, Error> {
        self.acquire_internal(Some(deadline))
    }

    /// Tries to acquire the [`Mutex`] without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperation`] if the calling thread already holds the [`Mutex`].
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{Error, Mutex};
    ///
    /// let mutex: Mutex = Mutex::new();
    ///
    /// assert_eq!(mutex.try_acquire(), Ok(true));
    /// assert!(matches!(mutex.try_acquire(), Err(Error::InvalidOperation(_))));
    /// ```
    #[inline]
    pub fn try_acquire(&self) -> Result<bool, Error> {
        self.acquire_internal(Some(Instant::now()))
    }

    /// Releases the [`Mutex`].
    ///
    /// The [`Mutex`] is handed over to the longest-waiting thread, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOwner`] if the calling thread does not hold the [`Mutex`].
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{Error, Mutex};
    ///
    /// let mutex: Mutex = Mutex::new();
    /// assert_eq!(mutex.release(), Err(Error::NotOwner));
    ///
    /// assert_eq!(mutex.acquire(None), Ok(true));
    /// assert_eq!(mutex.release(), Ok(()));
    /// assert_eq!(mutex.release(), Err(Error::NotOwner));
    /// ```
    pub fn release(&self) -> Result<(), Error> {
        let caller = current().id();
        {
            let mut owner = self.owner();
            if *owner != Some(caller) {
                debug!(?caller, "mutex released by a thread not holding it");
                return Err(Error::NotOwner);
            }
            *owner = None;
        }
        self.update(|data| if data == 1 { Ok(0) } else { Err(Error::NotOwner) })
            .map(|_| ())
    }

    /// Acquires the [`Mutex`] and records the calling thread as its owner.
    fn acquire_internal(&self, deadline: Option<Instant>) -> Result<bool, Error> {
        let caller = current().id();
        if *self.owner() == Some(caller) {
            return Err(Error::InvalidOperation(
                "the calling thread already holds the mutex",
            ));
        }
        if !self.acquire_sync::<C>(Opcode::Exclusive, deadline) {
            return Ok(false);
        }
        *self.owner() = Some(caller);
        Ok(true)
    }

    /// Locks the owner record.
    #[inline]
    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Config> Default for Mutex<C> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> fmt::Debug for Mutex<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        let locked = state & WaitQueue::DATA_MASK != 0;
        let waiting = state & WaitQueue::WAITING_FLAG != 0;
        f.debug_struct("Mutex")
            .field("state", &state)
            .field("locked", &locked)
            .field("waiting", &waiting)
            .finish()
    }
}

impl<C: Config> SyncPrimitive for Mutex<C> {
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
        debug_assert_eq!(opcode, Opcode::Exclusive);
        (data == 0).then_some(1)
    }

    #[inline]
    fn revoke(&self, _data: usize, _opcode: Opcode) -> usize {
        0
    }
}
