//! [`AdmissionSemaphore`] is a synchronization primitive that bounds the number of threads
//! accessing a resource concurrently.

#![deny(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;

use tracing::debug;

use crate::config::{Config, DefaultConfig};
use crate::error::Error;
use crate::opcode::Opcode;
use crate::sync_primitive::{self, SyncPrimitive};
use crate::wait_queue::WaitQueue;

/// [`AdmissionSemaphore`] is a synchronization primitive that bounds the number of threads
/// accessing a resource concurrently.
///
/// The semaphore holds `available` permits out of a fixed `capacity`. Acquiring takes permits,
/// blocking while not enough are available, and releasing returns them. Released permits are
/// handed over to waiting threads in arrival order, so a waiter never loses its permits to a
/// thread that arrived later.
pub struct AdmissionSemaphore<C: Config = DefaultConfig> {
    /// Number of available permits.
    state: AtomicUsize,
    /// Threads and tasks waiting for permits.
    wait_queue: WaitQueue,
    /// Maximum number of available permits.
    capacity: usize,
    /// Spin configuration.
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> AdmissionSemaphore<C> {
    /// Maximum capacity.
    pub const MAX_CAPACITY: usize = WaitQueue::DATA_MASK;

    /// Creates a new [`AdmissionSemaphore`] with all `capacity` permits available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `capacity` is zero or greater than
    /// [`MAX_CAPACITY`](Self::MAX_CAPACITY).
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{AdmissionSemaphore, Error};
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(4).unwrap();
    /// assert_eq!(semaphore.available(), 4);
    ///
    /// let invalid: Result<AdmissionSemaphore, Error> = AdmissionSemaphore::new(0);
    /// assert!(matches!(invalid, Err(Error::InvalidArgument(_))));
    /// ```
    #[inline]
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Self::with_available(capacity, capacity)
    }

    /// Creates a new [`AdmissionSemaphore`] with `available` out of `capacity` permits available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `capacity` is zero or greater than
    /// [`MAX_CAPACITY`](Self::MAX_CAPACITY), or if `available` is greater than `capacity`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::AdmissionSemaphore;
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::with_available(4, 0).unwrap();
    /// assert!(!semaphore.try_acquire(Some(Duration::ZERO)));
    /// ```
    pub fn with_available(capacity: usize, available: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("capacity must be greater than zero"));
        }
        if capacity > Self::MAX_CAPACITY {
            return Err(Error::InvalidArgument("capacity is too large"));
        }
        if available > capacity {
            return Err(Error::InvalidArgument(
                "available permits must not exceed the capacity",
            ));
        }
        Ok(Self {
            state: AtomicUsize::new(available),
            wait_queue: WaitQueue::new(),
            capacity,
            _config: PhantomData,
        })
    }

    /// Returns the capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of available permits.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AdmissionSemaphore;
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(4).unwrap();
    /// semaphore.acquire();
    /// assert_eq!(semaphore.available(), 3);
    /// ```
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.load(Relaxed) & WaitQueue::DATA_MASK
    }

    /// Takes a permit, blocking while none is available.
    #[inline]
    pub fn acquire(&self) {
        let acquired = self.acquire_sync::<C>(Opcode::Acquire(1), None);
        debug_assert!(acquired);
    }

    /// Takes a permit, blocking while none is available until the timeout elapses.
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout elapsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::AdmissionSemaphore;
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(1).unwrap();
    ///
    /// assert!(semaphore.try_acquire(None));
    /// assert!(!semaphore.try_acquire(Some(Duration::from_millis(1))));
    /// ```
    #[inline]
    pub fn try_acquire(&self, timeout: Option<Duration>) -> bool {
        self.acquire_sync::<C>(Opcode::Acquire(1), sync_primitive::deadline(timeout))
    }

    /// Takes `count` permits at once, blocking until enough are available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `count` exceeds the capacity.
    #[inline]
    pub fn acquire_many(&self, count: usize) -> Result<(), Error> {
        self.try_acquire_many(count, None).map(|_| ())
    }

    /// Takes `count` permits at once, blocking until enough are available or the timeout
    /// elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `count` exceeds the capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::AdmissionSemaphore;
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(4).unwrap();
    ///
    /// assert_eq!(semaphore.try_acquire_many(3, None), Ok(true));
    /// assert_eq!(semaphore.try_acquire_many(2, Some(Duration::ZERO)), Ok(false));
    /// assert!(semaphore.try_acquire_many(5, None).is_err());
    /// ```
    pub fn try_acquire_many(&self, count: usize, timeout: Option<Duration>) -> Result<bool, Error> {
        self.check_count(count)?;
        Ok(self.acquire_sync::<C>(Opcode::Acquire(count), sync_primitive::deadline(timeout)))
    }

    /// Takes a permit asynchronously.
    ///
    /// Dropping the future before it completes leaves the semaphore unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AdmissionSemaphore;
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(4).unwrap();
    ///
    /// async {
    ///     semaphore.acquire_async().await;
    ///     assert_eq!(semaphore.available(), 3);
    /// };
    /// ```
    #[inline]
    pub async fn acquire_async(&self) {
        self.wait_resources_async(Opcode::Acquire(1)).await;
    }

    /// Takes `count` permits at once asynchronously.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `count` exceeds the capacity.
    #[inline]
    pub async fn acquire_many_async(&self, count: usize) -> Result<(), Error> {
        self.check_count(count)?;
        self.wait_resources_async(Opcode::Acquire(count)).await;
        Ok(())
    }

    /// Returns a permit.
    ///
    /// Returns the number of permits that were available before the release.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if all permits are already available.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::{AdmissionSemaphore, Error};
    ///
    /// let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(2).unwrap();
    /// semaphore.acquire();
    ///
    /// assert_eq!(semaphore.release(), Ok(1));
    /// assert_eq!(semaphore.release(), Err(Error::Overflow { capacity: 2 }));
    /// ```
    #[inline]
    pub fn release(&self) -> Result<usize, Error> {
        self.release_many(1)
    }

    /// Returns `count` permits.
    ///
    /// Returns the number of permits that were available before the release.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if the release would exceed the capacity, in which case no
    /// permit is returned.
    pub fn release_many(&self, count: usize) -> Result<usize, Error> {
        let capacity = self.capacity;
        self.update(|available| {
            if count > capacity - available {
                Err(Error::Overflow { capacity })
            } else {
                Ok(available + count)
            }
        })
        .inspect_err(|_| debug!(count, capacity, "semaphore release exceeds the capacity"))
    }

    /// Checks that `count` permits can ever be granted at once.
    #[inline]
    fn check_count(&self, count: usize) -> Result<(), Error> {
        if count > self.capacity {
            return Err(Error::InvalidArgument(
                "cannot acquire more permits than the capacity",
            ));
        }
        Ok(())
    }
}

impl<C: Config> fmt::Debug for AdmissionSemaphore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        let available = state & WaitQueue::DATA_MASK;
        let waiting = state & WaitQueue::WAITING_FLAG != 0;
        f.debug_struct("AdmissionSemaphore")
            .field("state", &state)
            .field("capacity", &self.capacity)
            .field("available", &available)
            .field("waiting", &waiting)
            .finish()
    }
}

impl<C: Config> SyncPrimitive for AdmissionSemaphore<C> {
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
        let Opcode::Acquire(count) = opcode else {
            return None;
        };
        data.checked_sub(count)
    }

    #[inline]
    fn revoke(&self, data: usize, opcode: Opcode) -> usize {
        let Opcode::Acquire(count) = opcode else {
            return data;
        };
        self.capacity.min(data + count)
    }
}
