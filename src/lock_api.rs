//! Implementations of locking traits from the [`lock_api`](https://crates.io/crates/lock_api) crate.

use std::time::{Duration, Instant};

use crate::config::{Config, DefaultConfig};
use crate::mutex::Mutex;

/// A mutual exclusion primitive for protecting shared data of type `T`.
///
/// Guards cannot be sent to other threads, as only the thread that locked the [`Mutex`] can
/// release it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use syncpoint::DataMutex;
///
/// let data: Arc<DataMutex<usize>> = Arc::new(DataMutex::new(0));
///
/// let threads: Vec<_> = (0..4)
///     .map(|_| {
///         let data = data.clone();
///         thread::spawn(move || *data.lock() += 1)
///     })
///     .collect();
/// for thread in threads {
///     thread.join().unwrap();
/// }
///
/// assert_eq!(*data.lock(), 4);
/// ```
pub type DataMutex<T, C = DefaultConfig> = lock_api::Mutex<Mutex<C>, T>;

/// An RAII implementation of a scoped [`DataMutex`] lock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use syncpoint::{DataMutex, DataMutexGuard};
///
/// let data: DataMutex<Vec<u32>> = DataMutex::new(Vec::new());
///
/// let mut guard: DataMutexGuard<Vec<u32>> = data.lock();
/// guard.push(7);
/// assert!(data.try_lock_for(Duration::from_millis(1)).is_none());
/// drop(guard);
///
/// assert_eq!(data.try_lock().map(|g| g.len()), Some(1));
/// ```
pub type DataMutexGuard<'a, T, C = DefaultConfig> = lock_api::MutexGuard<'a, Mutex<C>, T>;

unsafe impl<C: Config> lock_api::RawMutex for Mutex<C> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Mutex::new();

    type GuardMarker = lock_api::GuardNoSend;

    #[inline]
    fn lock(&self) {
        let acquired = self.acquire(None);
        assert_eq!(acquired, Ok(true), "a DataMutex cannot be locked recursively");
    }

    #[inline]
    fn try_lock(&self) -> bool {
        matches!(self.try_acquire(), Ok(true))
    }

    #[inline]
    unsafe fn unlock(&self) {
        let released = self.release();
        debug_assert!(released.is_ok());
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Mutex::is_locked(self)
    }
}

unsafe impl<C: Config> lock_api::RawMutexTimed for Mutex<C> {
    type Duration = Duration;
    type Instant = Instant;

    #[inline]
    fn try_lock_for(&self, timeout: Duration) -> bool {
        matches!(self.acquire(Some(timeout)), Ok(true))
    }

    #[inline]
    fn try_lock_until(&self, deadline: Instant) -> bool {
        matches!(self.acquire_until(deadline), Ok(true))
    }
}
