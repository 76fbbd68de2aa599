//! [`Config`] defines how contended primitives spin before parking the thread.

use std::fmt;
#[cfg(not(feature = "loom"))]
use std::thread::yield_now;

#[cfg(feature = "loom")]
use loom::thread::yield_now;

/// [`Config`] defines how contended primitives spin before parking the thread.
///
/// [`Mutex`](crate::Mutex) and [`AdmissionSemaphore`](crate::AdmissionSemaphore) retry the lock-free
/// fast path [`spin_count`](Config::spin_count) times before entering the wait queue.
///
/// # Examples
///
/// ```
/// use syncpoint::{Config, Mutex};
///
/// #[derive(Debug, Default)]
/// struct ParkImmediately;
///
/// impl Config for ParkImmediately {
///     fn spin_count() -> usize {
///         0
///     }
/// }
///
/// let mutex: Mutex<ParkImmediately> = Mutex::new();
/// assert_eq!(mutex.acquire(None), Ok(true));
/// ```
pub trait Config: fmt::Debug + Default {
    /// Defines the number of times to spin before entering a wait queue.
    #[inline]
    #[must_use]
    fn spin_count() -> usize {
        128
    }

    /// Defines the backoff function to use when spinning.
    #[inline]
    fn backoff(spin_count: usize) {
        if spin_count % 16 == 15 {
            yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Default configuration for synchronization primitives.
#[derive(Debug, Default)]
pub struct DefaultConfig;

impl Config for DefaultConfig {}
