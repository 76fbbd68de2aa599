//! [`AtomicCounter`] is a lock-free signed counter.

#![deny(unsafe_code)]

use std::fmt;
use std::sync::atomic::Ordering::{AcqRel, Acquire};

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicI64;

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicI64;

/// [`AtomicCounter`] is a lock-free signed counter.
///
/// Every operation is a single read-modify-write on one atomic value, therefore concurrent
/// updates are never lost and no operation blocks. Arithmetic wraps around on overflow.
#[derive(Default)]
pub struct AtomicCounter {
    /// Current value.
    value: AtomicI64,
}

impl AtomicCounter {
    /// Creates a new [`AtomicCounter`] starting at `initial`.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AtomicCounter;
    ///
    /// let counter = AtomicCounter::new(7);
    /// assert_eq!(counter.get(), 7);
    /// ```
    #[inline]
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Returns the current value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Acquire)
    }

    /// Increments the counter, and returns the new value.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AtomicCounter;
    ///
    /// let counter = AtomicCounter::default();
    /// assert_eq!(counter.increment(), 1);
    /// assert_eq!(counter.increment(), 2);
    /// ```
    #[inline]
    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    /// Decrements the counter, and returns the new value.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AtomicCounter;
    ///
    /// let counter = AtomicCounter::default();
    /// assert_eq!(counter.decrement(), -1);
    /// ```
    #[inline]
    pub fn decrement(&self) -> i64 {
        self.add(-1)
    }

    /// Adds `delta` to the counter, and returns the new value.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AtomicCounter;
    ///
    /// let counter = AtomicCounter::new(100);
    /// assert_eq!(counter.add(100), 200);
    /// assert_eq!(counter.add(-50), 150);
    /// ```
    #[inline]
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, AcqRel).wrapping_add(delta)
    }

    /// Subtracts `delta` from the counter, and returns the new value.
    #[inline]
    pub fn sub(&self, delta: i64) -> i64 {
        self.value.fetch_sub(delta, AcqRel).wrapping_sub(delta)
    }

    /// Replaces the value, and returns the previous one.
    #[inline]
    pub fn swap(&self, value: i64) -> i64 {
        self.value.swap(value, AcqRel)
    }

    /// Stores `new` if the counter equals `current`.
    ///
    /// Returns the previous value on success, or the actual value on failure.
    ///
    /// # Errors
    ///
    /// Returns the actual value if it was not `current`.
    ///
    /// # Examples
    ///
    /// ```
    /// use syncpoint::AtomicCounter;
    ///
    /// let counter = AtomicCounter::new(3);
    /// assert_eq!(counter.compare_exchange(3, 4), Ok(3));
    /// assert_eq!(counter.compare_exchange(3, 5), Err(4));
    /// ```
    #[inline]
    pub fn compare_exchange(&self, current: i64, new: i64) -> Result<i64, i64> {
        self.value.compare_exchange(current, new, AcqRel, Acquire)
    }
}

impl fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicCounter")
            .field("value", &self.get())
            .finish()
    }
}
