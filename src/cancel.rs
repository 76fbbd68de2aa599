//! [`CancellationSource`] and [`CancellationToken`] implement cooperative cancellation.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::gate::ManualResetGate;

/// [`CancellationSource`] requests cancellation of the work holding its tokens.
///
/// Cancellation is cooperative: the work checks its [`CancellationToken`] at points where it can
/// stop safely, and nothing is terminated forcibly.
#[derive(Debug, Default)]
pub struct CancellationSource {
    /// Set once cancellation is requested.
    cancelled: Arc<ManualResetGate>,
}

/// [`CancellationToken`] observes the cancellation requested through a [`CancellationSource`].
#[derive(Clone, Debug)]
pub struct CancellationToken {
    /// Shared with the source.
    cancelled: Arc<ManualResetGate>,
}

impl CancellationSource {
    /// Creates a new [`CancellationSource`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token observing this source.
    #[inline]
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Requests cancellation, waking everything waiting on a token.
    ///
    /// Requesting cancellation again has no effect.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    ///
    /// use syncpoint::CancellationSource;
    ///
    /// let source = CancellationSource::new();
    /// let token = source.token();
    ///
    /// let worker = thread::spawn(move || {
    ///     let mut rounds = 0_usize;
    ///     while !token.is_cancelled() {
    ///         rounds += 1;
    ///         thread::yield_now();
    ///     }
    ///     rounds
    /// });
    ///
    /// source.cancel();
    /// source.cancel();
    /// assert!(worker.join().is_ok());
    /// ```
    #[inline]
    pub fn cancel(&self) {
        if self.cancelled.is_set() {
            return;
        }
        self.cancelled.set();
        debug!("cancellation requested");
    }

    /// Returns `true` if cancellation has been requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_set()
    }
}

impl CancellationToken {
    /// Returns `true` if cancellation has been requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_set()
    }

    /// Waits for cancellation to be requested.
    ///
    /// `None` waits indefinitely. Returns `false` if the timeout elapsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use syncpoint::CancellationSource;
    ///
    /// let source = CancellationSource::new();
    /// let token = source.token();
    /// assert!(!token.wait_cancelled(Some(Duration::from_millis(1))));
    ///
    /// source.cancel();
    /// assert!(token.wait_cancelled(None));
    /// ```
    #[inline]
    pub fn wait_cancelled(&self, timeout: Option<Duration>) -> bool {
        self.cancelled.wait(timeout)
    }

    /// Waits for cancellation to be requested asynchronously.
    #[inline]
    pub async fn cancelled_async(&self) {
        self.cancelled.wait_async().await;
    }
}
