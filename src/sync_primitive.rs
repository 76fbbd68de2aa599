//! Define base operations for synchronization primitives.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;

use crate::config::Config;
use crate::opcode::Opcode;
use crate::wait_queue::{Entry, WaitQueue};

/// Define base operations for synchronization primitives.
///
/// The state word holds primitive-specific data in [`WaitQueue::DATA_MASK`] and
/// [`WaitQueue::WAITING_FLAG`] while entries are queued. Operations never barge past queued
/// entries, and resources are handed over to granted entries directly.
pub(crate) trait SyncPrimitive: Sized {
    /// Returns a reference to the state.
    fn state(&self) -> &AtomicUsize;

    /// Returns a reference to the wait queue.
    fn wait_queue(&self) -> &WaitQueue;

    /// Returns the data after granting `opcode`, or `None` if the operation has to wait.
    fn grant(&self, data: usize, opcode: Opcode) -> Option<usize>;

    /// Returns the data after giving back the resources granted to `opcode`.
    fn revoke(&self, data: usize, opcode: Opcode) -> usize;

    /// Tries to grant the operation without waiting.
    ///
    /// Returns the latest state if the operation cannot be granted or entries are queued.
    fn try_grant(&self, opcode: Opcode) -> Result<(), usize> {
        let mut state = self.state().load(Acquire);
        loop {
            if state & WaitQueue::WAITING_FLAG != 0 {
                return Err(state);
            }
            let Some(data) = self.grant(state, opcode) else {
                return Err(state);
            };
            match self
                .state()
                .compare_exchange(state, data, AcqRel, Acquire)
            {
                Ok(_) => return Ok(()),
                Err(new_state) => state = new_state,
            }
        }
    }

    /// Tries to grant the operation, and parks the current thread until it is granted or the
    /// deadline passes.
    fn wait_sync(&self, opcode: Opcode, deadline: Option<Instant>) -> bool {
        if self.try_grant(opcode).is_ok() {
            return true;
        }
        if expired(deadline) {
            return false;
        }
        self.wait_resources_sync(opcode, deadline)
    }

    /// Same as [`wait_sync`](Self::wait_sync), but spins as configured before parking.
    fn acquire_sync<C: Config>(&self, opcode: Opcode, deadline: Option<Instant>) -> bool {
        if self.try_grant(opcode).is_ok() {
            return true;
        }
        if expired(deadline) {
            return false;
        }
        for spin in 0..C::spin_count() {
            C::backoff(spin);
            if self.try_grant(opcode).is_ok() {
                return true;
            }
        }
        self.wait_resources_sync(opcode, deadline)
    }

    /// Waits for the desired resources synchronously.
    fn wait_resources_sync(&self, opcode: Opcode, deadline: Option<Instant>) -> bool {
        let entry = Entry::new_sync(opcode);
        if self.push_wait_queue_entry(&entry) || entry.poll_result_sync(deadline).is_some() {
            return true;
        }

        // Timed out: the entry may still have been granted before it could be removed.
        self.remove_wait_queue_entry(&entry)
    }

    /// Waits for the desired resources asynchronously.
    fn wait_resources_async(&self, opcode: Opcode) -> AsyncWait<'_, Self> {
        AsyncWait {
            sync_primitive: self,
            opcode,
            entry: None,
        }
    }

    /// Pushes a wait queue entry into the wait queue.
    ///
    /// Returns `true` without pushing the entry if the operation could be granted immediately.
    fn push_wait_queue_entry(&self, entry: &Arc<Entry>) -> bool {
        let mut entries = self.wait_queue().lock();
        let mut state = self.state().load(Acquire);
        loop {
            if state & WaitQueue::WAITING_FLAG == 0 {
                if let Some(data) = self.grant(state, entry.opcode()) {
                    match self
                        .state()
                        .compare_exchange(state, data, AcqRel, Acquire)
                    {
                        Ok(_) => return true,
                        Err(new_state) => {
                            state = new_state;
                            continue;
                        }
                    }
                }
            }
            match self.state().compare_exchange(
                state,
                state | WaitQueue::WAITING_FLAG,
                AcqRel,
                Acquire,
            ) {
                Ok(_) => break,
                Err(new_state) => state = new_state,
            }
        }
        entries.push_back(entry.clone());
        false
    }

    /// Removes a wait queue entry from the wait queue.
    ///
    /// Returns `true` if the entry had already been granted.
    fn remove_wait_queue_entry(&self, entry: &Arc<Entry>) -> bool {
        let mut entries = self.wait_queue().lock();
        let Some(pos) = entries.iter().position(|e| Arc::ptr_eq(e, entry)) else {
            // Results are only set while the wait queue is locked.
            debug_assert!(entry.try_result().is_some());
            return true;
        };
        entries.remove(pos);

        // The removed entry may have been blocking the ones behind it.
        self.process_wait_queue(&mut entries);
        false
    }

    /// Withdraws a wait queue entry whose owner is gone, giving back anything it was granted.
    fn cancel_wait_queue_entry(&self, entry: &Arc<Entry>) {
        if self.remove_wait_queue_entry(entry) && entry.opcode().holds_resources() {
            let _: Result<usize, Infallible> =
                self.update(|data| Ok(self.revoke(data, entry.opcode())));
        }
    }

    /// Updates the state data, and then hands resources over to waiting entries.
    ///
    /// Returns the previous data, or the error returned by `f` with the state unchanged.
    fn update<E, F: FnMut(usize) -> Result<usize, E>>(&self, mut f: F) -> Result<usize, E> {
        let mut state = self.state().load(Acquire);
        while state & WaitQueue::WAITING_FLAG == 0 {
            let data = f(state)?;
            match self
                .state()
                .compare_exchange(state, data, AcqRel, Acquire)
            {
                Ok(_) => return Ok(state),
                Err(new_state) => state = new_state,
            }
        }

        let mut entries = self.wait_queue().lock();
        state = self.state().load(Acquire);
        loop {
            let data = f(state & WaitQueue::DATA_MASK)?;
            debug_assert_eq!(data & WaitQueue::WAITING_FLAG, 0);
            let next_state = (state & WaitQueue::WAITING_FLAG) | data;
            match self
                .state()
                .compare_exchange(state, next_state, AcqRel, Acquire)
            {
                Ok(_) => break,
                Err(new_state) => state = new_state,
            }
        }
        self.process_wait_queue(&mut entries);
        Ok(state & WaitQueue::DATA_MASK)
    }

    /// Grants as many entries as possible from the front of the locked wait queue.
    fn process_wait_queue(&self, entries: &mut VecDeque<Arc<Entry>>) {
        let mut state = self.state().load(Acquire);
        loop {
            let mut data = state & WaitQueue::DATA_MASK;
            let mut granted = 0;
            for entry in entries.iter() {
                let Some(next_data) = self.grant(data, entry.opcode()) else {
                    break;
                };
                data = next_data;
                granted += 1;
            }
            let next_state = if granted == entries.len() {
                data
            } else {
                data | WaitQueue::WAITING_FLAG
            };
            match self
                .state()
                .compare_exchange(state, next_state, AcqRel, Acquire)
            {
                Ok(_) => {
                    for entry in entries.drain(..granted) {
                        entry.set_result(Entry::GRANTED);
                    }
                    return;
                }
                Err(new_state) => state = new_state,
            }
        }
    }
}

/// Waits for the desired resources asynchronously.
///
/// Dropping the future before it completes withdraws the request.
pub(crate) struct AsyncWait<'s, S: SyncPrimitive> {
    /// The synchronization primitive to wait on.
    sync_primitive: &'s S,
    /// Operation type.
    opcode: Opcode,
    /// The wait queue entry once pushed.
    entry: Option<Arc<Entry>>,
}

impl<S: SyncPrimitive> Future for AsyncWait<'_, S> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let entry = if let Some(entry) = this.entry.take() {
            entry
        } else {
            if this.sync_primitive.try_grant(this.opcode).is_ok() {
                return Poll::Ready(());
            }
            let entry = Entry::new_async(this.opcode);
            if this.sync_primitive.push_wait_queue_entry(&entry) {
                return Poll::Ready(());
            }
            entry
        };
        if entry.poll_result_async(cx).is_ready() {
            return Poll::Ready(());
        }
        this.entry.replace(entry);
        Poll::Pending
    }
}

impl<S: SyncPrimitive> Drop for AsyncWait<'_, S> {
    #[inline]
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.sync_primitive.cancel_wait_queue_entry(&entry);
        }
    }
}

/// Converts an optional timeout into a deadline; `None` and unrepresentable deadlines mean
/// waiting indefinitely.
#[inline]
pub(crate) fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|timeout| Instant::now().checked_add(timeout))
}

/// Returns `true` if the deadline has passed.
#[inline]
pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
