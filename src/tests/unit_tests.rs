use std::future::Future;
use std::pin::pin;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicI64, AtomicUsize};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Waker};
use std::thread;
use std::time::{Duration, Instant};

use crate::sync_primitive::SyncPrimitive;
use crate::wait_queue::WaitQueue;
use crate::{
    AdmissionSemaphore, AtomicCounter, AutoResetGate, CancellationSource, CountdownLatch,
    DataMutex, Error, ManualResetGate, Mutex, PhaseBarrier,
};

/// Returns the number of queued waiters.
fn queued<S: SyncPrimitive>(sync_primitive: &S) -> usize {
    sync_primitive.wait_queue().lock().len()
}

/// Spins until `condition` holds.
fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        thread::sleep(Duration::from_micros(100));
    }
}

#[test]
fn counter_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 1024 };

    let counter = Arc::new(AtomicCounter::new(-7));

    let mut threads = Vec::new();
    for i in 0..num_threads {
        let counter = counter.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                if i % 4 == 0 {
                    counter.decrement();
                } else {
                    counter.increment();
                }
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    let decrements = num_threads / 4 * num_iters;
    let increments = num_threads * num_iters - decrements;
    assert_eq!(counter.get(), -7 + increments - decrements);
}

#[test]
fn counter_wrap() {
    let counter = AtomicCounter::new(i64::MAX);
    assert_eq!(counter.increment(), i64::MIN);
    assert_eq!(counter.sub(1), i64::MAX);
    assert_eq!(counter.swap(3), i64::MAX);
    assert_eq!(counter.compare_exchange(4, 5), Err(3));
}

#[test]
fn mutex_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };

    let mutex: Arc<Mutex> = Arc::new(Mutex::new());
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let mutex = mutex.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                assert_eq!(mutex.acquire(None), Ok(true));
                assert!(mutex.is_held_by_current_thread());
                assert_eq!(check.fetch_add(1, Relaxed), 0);
                thread::sleep(Duration::from_micros(1));
                check.fetch_sub(1, Relaxed);
                assert_eq!(mutex.release(), Ok(()));
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(check.load(Relaxed), 0);
    assert!(!mutex.is_locked());
}

#[test]
fn mutex_not_owner() {
    let mutex: Arc<Mutex> = Arc::new(Mutex::new());
    assert_eq!(mutex.acquire(None), Ok(true));

    let mutex_clone = mutex.clone();
    let thread = thread::spawn(move || {
        assert!(!mutex_clone.is_held_by_current_thread());
        mutex_clone.release()
    });
    assert_eq!(thread.join().unwrap(), Err(Error::NotOwner));

    assert!(mutex.is_locked());
    assert!(matches!(
        mutex.acquire(None),
        Err(Error::InvalidOperation(_))
    ));
    assert_eq!(mutex.release(), Ok(()));
}

#[test]
fn mutex_timeout() {
    let mutex: Arc<Mutex> = Arc::new(Mutex::new());
    assert_eq!(mutex.acquire(None), Ok(true));

    let mutex_clone = mutex.clone();
    let timed_out = thread::spawn(move || mutex_clone.acquire(Some(Duration::from_millis(10))));
    assert_eq!(timed_out.join().unwrap(), Ok(false));
    assert_eq!(queued(&*mutex), 0);

    let mutex_clone = mutex.clone();
    let waiter = thread::spawn(move || {
        let acquired = mutex_clone.acquire(None);
        let released = mutex_clone.release();
        (acquired, released)
    });
    wait_until(|| queued(&*mutex) == 1);

    assert_eq!(mutex.release(), Ok(()));
    assert_eq!(waiter.join().unwrap(), (Ok(true), Ok(())));
    assert!(!mutex.is_locked());
}

#[test]
fn data_mutex_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };

    let data: Arc<DataMutex<usize>> = Arc::new(DataMutex::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let data = data.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                *data.lock() += 1;
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(*data.lock(), num_threads * num_iters);
    assert!(!data.is_locked());
}

#[test]
fn semaphore_admission() {
    let num_threads = 10;
    let num_iters = if cfg!(miri) { 4 } else { 64 };

    let semaphore: Arc<AdmissionSemaphore> = Arc::new(AdmissionSemaphore::new(4).unwrap());
    let check = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let semaphore = semaphore.clone();
        let check = check.clone();
        let peak = peak.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                semaphore.acquire();
                let inside = check.fetch_add(1, Relaxed) + 1;
                assert!(inside <= 4);
                peak.fetch_max(inside, Relaxed);
                thread::sleep(Duration::from_micros(10));
                check.fetch_sub(1, Relaxed);
                assert!(semaphore.release().is_ok());
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(check.load(Relaxed), 0);
    assert!(peak.load(Relaxed) <= 4);
    assert_eq!(semaphore.available(), 4);
}

#[test]
fn semaphore_many_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };
    let capacity = 8;

    let semaphore: Arc<AdmissionSemaphore> =
        Arc::new(AdmissionSemaphore::with_available(capacity, 0).unwrap());
    let check = Arc::new(AtomicUsize::new(capacity));

    let mut threads = Vec::new();
    for i in 0..num_threads {
        let semaphore = semaphore.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            let count = i % 4 + 1;
            for _ in 0..num_iters {
                assert!(semaphore.acquire_many(count).is_ok());
                assert!(check.fetch_add(count, Relaxed) + count <= capacity);
                thread::sleep(Duration::from_micros(1));
                check.fetch_sub(count, Relaxed);
                assert!(semaphore.release_many(count).is_ok());
            }
        }));
    }

    thread::sleep(Duration::from_millis(1));
    check.fetch_sub(capacity, Relaxed);
    assert_eq!(semaphore.release_many(capacity), Ok(0));

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert_eq!(semaphore.available(), capacity);
}

#[test]
fn semaphore_overflow() {
    let semaphore: AdmissionSemaphore = AdmissionSemaphore::new(4).unwrap();
    assert_eq!(semaphore.release(), Err(Error::Overflow { capacity: 4 }));

    assert!(semaphore.acquire_many(2).is_ok());
    assert_eq!(
        semaphore.release_many(3),
        Err(Error::Overflow { capacity: 4 })
    );
    assert_eq!(semaphore.available(), 2);
    assert_eq!(semaphore.release_many(2), Ok(2));

    assert!(matches!(
        semaphore.acquire_many(5),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        AdmissionSemaphore::<crate::DefaultConfig>::with_available(2, 3),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn semaphore_no_barging() {
    let semaphore: Arc<AdmissionSemaphore> =
        Arc::new(AdmissionSemaphore::with_available(2, 0).unwrap());

    let semaphore_clone = semaphore.clone();
    let waiter = thread::spawn(move || semaphore_clone.acquire_many(2));
    wait_until(|| queued(&*semaphore) == 1);

    assert_eq!(semaphore.release(), Ok(0));
    assert_eq!(semaphore.available(), 1);
    assert!(!semaphore.try_acquire(Some(Duration::ZERO)));

    assert_eq!(semaphore.release(), Ok(1));
    assert_eq!(waiter.join().unwrap(), Ok(()));
    assert_eq!(semaphore.available(), 0);
    assert_eq!(semaphore.state().load(Relaxed) & WaitQueue::WAITING_FLAG, 0);
}

#[test]
fn semaphore_timeout_unblocks_followers() {
    let semaphore: Arc<AdmissionSemaphore> =
        Arc::new(AdmissionSemaphore::with_available(4, 1).unwrap());

    let semaphore_clone = semaphore.clone();
    let greedy = thread::spawn(move || {
        semaphore_clone.try_acquire_many(4, Some(Duration::from_millis(500)))
    });
    wait_until(|| queued(&*semaphore) == 1);

    let semaphore_clone = semaphore.clone();
    let modest = thread::spawn(move || semaphore_clone.try_acquire(None));
    wait_until(|| queued(&*semaphore) == 2);

    assert_eq!(greedy.join().unwrap(), Ok(false));
    assert!(modest.join().unwrap());
    assert_eq!(semaphore.available(), 0);
}

#[test]
fn semaphore_cancel_granted_future() {
    let semaphore: AdmissionSemaphore = AdmissionSemaphore::with_available(1, 0).unwrap();
    let mut cx = Context::from_waker(Waker::noop());

    {
        let mut future = pin!(semaphore.acquire_async());
        assert!(future.as_mut().poll(&mut cx).is_pending());
        assert_eq!(queued(&semaphore), 1);

        assert_eq!(semaphore.release(), Ok(0));
        assert_eq!(semaphore.available(), 0);
    }

    assert_eq!(queued(&semaphore), 0);
    assert_eq!(semaphore.available(), 1);
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn semaphore_async() {
    let num_tasks = 64;

    let semaphore: Arc<AdmissionSemaphore> =
        Arc::new(AdmissionSemaphore::with_available(4, 0).unwrap());
    let check = Arc::new(AtomicUsize::new(4));

    let mut tasks = Vec::new();
    for i in 0..num_tasks {
        let semaphore = semaphore.clone();
        let check = check.clone();
        tasks.push(tokio::spawn(async move {
            let count = if i % 8 == 0 {
                assert!(semaphore.acquire_many_async(2).await.is_ok());
                2
            } else {
                semaphore.acquire_async().await;
                1
            };
            assert!(check.fetch_add(count, Relaxed) + count <= 4);
            check.fetch_sub(count, Relaxed);
            assert!(semaphore.release_many(count).is_ok());
        }));
    }

    tokio::time::sleep(Duration::from_millis(25)).await;
    check.fetch_sub(4, Relaxed);
    assert_eq!(semaphore.release_many(4), Ok(0));

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert_eq!(semaphore.available(), 4);
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn semaphore_async_timeout() {
    let semaphore: Arc<AdmissionSemaphore> =
        Arc::new(AdmissionSemaphore::with_available(2, 0).unwrap());

    for _ in 0..16 {
        let timed_out =
            tokio::time::timeout(Duration::from_millis(1), semaphore.acquire_async()).await;
        assert!(timed_out.is_err());
    }
    assert_eq!(queued(&*semaphore), 0);

    assert_eq!(semaphore.release_many(2), Ok(0));
    assert!(semaphore.acquire_many_async(2).await.is_ok());
    assert_eq!(semaphore.available(), 0);
}

#[test]
fn auto_reset_gate_single_consumption() {
    let num_threads = 4;

    let gate = Arc::new(AutoResetGate::new(false));
    let passed = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let gate = gate.clone();
        let passed = passed.clone();
        threads.push(thread::spawn(move || {
            assert!(gate.wait(None));
            passed.fetch_add(1, Relaxed);
        }));
    }
    wait_until(|| queued(&*gate) == num_threads);

    gate.set();
    wait_until(|| passed.load(Relaxed) == 1);
    thread::sleep(Duration::from_millis(10));
    assert_eq!(passed.load(Relaxed), 1);
    assert_eq!(queued(&*gate), num_threads - 1);
    assert!(!gate.is_set());

    for _ in 1..num_threads {
        gate.set();
    }
    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(passed.load(Relaxed), num_threads);
    assert!(!gate.is_set());
}

#[test]
fn auto_reset_gate_sticky_signal() {
    let gate = AutoResetGate::default();
    assert!(!gate.wait(Some(Duration::from_millis(1))));

    gate.set();
    gate.set();
    assert!(gate.is_set());
    assert!(gate.wait(Some(Duration::ZERO)));
    assert!(!gate.wait(Some(Duration::ZERO)));

    gate.set();
    gate.reset();
    assert!(!gate.wait(Some(Duration::ZERO)));
}

#[test]
fn auto_reset_gate_cancel_granted_future() {
    let gate = AutoResetGate::new(false);
    let mut cx = Context::from_waker(Waker::noop());

    {
        let mut future = pin!(gate.wait_async());
        assert!(future.as_mut().poll(&mut cx).is_pending());

        gate.set();
        assert!(!gate.is_set());
    }

    assert!(gate.is_set());
    assert!(gate.wait(Some(Duration::ZERO)));
}

#[test]
fn manual_reset_gate_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };

    let gate = Arc::new(ManualResetGate::new(false));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let gate = gate.clone();
        threads.push(thread::spawn(move || gate.wait(None) && gate.wait(None)));
    }
    wait_until(|| queued(&*gate) == num_threads);

    gate.set();
    for thread in threads {
        assert!(thread.join().unwrap());
    }
    assert!(gate.is_set());

    gate.reset();
    assert!(!gate.is_set());
    assert!(!gate.wait(Some(Duration::from_millis(1))));
    assert_eq!(queued(&*gate), 0);
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn gates_async() {
    let num_tasks = 64;

    let auto = Arc::new(AutoResetGate::new(false));
    let manual = Arc::new(ManualResetGate::new(false));
    let passed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..num_tasks {
        let auto = auto.clone();
        let manual = manual.clone();
        let passed = passed.clone();
        tasks.push(tokio::spawn(async move {
            manual.wait_async().await;
            auto.wait_async().await;
            passed.fetch_add(1, Relaxed);
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(passed.load(Relaxed), 0);
    manual.set();

    for expected in 1..=num_tasks {
        auto.set();
        while passed.load(Relaxed) < expected {
            tokio::time::sleep(Duration::from_micros(100)).await;
        }
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(passed.load(Relaxed), num_tasks);
    assert!(!auto.is_set());
}

#[test]
fn latch_slowest_signaler() {
    let delays = [50, 30, 70, 90];

    let latch = Arc::new(CountdownLatch::new(delays.len()).unwrap());
    let started = Instant::now();

    let mut threads = Vec::new();
    for delay in delays {
        let latch = latch.clone();
        threads.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay));
            latch.signal()
        }));
    }

    assert!(latch.wait(None));
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert!(latch.is_set());

    let completions = threads
        .into_iter()
        .map(|thread| thread.join().unwrap())
        .filter(|result| *result == Ok(true))
        .count();
    assert_eq!(completions, 1);
    assert!(matches!(latch.signal(), Err(Error::InvalidOperation(_))));
}

#[test]
fn latch_signal_many() {
    let latch = CountdownLatch::new(5).unwrap();

    assert!(matches!(
        latch.signal_many(6),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        latch.signal_many(0),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(latch.remaining(), 5);

    assert_eq!(latch.signal_many(3), Ok(false));
    assert_eq!(latch.try_add_count(1), Ok(true));
    assert_eq!(latch.signal_many(3), Ok(true));
    assert_eq!(latch.try_add_count(1), Ok(false));
    assert!(latch.add_count(1).is_err());
    assert_eq!(latch.initial_count(), 5);
}

#[test]
fn latch_reset_cycles() {
    let latch = Arc::new(CountdownLatch::new(2).unwrap());

    for _ in 0..4 {
        let latch_clone = latch.clone();
        let waiter = thread::spawn(move || latch_clone.wait(None));
        wait_until(|| queued(&*latch) == 1);

        assert!(matches!(latch.reset(2), Err(Error::InvalidOperation(_))));
        assert_eq!(latch.signal(), Ok(false));
        assert_eq!(latch.signal(), Ok(true));
        assert!(waiter.join().unwrap());

        assert!(latch.reset(2).is_ok());
        assert_eq!(latch.remaining(), 2);
        assert!(!latch.wait(Some(Duration::ZERO)));
    }
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn latch_async() {
    let num_tasks = 32;

    let latch = Arc::new(CountdownLatch::new(num_tasks).unwrap());
    let done = Arc::new(ManualResetGate::new(false));

    let mut tasks = Vec::new();
    for i in 0..num_tasks {
        let latch = latch.clone();
        let done = done.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                latch.wait_async().await;
                done.wait_async().await;
            } else {
                assert!(latch.signal().is_ok());
                assert!(latch.signal().is_ok());
            }
        }));
    }

    latch.wait_async().await;
    done.set();
    for task in tasks {
        task.await.unwrap();
    }
    assert!(latch.is_set());
}

#[test]
fn barrier_phases() {
    let num_phases = 4;

    let phases = Arc::new(StdMutex::new(Vec::new()));
    let phases_clone = phases.clone();
    let barrier = Arc::new(PhaseBarrier::with_action(3, move |barrier| {
        let phase = barrier.current_phase();
        phases_clone.lock().unwrap().push(phase);
        if phase == 2 {
            return Err("phase 2 failed".into());
        }
        Ok(())
    }));

    assert_eq!(barrier.add_participants(2), Ok(0));
    assert_eq!(barrier.remove_participant(), Ok(()));
    assert_eq!(barrier.participant_count(), 4);

    let faults = Arc::new(StdMutex::new(Vec::new()));
    let mut threads = Vec::new();
    for _ in 0..4 {
        let barrier = barrier.clone();
        let faults = faults.clone();
        threads.push(thread::spawn(move || {
            for phase in 0..num_phases {
                match barrier.signal_and_wait(None) {
                    Ok(released) => {
                        assert!(released);
                        assert_ne!(phase, 2);
                    }
                    Err(Error::PhaseFault(fault)) => {
                        assert_eq!(phase, 2);
                        faults.lock().unwrap().push(fault);
                    }
                    Err(error) => panic!("unexpected error: {error}"),
                }
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(*phases.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(barrier.current_phase(), num_phases);

    let faults = faults.lock().unwrap();
    assert_eq!(faults.len(), 4);
    assert!(faults.iter().all(|fault| fault.phase() == 2));
    assert!(faults.iter().all(|fault| *fault == faults[0]));
    assert_eq!(faults[0].cause().to_string(), "phase 2 failed");
}

#[test]
fn barrier_action_panic() {
    let barrier = Arc::new(PhaseBarrier::with_action(2, |barrier| {
        assert_ne!(barrier.current_phase(), 0, "no action in phase zero");
        Ok(())
    }));

    let barrier_clone = barrier.clone();
    let thread = thread::spawn(move || barrier_clone.signal_and_wait(None));
    let result = barrier.signal_and_wait(None);

    for result in [result, thread.join().unwrap()] {
        let Err(Error::PhaseFault(fault)) = result else {
            panic!("expected a phase fault");
        };
        assert_eq!(fault.phase(), 0);
        assert!(fault.cause().to_string().contains("no action in phase zero"));
    }

    let barrier_clone = barrier.clone();
    let thread = thread::spawn(move || barrier_clone.signal_and_wait(None));
    assert_eq!(barrier.signal_and_wait(None), Ok(true));
    assert_eq!(thread.join().unwrap(), Ok(true));
    assert_eq!(barrier.current_phase(), 2);
}

#[test]
fn barrier_timeout_withdraws_arrival() {
    let barrier = Arc::new(PhaseBarrier::new(2));

    assert_eq!(
        barrier.signal_and_wait(Some(Duration::from_millis(10))),
        Ok(false)
    );
    assert_eq!(barrier.participants_remaining(), 2);
    assert_eq!(barrier.current_phase(), 0);

    let barrier_clone = barrier.clone();
    let thread = thread::spawn(move || barrier_clone.signal_and_wait(Some(Duration::from_secs(60))));
    wait_until(|| barrier.participants_remaining() == 1);

    assert_eq!(barrier.signal_and_wait(None), Ok(true));
    assert_eq!(thread.join().unwrap(), Ok(true));
    assert_eq!(barrier.current_phase(), 1);
}

#[test]
fn barrier_invalid_operations() {
    let barrier = Arc::new(PhaseBarrier::new(2));

    let barrier_clone = barrier.clone();
    let thread = thread::spawn(move || barrier_clone.signal_and_wait(None));
    wait_until(|| barrier.participants_remaining() == 1);

    assert!(matches!(
        barrier.add_participant(),
        Err(Error::InvalidOperation(_))
    ));
    assert!(matches!(
        barrier.remove_participant(),
        Err(Error::InvalidOperation(_))
    ));
    assert_eq!(barrier.signal_and_wait(None), Ok(true));
    assert_eq!(thread.join().unwrap(), Ok(true));

    assert!(matches!(
        barrier.remove_participants(3),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        barrier.add_participants(0),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(barrier.remove_participants(2), Ok(()));
    assert!(matches!(
        barrier.signal_and_wait(None),
        Err(Error::InvalidOperation(_))
    ));
    assert_eq!(barrier.add_participant(), Ok(1));
    assert_eq!(barrier.signal_and_wait(None), Ok(true));

    let nested = PhaseBarrier::with_action(1, |barrier| {
        assert!(matches!(
            barrier.signal_and_wait(None),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            barrier.add_participant(),
            Err(Error::InvalidOperation(_))
        ));
        Ok(())
    });
    assert_eq!(nested.signal_and_wait(None), Ok(true));
}

#[test]
fn barrier_dispose() {
    let num_threads = 2;

    let barrier = Arc::new(PhaseBarrier::new(num_threads + 1));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let barrier = barrier.clone();
        threads.push(thread::spawn(move || barrier.signal_and_wait(None)));
    }
    wait_until(|| barrier.participants_remaining() == 1);

    barrier.dispose();
    barrier.dispose();
    for thread in threads {
        assert_eq!(thread.join().unwrap(), Err(Error::Disposed));
    }

    assert!(barrier.is_disposed());
    assert_eq!(barrier.signal_and_wait(None), Err(Error::Disposed));
    assert_eq!(barrier.add_participant(), Err(Error::Disposed));
}

#[test]
fn cancellation_sync() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };

    let source = CancellationSource::new();
    let rounds = Arc::new(AtomicI64::new(0));

    let mut threads = Vec::new();
    for i in 0..num_threads {
        let token = source.token();
        let rounds = rounds.clone();
        threads.push(thread::spawn(move || {
            if i % 2 == 0 {
                return token.wait_cancelled(None);
            }
            while !token.is_cancelled() {
                rounds.fetch_add(1, Relaxed);
                thread::yield_now();
            }
            true
        }));
    }

    thread::sleep(Duration::from_millis(10));
    assert!(!source.is_cancelled());
    source.cancel();
    source.cancel();

    for thread in threads {
        assert!(thread.join().unwrap());
    }
    assert!(source.is_cancelled());
    assert!(source.token().is_cancelled());
}

#[cfg_attr(miri, ignore = "Tokio is not compatible with Miri")]
#[tokio::test(flavor = "multi_thread", worker_threads = 16)]
async fn cancellation_async() {
    let num_tasks = 64;

    let source = CancellationSource::new();

    let mut tasks = Vec::new();
    for _ in 0..num_tasks {
        let token = source.token();
        tasks.push(tokio::spawn(async move {
            token.cancelled_async().await;
            assert!(token.is_cancelled());
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    source.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
