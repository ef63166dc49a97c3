//! Thread stress tests for the admission gate.
//!
//! Validates under contention:
//! - No double-admission past the hard limit
//! - Counters return to zero at quiescence
//! - Every queued waiter is eventually served exactly once

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use quota_gate::Quota;

#[test]
fn no_double_admission_under_contention() {
    const MAX: usize = 4;
    const THREADS: usize = 16;
    const ITERATIONS: usize = 200;

    let quota = Quota::new(MAX);
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let quota = quota.clone();
            let holders = Arc::clone(&holders);
            let peak = Arc::clone(&peak);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERATIONS {
                    if let Ok(admission) = quota.attach() {
                        let now = holders.fetch_add(1, Ordering::AcqRel) + 1;
                        assert!(now <= MAX, "admitted {now} holders past max {MAX}");
                        peak.fetch_max(now, Ordering::AcqRel);
                        thread::yield_now();
                        holders.fetch_sub(1, Ordering::AcqRel);
                        drop(admission);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(quota.used(), 0);
    assert_eq!(quota.waiting(), 0);
    // With 16 threads hammering a gate of 4, the limit should actually be hit
    assert!(peak.load(Ordering::Acquire) >= 2);
}

#[test]
fn counters_return_to_zero_at_quiescence() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 500;

    let quota = Quota::new(3);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let quota = quota.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERATIONS {
                    if let Ok(admission) = quota.attach() {
                        drop(admission);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(quota.used(), 0);
    assert_eq!(quota.waiting(), 0);
}

#[test]
fn every_waiter_is_served_exactly_once() {
    const MAX: usize = 2;
    const THREADS: usize = 12;

    let quota = Quota::new(MAX);
    let admitted = Arc::new(AtomicUsize::new(0));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let quota = quota.clone();
            let admitted = Arc::clone(&admitted);
            let concurrent = Arc::clone(&concurrent);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();

                // Either admitted inline or handed a unit through the queue
                let (sender, receiver) = mpsc::channel();
                let reservation = match quota.attach_with_callback(move |reservation| {
                    sender.send(reservation).unwrap();
                }) {
                    Ok(admission) => admission.into_reservation(),
                    Err(_) => receiver
                        .recv_timeout(Duration::from_secs(10))
                        .expect("queued waiter was never handed a unit"),
                };

                let now = concurrent.fetch_add(1, Ordering::AcqRel) + 1;
                assert!(now <= MAX, "hand-off admitted {now} holders past max {MAX}");
                admitted.fetch_add(1, Ordering::AcqRel);
                thread::yield_now();
                concurrent.fetch_sub(1, Ordering::AcqRel);
                drop(reservation);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::Acquire), THREADS);
    assert_eq!(quota.used(), 0);
    assert_eq!(quota.waiting(), 0);
}

#[test]
fn runtime_reconfiguration_is_safe_under_load() {
    const THREADS: usize = 6;
    const ITERATIONS: usize = 300;

    let quota = Quota::new(4);
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let quota = quota.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERATIONS {
                    if let Ok(admission) = quota.attach() {
                        thread::yield_now();
                        drop(admission);
                    }
                }
            })
        })
        .collect();

    let reconfigurer = {
        let quota = quota.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..ITERATIONS {
                quota.set_max(1 + i % 8);
                quota.set_soft(i % 4);
            }
        })
    };

    for handle in workers {
        handle.join().unwrap();
    }
    reconfigurer.join().unwrap();

    assert_eq!(quota.used(), 0);
    assert_eq!(quota.waiting(), 0);
}
