//! Admission Gate Operation-Sequence Fuzz Target
//!
//! Drives an arbitrary sequence of attach / release / reconfigure / queue
//! operations against one gate and checks the counter invariants after every
//! step. Goal: ensure no panics and that `used`/`waiting` always match the
//! reservations and callbacks actually outstanding.

#![no_main]

use std::sync::{Arc, Mutex};

use libfuzzer_sys::fuzz_target;
use quota_gate::{Quota, Reservation};

fuzz_target!(|data: &[u8]| {
    let quota = Quota::new(4);
    let mut held: Vec<Reservation> = Vec::new();
    let handed: Arc<Mutex<Vec<Reservation>>> = Arc::new(Mutex::new(Vec::new()));
    let mut queued = 0_usize;

    let mut bytes = data.iter().copied();
    while let Some(op) = bytes.next() {
        match op % 5 {
            0 => {
                if let Ok(admission) = quota.attach() {
                    held.push(admission.into_reservation());
                }
            }
            1 => {
                // Releasing may hand the unit to a queued callback, which
                // lands it in `handed` instead of returning it to the pool.
                if held.pop().is_some() && queued > 0 {
                    queued -= 1;
                }
            }
            2 => {
                let sink = Arc::clone(&handed);
                match quota.attach_with_callback(move |reservation| {
                    sink.lock().unwrap().push(reservation);
                }) {
                    Ok(admission) => held.push(admission.into_reservation()),
                    Err(_) => queued += 1,
                }
            }
            3 => {
                quota.set_max(usize::from(bytes.next().unwrap_or(0) % 8));
            }
            _ => {
                quota.set_soft(usize::from(bytes.next().unwrap_or(0) % 8));
            }
        }

        held.extend(handed.lock().unwrap().drain(..));
        assert_eq!(quota.used(), held.len());
        assert_eq!(quota.waiting(), queued);
    }

    // Drain everything; hand-offs keep resurfacing units until the queue is
    // empty, then releases fall through to plain decrements.
    while !held.is_empty() {
        if held.pop().is_some() && queued > 0 {
            queued -= 1;
        }
        held.extend(handed.lock().unwrap().drain(..));
    }
    assert_eq!(quota.used(), 0);
    assert_eq!(quota.waiting(), 0);
});
