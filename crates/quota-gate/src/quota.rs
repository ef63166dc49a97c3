//! The admission gate core.
//!
//! Counter bookkeeping is an atomic state machine: `attach` reserves a unit
//! with a CAS loop, release returns it with a fetch-sub. Only the waiter queue
//! sits behind a mutex, held for O(1) pushes and pops and never across a
//! callback invocation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{QuotaConfig, QuotaError, QuotaState};

type WaiterFn = Box<dyn FnOnce(Reservation) + Send + 'static>;

struct Shared {
    /// Hard limit (0 = unlimited).
    max: AtomicUsize,

    /// Soft advisory threshold (0 = disabled).
    soft: AtomicUsize,

    /// Reservations currently outstanding.
    used: AtomicUsize,

    /// Queued callbacks. Kept equal to `waiters.len()` so release can skip
    /// the lock entirely when nobody is waiting.
    waiting: AtomicUsize,

    /// FIFO hand-off queue.
    waiters: Mutex<VecDeque<WaiterFn>>,
}

/// Return one unit to the gate.
///
/// If a waiter is queued, the unit is handed to the oldest one directly:
/// `used` is left untouched and the waiter's reservation inherits it, so
/// exactly one waiter wakes per release and never re-enters the CAS race.
fn release(shared: &Arc<Shared>) {
    if shared.waiting.load(Ordering::Acquire) > 0 {
        let callback = {
            let mut waiters = shared.waiters.lock();
            waiters.pop_front().map(|callback| {
                shared.waiting.fetch_sub(1, Ordering::AcqRel);
                callback
            })
        };
        if let Some(callback) = callback {
            trace!("handing freed unit to oldest waiter");
            callback(Reservation {
                shared: Arc::clone(shared),
            });
            return;
        }
        // Raced with an enqueue that backed out, or the queue drained
        // concurrently; fall through to a plain decrement.
    }

    let previous = shared.used.fetch_sub(1, Ordering::AcqRel);
    assert!(previous > 0, "quota released more units than were attached");
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.used.load(Ordering::Relaxed),
            0,
            "gate dropped with outstanding reservations"
        );
        debug_assert_eq!(
            self.waiting.load(Ordering::Relaxed),
            0,
            "gate dropped with queued waiters"
        );
        debug_assert!(self.waiters.lock().is_empty());
    }
}

/// Admission gate bounding concurrent holders of a logical resource.
///
/// Cheap to clone; all clones share one set of counters and one waiter queue.
/// Reservations keep the shared state alive, so a gate cannot be torn down
/// out from under its holders.
#[derive(Clone)]
pub struct Quota {
    shared: Arc<Shared>,
}

/// Result of a granted attach.
///
/// Both variants carry a valid reservation; `AdmittedSoft` additionally tells
/// the caller the gate is past its soft threshold and under pressure.
#[must_use]
#[derive(Debug)]
pub enum Admission {
    /// Admitted with full capacity to spare.
    Admitted(Reservation),

    /// Admitted, but at or past the soft threshold.
    AdmittedSoft(Reservation),
}

impl Admission {
    /// Whether this admission crossed the soft threshold.
    #[must_use]
    pub const fn is_soft(&self) -> bool {
        matches!(self, Self::AdmittedSoft(_))
    }

    /// Unwrap the reservation, discarding the pressure signal.
    #[must_use]
    pub fn into_reservation(self) -> Reservation {
        match self {
            Self::Admitted(reservation) | Self::AdmittedSoft(reservation) => reservation,
        }
    }
}

/// One granted unit of capacity.
///
/// Released exactly once: explicitly via [`Reservation::detach`] or implicitly
/// on drop. Move semantics make a double release a compile error.
pub struct Reservation {
    shared: Arc<Shared>,
}

impl Reservation {
    /// Release the unit back to the gate.
    ///
    /// Equivalent to dropping the reservation; provided so release points can
    /// be explicit in caller code.
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        release(&self.shared);
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("used", &self.shared.used.load(Ordering::Relaxed))
            .finish()
    }
}

impl Quota {
    /// Create a gate with the given hard limit and no soft threshold.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max: AtomicUsize::new(max),
                soft: AtomicUsize::new(0),
                used: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                waiters: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Create a gate from a validated configuration.
    ///
    /// # Errors
    /// Returns [`QuotaError::InvalidConfig`] if the configuration is rejected
    /// by [`QuotaConfig::validate`].
    pub fn from_config(config: &QuotaConfig) -> Result<Self, QuotaError> {
        config.validate()?;
        let quota = Self::new(config.max);
        quota.set_soft(config.soft);
        Ok(quota)
    }

    /// Replace the hard limit.
    ///
    /// Visible to the next attach attempt; already-granted reservations are
    /// never evicted. Raising `max` does not drain the waiter queue: queued
    /// waiters are only ever served by the hand-off on release, so they sit
    /// until the next reservation is returned even if headroom opened up.
    pub fn set_max(&self, max: usize) {
        self.shared.max.store(max, Ordering::Release);
    }

    /// Replace the soft threshold (0 disables it).
    pub fn set_soft(&self, soft: usize) {
        self.shared.soft.store(soft, Ordering::Release);
    }

    /// Current hard limit. Racy by design.
    #[must_use]
    pub fn max(&self) -> usize {
        self.shared.max.load(Ordering::Relaxed)
    }

    /// Current soft threshold. Racy by design.
    #[must_use]
    pub fn soft(&self) -> usize {
        self.shared.soft.load(Ordering::Relaxed)
    }

    /// Reservations currently outstanding. Racy by design.
    #[must_use]
    pub fn used(&self) -> usize {
        self.shared.used.load(Ordering::Relaxed)
    }

    /// Callbacks currently queued. Racy by design.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared.waiting.load(Ordering::Relaxed)
    }

    /// Snapshot the gate counters.
    #[must_use]
    pub fn state(&self) -> QuotaState {
        let max = self.max();
        let used = self.used();
        QuotaState {
            max,
            soft: self.soft(),
            used,
            waiting: self.waiting(),
            is_exhausted: max != 0 && used >= max,
        }
    }

    /// Try to reserve one unit. Lock-free; never suspends.
    ///
    /// # Errors
    /// Returns [`QuotaError::Exhausted`] when `used` has reached `max`.
    pub fn attach(&self) -> Result<Admission, QuotaError> {
        let shared = &self.shared;
        let max = shared.max.load(Ordering::Acquire);
        let soft = shared.soft.load(Ordering::Acquire);
        let mut used = shared.used.load(Ordering::Acquire);

        loop {
            if max != 0 && used >= max {
                debug!(used, max, "attach refused, quota exhausted");
                return Err(QuotaError::Exhausted { used, max });
            }
            match shared.used.compare_exchange_weak(
                used,
                used + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => used = current,
            }
        }

        let reservation = Reservation {
            shared: Arc::clone(shared),
        };
        if soft != 0 && used >= soft {
            Ok(Admission::AdmittedSoft(reservation))
        } else {
            Ok(Admission::Admitted(reservation))
        }
    }

    /// Try to reserve one unit; on exhaustion, queue `callback` for hand-off.
    ///
    /// The callback is invoked exactly once, with a reservation that inherits
    /// a freed unit directly from a releasing holder (FIFO relative to other
    /// waiters). It runs on the releasing thread, with no gate lock held.
    ///
    /// There is no way to withdraw a queued callback; callers needing
    /// cancellation must check a flag of their own inside the callback.
    ///
    /// # Errors
    /// Returns [`QuotaError::Exhausted`] exactly as [`Quota::attach`] does;
    /// a caller of this entry point can assume the callback is now queued.
    pub fn attach_with_callback<F>(&self, callback: F) -> Result<Admission, QuotaError>
    where
        F: FnOnce(Reservation) + Send + 'static,
    {
        if let Ok(admission) = self.attach() {
            return Ok(admission);
        }

        let mut waiters = self.shared.waiters.lock();
        // Re-check under the lock: a release between the failed fast path and
        // the lock acquisition saw `waiting == 0` and returned its unit to the
        // pool, so enqueueing without this check could strand the waiter.
        match self.attach() {
            Ok(admission) => Ok(admission),
            Err(err) => {
                waiters.push_back(Box::new(callback));
                let waiting = self.shared.waiting.fetch_add(1, Ordering::AcqRel) + 1;
                drop(waiters);
                trace!(waiting, "admission waiter enqueued");
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quota")
            .field("max", &self.max())
            .field("soft", &self.soft())
            .field("used", &self.used())
            .field("waiting", &self.waiting())
            .finish()
    }
}
