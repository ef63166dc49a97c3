//! Async acquisition over the callback slow path.
//!
//! The gate itself is synchronous and callback-driven; this adapter resolves a
//! queued callback into a future by routing the handed-off reservation through
//! a oneshot channel.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::{Admission, Quota, QuotaError, Reservation};

impl Quota {
    /// Acquire a reservation, waiting asynchronously for a hand-off if the
    /// gate is full.
    ///
    /// The pressure signal on a handed-off unit is advisory: it is recomputed
    /// from a racy counter read at resolution time rather than carried through
    /// the hand-off.
    pub async fn acquire(&self) -> Admission {
        let receiver = match self.attach_or_enqueue() {
            Ok(admission) => return admission,
            Err(receiver) => receiver,
        };
        let reservation = receiver
            .await
            .expect("gate state cannot drop while a handle still waits");
        self.classify(reservation)
    }

    /// Acquire a reservation, waiting at most `max_wait` for a hand-off.
    ///
    /// On timeout the queued callback is not withdrawn (the gate has no
    /// cancellation); when it eventually fires, the handed-off unit is
    /// released straight back to the gate because nobody is listening.
    ///
    /// # Errors
    /// Returns [`QuotaError::WaitExceeded`] if no unit was handed off within
    /// `max_wait`.
    pub async fn acquire_timeout(&self, max_wait: Duration) -> Result<Admission, QuotaError> {
        let receiver = match self.attach_or_enqueue() {
            Ok(admission) => return Ok(admission),
            Err(receiver) => receiver,
        };
        match tokio::time::timeout(max_wait, receiver).await {
            Ok(received) => {
                let reservation =
                    received.expect("gate state cannot drop while a handle still waits");
                Ok(self.classify(reservation))
            }
            Err(_) => Err(QuotaError::WaitExceeded { max_wait }),
        }
    }

    fn attach_or_enqueue(&self) -> Result<Admission, oneshot::Receiver<Reservation>> {
        let (sender, receiver) = oneshot::channel();
        self.attach_with_callback(move |reservation| {
            // A failed send means the receiver timed out and is gone; the
            // reservation drops here and the unit flows on to the next waiter.
            let _ = sender.send(reservation);
        })
        .map_err(|_| receiver)
    }

    fn classify(&self, reservation: Reservation) -> Admission {
        let soft = self.soft();
        if soft != 0 && self.used() > soft {
            Admission::AdmittedSoft(reservation)
        } else {
            Admission::Admitted(reservation)
        }
    }
}
