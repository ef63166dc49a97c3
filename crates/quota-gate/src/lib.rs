//! Quota Gate - in-process admission control for concurrent resource holders
//!
//! This crate provides a single concurrency-limiting primitive, the admission
//! gate:
//!
//! - **Hard limit**: at most `max` reservations outstanding at once (0 = unlimited)
//! - **Soft limit**: an advisory threshold below `max`; crossing it still admits
//!   but signals pressure so callers can slow down
//! - **Callback hand-off**: refused acquirers may queue a callback that is handed
//!   a freed unit directly, FIFO, instead of blocking a thread
//! - **Lock-free fast path**: attach and release touch only atomics; one narrow
//!   mutex guards the waiter queue
//!
//! # Quick Start
//!
//! ```rust
//! use quota_gate::{Admission, Quota};
//!
//! // At most 10 concurrent holders, pressure signal from the 8th onward.
//! let quota = Quota::new(10);
//! quota.set_soft(8);
//!
//! match quota.attach() {
//!     Ok(Admission::Admitted(reservation)) => {
//!         // Full capacity; do the work, reservation releases on drop.
//!         drop(reservation);
//!     }
//!     Ok(Admission::AdmittedSoft(reservation)) => {
//!         // Still admitted, but the gate is under pressure.
//!         drop(reservation);
//!     }
//!     Err(_) => {
//!         // Refused; retry, queue a callback, or reject upstream.
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod future;
mod quota;

pub use quota::{Admission, Quota, Reservation};

use std::time::Duration;

/// Admission error.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// The hard limit is reached; the attach was refused.
    ///
    /// `used` and `max` are a racy snapshot taken at refusal time.
    #[error("quota exhausted: {used} of {max} units in use")]
    Exhausted {
        /// Units in use when the attach was refused.
        used: usize,
        /// Hard limit at that moment.
        max: usize,
    },

    /// An async acquisition waited longer than the caller allowed.
    #[error("admission wait exceeded maximum {max_wait:?}")]
    WaitExceeded {
        /// Maximum wait the caller allowed.
        max_wait: Duration,
    },

    /// Invalid gate configuration.
    #[error("invalid quota configuration: {0}")]
    InvalidConfig(String),
}

/// Gate state snapshot.
///
/// Every field is a relaxed atomic read; the snapshot is not a consistent
/// cross-field view and is intended for reporting, not decisions.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QuotaState {
    /// Hard limit (0 = unlimited).
    pub max: usize,

    /// Soft advisory threshold (0 = disabled).
    pub soft: usize,

    /// Reservations currently outstanding.
    pub used: usize,

    /// Callbacks queued for hand-off.
    pub waiting: usize,

    /// Whether the hard limit is currently reached.
    pub is_exhausted: bool,
}

/// Configuration for an admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuotaConfig {
    /// Hard limit on concurrent reservations (0 = unlimited).
    pub max: usize,

    /// Soft advisory threshold (0 = disabled).
    #[serde(default)]
    pub soft: usize,
}

impl QuotaConfig {
    /// Create a configuration with the given hard limit and no soft threshold.
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self { max, soft: 0 }
    }

    /// Set the soft advisory threshold.
    #[must_use]
    pub const fn with_soft(mut self, soft: usize) -> Self {
        self.soft = soft;
        self
    }

    /// A gate that never refuses.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(0)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error if `soft` exceeds `max` while `max` is bounded.
    pub fn validate(&self) -> Result<(), QuotaError> {
        if self.max != 0 && self.soft > self.max {
            return Err(QuotaError::InvalidConfig(format!(
                "soft limit {} exceeds hard limit {}",
                self.soft, self.max
            )));
        }
        Ok(())
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}
