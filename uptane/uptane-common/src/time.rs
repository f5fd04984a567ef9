//! Clock capability, injected so expiry checks are testable.

use core::fmt;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time. Expiry checks are only
/// meaningful if the implementation is monotonic non-decreasing; the
/// default implementation relies on the system clock being
/// NTP-synchronized.
pub trait Clock: fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
