//! Cancellable timer and one-shot latch
//!
//! A session's event loop owns every timer. `arm()` schedules, `cancel()`
//! disarms, and `expired()` is polled from the loop's `select!`. A disarmed
//! timer never completes, so its branch simply stays quiet.

use std::future::pending;
use tokio::time::{sleep_until, Duration, Instant};

/// Single-deadline timer driven by the owner's event loop
#[derive(Debug, Default)]
pub struct CancellableTimer {
    deadline: Option<Instant>,
}

impl CancellableTimer {
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm (or re-arm) to fire `delay` from now
    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Disarm; returns whether it was armed
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completes once at the deadline and disarms. Pends forever while
    /// disarmed. Cancel-safe: dropping it mid-wait leaves the deadline intact.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}

/// One-shot latch: the first `trip()` wins, every later one is a no-op.
///
/// Checked and set inside one synchronous turn of the owning loop, so no
/// atomic is needed.
#[derive(Debug, Default)]
pub struct Latch {
    tripped: bool,
}

impl Latch {
    pub fn new() -> Self {
        Self { tripped: false }
    }

    /// True only for the first caller
    pub fn trip(&mut self) -> bool {
        if self.tripped {
            false
        } else {
            self.tripped = true;
            true
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }
}
