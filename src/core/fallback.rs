//! Fallback/timeout controller: guaranteed forward progress
//!
//! Armed at session start for `total_timeout_ms`. When it elapses, or when a
//! degraded condition engages it early, a grace delay of `fallback_delay_ms`
//! starts; when the grace elapses the session fires through the fallback path.
//! Degrade, don't block: denied permission, missing hardware and failed remote
//! verification all end here.

use tokio::time::{Duration, Instant};
use tracing::{debug, info};
use crate::core::timer::CancellableTimer;
use crate::types::{FallbackPolicy, VerifyError};

/// What the controller wants the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackEvent {
    /// Total timeout elapsed without a terminal event; grace started
    TimedOut,
    /// Grace elapsed; fire the fallback path now
    Fire,
}

#[derive(Debug)]
pub struct FallbackController {
    total_timeout: Duration,
    delay: Duration,
    sample_mode: bool,
    timeout: CancellableTimer,
    grace: CancellableTimer,
    /// Degraded condition seen before engagement
    pending_cause: Option<VerifyError>,
    /// Why the grace delay was started
    engaged: Option<VerifyError>,
}

impl FallbackController {
    pub fn new(policy: &FallbackPolicy) -> Self {
        Self {
            total_timeout: policy.total_timeout(),
            delay: policy.fallback_delay(),
            sample_mode: policy.sample_mode_enabled,
            timeout: CancellableTimer::new(),
            grace: CancellableTimer::new(),
            pending_cause: None,
            engaged: None,
        }
    }

    /// Start the total timeout; called once at session start
    pub fn arm(&mut self) {
        self.timeout.arm(self.total_timeout);
    }

    /// Start the grace delay now. Returns false if already engaged.
    pub fn engage(&mut self, cause: VerifyError) -> bool {
        if self.engaged.is_some() {
            return false;
        }
        info!(cause = %cause, delay_ms = self.delay.as_millis() as u64, "fallback engaged");
        self.timeout.cancel();
        self.grace.arm(self.delay);
        self.engaged = Some(cause);
        true
    }

    /// Permission denied / hardware absent. Sample mode engages at once,
    /// otherwise the cause waits for the total timeout.
    pub fn on_degraded(&mut self, cause: VerifyError) -> bool {
        if self.sample_mode {
            return self.engage(cause);
        }
        debug!(cause = %cause, "degraded source, waiting for total timeout");
        if self.pending_cause.is_none() {
            self.pending_cause = Some(cause);
        }
        false
    }

    /// Next timer event; pends while nothing is armed
    pub async fn next(&mut self) -> FallbackEvent {
        tokio::select! {
            _ = self.timeout.expired() => FallbackEvent::TimedOut,
            _ = self.grace.expired() => FallbackEvent::Fire,
        }
    }

    /// Handle the total timeout: engage with the earliest degraded cause,
    /// or with NoSignalWithinTimeout when the source never degraded
    pub fn on_timed_out(&mut self) -> VerifyError {
        let cause = self
            .pending_cause
            .take()
            .unwrap_or(VerifyError::NoSignalWithinTimeout(self.total_timeout.as_millis() as u64));
        self.engage(cause.clone());
        cause
    }

    /// Disarm both timers (terminal event or teardown)
    pub fn cancel(&mut self) {
        self.timeout.cancel();
        self.grace.cancel();
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.is_some()
    }

    pub fn engaged_cause(&self) -> Option<&VerifyError> {
        self.engaged.as_ref()
    }

    /// When the fallback fire is due if nothing else resolves first
    pub fn deadline(&self) -> Option<Instant> {
        match (self.grace.deadline(), self.timeout.deadline()) {
            (Some(grace), _) => Some(grace),
            (None, Some(timeout)) => Some(timeout + self.delay),
            (None, None) => None,
        }
    }
}
