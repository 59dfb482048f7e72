//! Stability timer: readiness must hold for the dwell time before promotion
//!
//! State transitions:
//! - NOT_READY → PENDING: ready observation, dwell timer armed
//! - PENDING → STABLE: dwell elapsed with no not-ready in between
//! - PENDING/STABLE → NOT_READY: any not-ready observation (timer cancelled)
//!
//! STABLE is reached at most once per ready streak.

use tokio::time::{Duration, Instant};
use crate::core::timer::CancellableTimer;
use crate::types::ReasonCode;

/// Where the current ready streak stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityPhase {
    NotReady,
    Pending { since: Instant },
    Stable { since: Instant },
}

/// Effect of one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityChange {
    /// New streak, timer armed
    Started,
    /// Streak continues
    Accumulating,
    /// Streak broken
    Reset,
    /// Nothing to do
    Unchanged,
}

impl StabilityChange {
    pub fn reason(&self, ready: bool) -> ReasonCode {
        match self {
            StabilityChange::Started | StabilityChange::Accumulating => {
                ReasonCode::V003_STABILITY_ACCUMULATING
            }
            StabilityChange::Reset => ReasonCode::V003_STABILITY_RESET,
            StabilityChange::Unchanged if ready => ReasonCode::V001_READY,
            StabilityChange::Unchanged => ReasonCode::V001_NOT_READY,
        }
    }
}

/// Debounce over readiness judgements
#[derive(Debug)]
pub struct StabilityTimer {
    dwell: Duration,
    phase: StabilityPhase,
    timer: CancellableTimer,
}

impl StabilityTimer {
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            phase: StabilityPhase::NotReady,
            timer: CancellableTimer::new(),
        }
    }

    /// Fold one readiness judgement into the streak
    pub fn observe(&mut self, ready: bool) -> StabilityChange {
        match (ready, self.phase) {
            (true, StabilityPhase::NotReady) => {
                self.phase = StabilityPhase::Pending { since: Instant::now() };
                self.timer.arm(self.dwell);
                StabilityChange::Started
            }
            (true, StabilityPhase::Pending { .. }) => StabilityChange::Accumulating,
            (true, StabilityPhase::Stable { .. }) => StabilityChange::Unchanged,
            (false, StabilityPhase::NotReady) => StabilityChange::Unchanged,
            (false, _) => {
                self.phase = StabilityPhase::NotReady;
                self.timer.cancel();
                StabilityChange::Reset
            }
        }
    }

    /// Completes when the pending streak reaches the dwell time
    pub async fn promoted(&mut self) {
        self.timer.expired().await;
        let since = match self.phase {
            StabilityPhase::Pending { since } => since,
            _ => Instant::now(),
        };
        self.phase = StabilityPhase::Stable { since };
    }

    /// Stop tracking; used once the latch has tripped
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.phase = StabilityPhase::NotReady;
    }

    pub fn phase(&self) -> StabilityPhase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.phase, StabilityPhase::Pending { .. })
    }

    pub fn dwell(&self) -> Duration {
        self.dwell
    }

    /// Length of the current ready streak in milliseconds
    pub fn stable_ms(&self) -> u64 {
        match self.phase {
            StabilityPhase::NotReady => 0,
            StabilityPhase::Pending { since } | StabilityPhase::Stable { since } => {
                Instant::now().duration_since(since).as_millis() as u64
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    const DWELL: Duration = Duration::from_millis(600);

    async fn promotes_within(stability: &mut StabilityTimer, limit: Duration) -> bool {
        timeout(limit, stability.promoted()).await.is_ok()
    }

    #[test]
    fn test_initial_phase_is_not_ready() {
        let stability = StabilityTimer::new(DWELL);
        assert_eq!(stability.phase(), StabilityPhase::NotReady);
        assert_eq!(stability.stable_ms(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_held_past_dwell_promotes() {
        let mut stability = StabilityTimer::new(DWELL);
        assert_eq!(stability.observe(true), StabilityChange::Started);

        assert!(promotes_within(&mut stability, DWELL + Duration::from_millis(1)).await);
        assert!(matches!(stability.phase(), StabilityPhase::Stable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_one_ms_before_dwell_resets() {
        let mut stability = StabilityTimer::new(DWELL);
        stability.observe(true);
        sleep(DWELL - Duration::from_millis(1)).await;
        assert_eq!(stability.observe(false), StabilityChange::Reset);

        assert!(!promotes_within(&mut stability, Duration::from_secs(5)).await);
        assert_eq!(stability.phase(), StabilityPhase::NotReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_ready_does_not_restart_streak() {
        let mut stability = StabilityTimer::new(DWELL);
        stability.observe(true);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(stability.observe(true), StabilityChange::Accumulating);
        assert_eq!(stability.stable_ms(), 300);

        // Still promotes at 600ms from the first ready, not from the second
        assert!(promotes_within(&mut stability, Duration::from_millis(301)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_reached_once_per_streak() {
        let mut stability = StabilityTimer::new(DWELL);
        stability.observe(true);
        stability.promoted().await;

        assert_eq!(stability.observe(true), StabilityChange::Unchanged);
        assert!(!promotes_within(&mut stability, Duration::from_secs(5)).await);

        // A fresh streak may promote again
        assert_eq!(stability.observe(false), StabilityChange::Reset);
        assert_eq!(stability.observe(true), StabilityChange::Started);
        assert!(promotes_within(&mut stability, DWELL + Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let mut stability = StabilityTimer::new(DWELL);
        stability.observe(true);
        stability.cancel();
        assert!(!promotes_within(&mut stability, Duration::from_secs(5)).await);
    }
}
