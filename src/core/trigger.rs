//! Verification trigger: single-fire promotion to the terminal event
//!
//! Two latches: `fire` decides which path (stable, manual, fallback) starts
//! verification, `terminal` guarantees the terminal callback runs once.
//! The fallback path may still reach `terminal` after a primary fire whose
//! remote verification failed.

use tokio::time::Instant;
use tracing::debug;
use crate::core::timer::Latch;
use crate::types::FireReason;

#[derive(Debug, Default)]
pub struct VerificationTrigger {
    fire: Latch,
    terminal: Latch,
    fired_by: Option<FireReason>,
    triggered_at: Option<Instant>,
    resolved_at: Option<Instant>,
}

impl VerificationTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// First caller wins; later calls are no-ops returning false
    pub fn try_fire(&mut self, reason: FireReason) -> bool {
        if !self.fire.trip() {
            debug!(%reason, fired_by = ?self.fired_by, "fire ignored, latch already tripped");
            return false;
        }
        self.fired_by = Some(reason);
        self.triggered_at = Some(Instant::now());
        true
    }

    /// Claim the terminal event; true only once per session
    pub fn try_resolve(&mut self) -> bool {
        if !self.terminal.trip() {
            return false;
        }
        self.resolved_at = Some(Instant::now());
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fire.is_tripped()
    }

    pub fn is_resolved(&self) -> bool {
        self.terminal.is_tripped()
    }

    pub fn fired_by(&self) -> Option<FireReason> {
        self.fired_by
    }

    pub fn triggered_at(&self) -> Option<Instant> {
        self.triggered_at
    }

    pub fn resolved_at(&self) -> Option<Instant> {
        self.resolved_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fire_wins() {
        let mut trigger = VerificationTrigger::new();
        assert!(trigger.try_fire(FireReason::Stable));
        assert!(!trigger.try_fire(FireReason::Fallback));
        assert!(!trigger.try_fire(FireReason::Manual));
        assert_eq!(trigger.fired_by(), Some(FireReason::Stable));
        assert!(trigger.triggered_at().is_some());
    }

    #[test]
    fn test_resolve_once() {
        let mut trigger = VerificationTrigger::new();
        trigger.try_fire(FireReason::Manual);
        assert!(trigger.try_resolve());
        assert!(!trigger.try_resolve());
        assert!(trigger.is_resolved());
    }

    #[test]
    fn test_fresh_trigger_has_fresh_latches() {
        let mut first = VerificationTrigger::new();
        first.try_fire(FireReason::Stable);
        first.try_resolve();

        let mut second = VerificationTrigger::new();
        assert!(!second.is_fired());
        assert!(second.try_fire(FireReason::Stable));
        assert!(second.try_resolve());
    }
}
