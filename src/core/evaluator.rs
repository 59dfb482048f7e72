//! Eligibility evaluators: RawSignal → StatusSnapshot
//!
//! Pure and synchronous. No history: the stability timer tracks streaks
//! separately. Evaluation never panics outward; anything that goes wrong
//! becomes a not-ready snapshot.
//!
//! Face policy is presence-only by default: every named sub-check passes
//! exactly when a face is present. Stricter products plug in their own
//! `FaceCheck`s rather than trusting the UI copy.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;
use crate::types::{
    FaceTick, LocationFix, RawSignal, SignalPayload, StatusSnapshot, SubCheck, VerificationKind,
    VerifyError,
};

pub const FACE_PROMPT: &str = "Position your face in the oval";
pub const FACE_HOLD_STILL: &str = "Face detected - hold still";
pub const LOCATION_ACQUIRING: &str = "Acquiring location…";
pub const LOCATION_ACQUIRED: &str = "Location acquired";

/// Maps one signal to a readiness judgement
pub trait Evaluator: Send + Sync {
    fn kind(&self) -> VerificationKind;

    fn evaluate(&self, signal: &RawSignal) -> StatusSnapshot;

    /// Snapshot shown before any signal has arrived
    fn initial(&self) -> StatusSnapshot;

    /// Nothing arrived within the local signal timeout
    fn stalled(&self) -> StatusSnapshot {
        StatusSnapshot::not_ready(self.kind(), "Still waiting for a signal")
    }

    /// The source degraded (permission denied, hardware missing)
    fn degraded(&self, error: &VerifyError) -> StatusSnapshot {
        let message = match error {
            VerifyError::PermissionDenied => "Permission denied - continuing without it",
            VerifyError::HardwareUnavailable => "Not supported on this device - continuing",
            _ => "Continuing verification",
        };
        StatusSnapshot::not_ready(self.kind(), message)
    }
}

/// Build the default evaluator for a variant
pub fn default_evaluator(kind: VerificationKind, accuracy_threshold_m: f64) -> Box<dyn Evaluator> {
    match kind {
        VerificationKind::Face => Box::new(FaceEvaluator::presence_only()),
        VerificationKind::Location => Box::new(LocationEvaluator::new(accuracy_threshold_m)),
    }
}

fn mismatched(expected: VerificationKind, signal: &RawSignal) -> StatusSnapshot {
    warn!(%expected, got = %signal.kind(), "signal of the wrong kind ignored");
    StatusSnapshot::not_ready(expected, "Unexpected signal")
}

// =============================================================================
// FACE
// =============================================================================

/// Pluggable face quality predicate
pub trait FaceCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn passes(&self, tick: &FaceTick) -> bool;

    /// What to tell the user when this check fails
    fn hint(&self) -> &'static str {
        FACE_PROMPT
    }
}

/// Passes whenever at least one face is present
pub struct PresenceCheck {
    name: &'static str,
    hint: &'static str,
}

impl PresenceCheck {
    pub fn new(name: &'static str, hint: &'static str) -> Self {
        Self { name, hint }
    }
}

impl FaceCheck for PresenceCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    fn passes(&self, tick: &FaceTick) -> bool {
        tick.faces_present >= 1
    }

    fn hint(&self) -> &'static str {
        self.hint
    }
}

/// Opt-in: first face's box center within `tolerance` of the frame center
pub struct CenteredCheck {
    pub tolerance: f64,
}

impl FaceCheck for CenteredCheck {
    fn name(&self) -> &'static str {
        "centered"
    }

    fn passes(&self, tick: &FaceTick) -> bool {
        match tick.bounds.first() {
            Some(bounds) => {
                let (cx, cy) = bounds.center();
                (cx - 0.5).abs() <= self.tolerance && (cy - 0.5).abs() <= self.tolerance
            }
            None => false,
        }
    }

    fn hint(&self) -> &'static str {
        "Center your face in the oval"
    }
}

pub struct FaceEvaluator {
    checks: Vec<Box<dyn FaceCheck>>,
}

impl Default for FaceEvaluator {
    fn default() -> Self {
        Self::presence_only()
    }
}

impl FaceEvaluator {
    /// obstruction / lighting / centering, all satisfied by presence alone
    pub fn presence_only() -> Self {
        Self {
            checks: vec![
                Box::new(PresenceCheck::new("obstruction_absent", "Remove anything covering your face")),
                Box::new(PresenceCheck::new("lighting_adequate", "Move to a brighter spot")),
                Box::new(PresenceCheck::new("centered", "Center your face in the oval")),
            ],
        }
    }

    pub fn with_checks(checks: Vec<Box<dyn FaceCheck>>) -> Self {
        Self { checks }
    }

    /// Replace a check by name, or add it
    pub fn replace_check(mut self, check: Box<dyn FaceCheck>) -> Self {
        match self.checks.iter().position(|c| c.name() == check.name()) {
            Some(index) => self.checks[index] = check,
            None => self.checks.push(check),
        }
        self
    }

    fn evaluate_tick(&self, tick: &FaceTick) -> StatusSnapshot {
        let present = tick.faces_present >= 1;
        let mut first_hint = None;
        let checks = self
            .checks
            .iter()
            .map(|check| {
                let passed = catch_unwind(AssertUnwindSafe(|| check.passes(tick))).unwrap_or_else(|_| {
                    warn!(check = check.name(), "face check panicked, treating as failed");
                    false
                });
                if !passed && first_hint.is_none() {
                    first_hint = Some(check.hint());
                }
                SubCheck::new(check.name(), passed)
            })
            .collect();

        let message = if !present {
            FACE_PROMPT
        } else {
            first_hint.unwrap_or(FACE_HOLD_STILL)
        };
        StatusSnapshot::new(VerificationKind::Face, present, checks, message)
    }
}

impl Evaluator for FaceEvaluator {
    fn kind(&self) -> VerificationKind {
        VerificationKind::Face
    }

    fn evaluate(&self, signal: &RawSignal) -> StatusSnapshot {
        match &signal.payload {
            SignalPayload::Face(tick) => self.evaluate_tick(tick),
            _ => mismatched(VerificationKind::Face, signal),
        }
    }

    fn initial(&self) -> StatusSnapshot {
        StatusSnapshot::not_ready(VerificationKind::Face, FACE_PROMPT)
    }

    fn stalled(&self) -> StatusSnapshot {
        StatusSnapshot::not_ready(VerificationKind::Face, "Waiting for the camera")
    }
}

// =============================================================================
// LOCATION
// =============================================================================

pub struct LocationEvaluator {
    accuracy_threshold_m: f64,
}

impl LocationEvaluator {
    pub fn new(accuracy_threshold_m: f64) -> Self {
        Self { accuracy_threshold_m }
    }

    fn evaluate_fix(&self, fix: Option<&LocationFix>) -> StatusSnapshot {
        let acquired = fix.is_some();
        let valid = fix.map(|f| f.is_valid()).unwrap_or(false);
        let accurate = valid && fix.map(|f| f.accuracy_m <= self.accuracy_threshold_m).unwrap_or(false);

        let checks = vec![
            SubCheck::new("permission_granted", true),
            SubCheck::new("fix_acquired", acquired && valid),
            SubCheck::new("accuracy_ok", accurate),
        ];
        let message = match fix {
            None => LOCATION_ACQUIRING.to_string(),
            Some(_) if !valid => "Invalid location fix".to_string(),
            Some(f) if !accurate => format!("Improving accuracy ({:.0}m)", f.accuracy_m),
            Some(_) => LOCATION_ACQUIRED.to_string(),
        };
        StatusSnapshot::new(VerificationKind::Location, acquired && valid, checks, message)
    }
}

impl Evaluator for LocationEvaluator {
    fn kind(&self) -> VerificationKind {
        VerificationKind::Location
    }

    fn evaluate(&self, signal: &RawSignal) -> StatusSnapshot {
        match &signal.payload {
            SignalPayload::Location { fix } => self.evaluate_fix(fix.as_ref()),
            _ => mismatched(VerificationKind::Location, signal),
        }
    }

    fn initial(&self) -> StatusSnapshot {
        StatusSnapshot::not_ready(VerificationKind::Location, LOCATION_ACQUIRING)
    }

    fn stalled(&self) -> StatusSnapshot {
        StatusSnapshot::new(
            VerificationKind::Location,
            false,
            vec![
                SubCheck::new("permission_granted", true),
                SubCheck::new("fix_acquired", false),
            ],
            "No location fix yet",
        )
    }

    fn degraded(&self, error: &VerifyError) -> StatusSnapshot {
        let permission_granted = !matches!(error, VerifyError::PermissionDenied);
        StatusSnapshot::new(
            VerificationKind::Location,
            false,
            vec![
                SubCheck::new("permission_granted", permission_granted),
                SubCheck::new("fix_acquired", false),
            ],
            match error {
                VerifyError::PermissionDenied => "Location permission denied - continuing",
                _ => "Location not available - continuing",
            },
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
