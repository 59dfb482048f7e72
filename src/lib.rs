//! Facegate: verification orchestrator for onboarding flows
//!
//! Signal Source → Eligibility Evaluator → Stability Timer → Verification Trigger,
//! raced by the Fallback/Timeout Controller. Whichever path reaches the latch
//! first wins, and the session ends in exactly one terminal event.

pub mod core;
pub mod types;

// =============================================================================
// DWELL TIMES - readiness must hold this long before promotion
// =============================================================================

/// Face variant dwell (milliseconds)
pub const FACE_DWELL_MS: u64 = 600;

/// Location variant dwell (milliseconds)
/// GPS fixes arrive slower than camera frames, so the streak is longer
pub const LOCATION_DWELL_MS: u64 = 2000;

// =============================================================================
// FALLBACK - guaranteed forward progress
// =============================================================================

/// Total budget before the fallback path engages (milliseconds)
pub const TOTAL_TIMEOUT_MS: u64 = 10000;

/// Grace delay between fallback engagement and the fallback fire (milliseconds)
pub const FALLBACK_DELAY_MS: u64 = 2000;

/// Delay between remote verify attempts (milliseconds)
pub const VERIFY_THROTTLE_MS: u64 = 1000;

/// Remote verify attempts before handing over to the fallback path
pub const REMOTE_VERIFY_ATTEMPTS: u32 = 2;

// =============================================================================
// LOCATION
// =============================================================================

/// Maximum accepted fix accuracy radius (meters)
pub const LOCATION_ACCURACY_THRESHOLD_M: f64 = 100.0;

/// Local wait for a first fix before reporting NoSignalWithinTimeout (milliseconds)
pub const LOCATION_SIGNAL_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// PLUMBING
// =============================================================================

/// Buffered source events per session
pub const SIGNAL_BUFFER: usize = 64;

/// Buffered live events per session broadcast channel
pub const EVENT_BUFFER: usize = 100;

/// How long the API keeps a finished session around for GET / DELETE (milliseconds)
pub const SESSION_RETENTION_MS: u64 = 60000;

// =============================================================================
// VERSION
// =============================================================================

pub const VERSION: &str = "1.0.0";
