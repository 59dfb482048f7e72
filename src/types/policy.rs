//! FallbackPolicy: per-session timing configuration, immutable once a session starts

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::{
    FACE_DWELL_MS, LOCATION_DWELL_MS, TOTAL_TIMEOUT_MS, FALLBACK_DELAY_MS,
    VERIFY_THROTTLE_MS, REMOTE_VERIFY_ATTEMPTS, LOCATION_ACCURACY_THRESHOLD_M,
    LOCATION_SIGNAL_TIMEOUT_MS,
};
use crate::types::{ConfigError, VerificationKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackPolicy {
    /// Readiness must hold this long, uninterrupted, before promotion
    pub dwell_ms: u64,
    /// Delay between remote verify attempts
    pub verify_throttle_ms: u64,
    /// Budget before the fallback path engages
    pub total_timeout_ms: u64,
    /// Grace delay between fallback engagement and the fallback fire
    pub fallback_delay_ms: u64,
    /// Denied / unavailable sources engage the fallback immediately
    pub sample_mode_enabled: bool,
    /// Fallback ends in FailedFallback instead of success
    pub strict_mode: bool,
    /// Remote verify attempts before handing over to the fallback
    pub remote_attempts: u32,
    /// Location only: maximum accepted accuracy radius
    pub accuracy_threshold_m: f64,
    /// Report NoSignalWithinTimeout if nothing arrives this long after start
    pub signal_timeout_ms: Option<u64>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::face()
    }
}

impl FallbackPolicy {
    /// Defaults for face verification
    pub fn face() -> Self {
        Self {
            dwell_ms: FACE_DWELL_MS,
            verify_throttle_ms: VERIFY_THROTTLE_MS,
            total_timeout_ms: TOTAL_TIMEOUT_MS,
            fallback_delay_ms: FALLBACK_DELAY_MS,
            sample_mode_enabled: false,
            strict_mode: false,
            remote_attempts: REMOTE_VERIFY_ATTEMPTS,
            accuracy_threshold_m: LOCATION_ACCURACY_THRESHOLD_M,
            signal_timeout_ms: None,
        }
    }

    /// Defaults for location verification
    pub fn location() -> Self {
        Self {
            dwell_ms: LOCATION_DWELL_MS,
            signal_timeout_ms: Some(LOCATION_SIGNAL_TIMEOUT_MS),
            ..Self::face()
        }
    }

    /// Defaults for a variant
    pub fn for_kind(kind: VerificationKind) -> Self {
        match kind {
            VerificationKind::Face => Self::face(),
            VerificationKind::Location => Self::location(),
        }
    }

    /// Overlay a partial JSON object on the defaults for `kind`.
    /// Explicit `null` clears an optional field.
    pub fn merged(kind: VerificationKind, partial: serde_json::Value) -> Result<Self, ConfigError> {
        let serde_json::Value::Object(fields) = partial else {
            return Err(ConfigError::InvalidPolicy("policy must be a JSON object".into()));
        };
        let mut base = serde_json::to_value(Self::for_kind(kind))
            .map_err(|e| ConfigError::InvalidPolicy(e.to_string()))?;
        if let serde_json::Value::Object(base_fields) = &mut base {
            base_fields.extend(fields);
        }
        let policy: Self =
            serde_json::from_value(base).map_err(|e| ConfigError::InvalidPolicy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load from a JSON file; missing fields take the defaults for `kind`
    pub fn from_file(path: impl AsRef<Path>, kind: VerificationKind) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let partial: serde_json::Value = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::merged(kind, partial)
    }

    /// Reject configurations that could never resolve or never stabilize
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dwell_ms == 0 {
            return Err(ConfigError::InvalidPolicy("dwell_ms must be > 0".into()));
        }
        if self.total_timeout_ms == 0 {
            return Err(ConfigError::InvalidPolicy("total_timeout_ms must be > 0".into()));
        }
        if self.remote_attempts == 0 {
            return Err(ConfigError::InvalidPolicy("remote_attempts must be >= 1".into()));
        }
        if !(self.accuracy_threshold_m.is_finite() && self.accuracy_threshold_m > 0.0) {
            return Err(ConfigError::InvalidPolicy(
                "accuracy_threshold_m must be a positive number".into(),
            ));
        }
        if self.signal_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidPolicy("signal_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_delay_ms)
    }

    pub fn verify_throttle(&self) -> Duration {
        Duration::from_millis(self.verify_throttle_ms)
    }

    /// Latest time the terminal event can fire on the default policy
    pub fn worst_case_ms(&self) -> u64 {
        self.total_timeout_ms + self.fallback_delay_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_defaults_differ() {
        let face = FallbackPolicy::face();
        let location = FallbackPolicy::location();
        assert_eq!(face.dwell_ms, FACE_DWELL_MS);
        assert_eq!(location.dwell_ms, LOCATION_DWELL_MS);
        assert!(face.signal_timeout_ms.is_none());
        assert!(location.signal_timeout_ms.is_some());
        assert!(!face.strict_mode);
    }

    #[test]
    fn test_validate_rejects_zero_dwell() {
        let policy = FallbackPolicy { dwell_ms: 0, ..FallbackPolicy::face() };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_accuracy() {
        let policy = FallbackPolicy { accuracy_threshold_m: f64::NAN, ..FallbackPolicy::location() };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let policy: FallbackPolicy =
            serde_json::from_str(r#"{"dwell_ms": 900, "strict_mode": true}"#).unwrap();
        assert_eq!(policy.dwell_ms, 900);
        assert!(policy.strict_mode);
        assert_eq!(policy.total_timeout_ms, TOTAL_TIMEOUT_MS);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_merge_keeps_kind_defaults() {
        let policy = FallbackPolicy::merged(VerificationKind::Location, serde_json::json!({"strict_mode": true})).unwrap();
        assert!(policy.strict_mode);
        assert_eq!(policy.dwell_ms, LOCATION_DWELL_MS);
        assert_eq!(policy.signal_timeout_ms, Some(LOCATION_SIGNAL_TIMEOUT_MS));

        let face = FallbackPolicy::merged(VerificationKind::Face, serde_json::json!({"strict_mode": true})).unwrap();
        assert_eq!(face.dwell_ms, FACE_DWELL_MS);
        assert!(face.signal_timeout_ms.is_none());
    }

    #[test]
    fn test_merge_null_clears_signal_timeout() {
        let policy =
            FallbackPolicy::merged(VerificationKind::Location, serde_json::json!({"signal_timeout_ms": null})).unwrap();
        assert!(policy.signal_timeout_ms.is_none());
        assert_eq!(policy.dwell_ms, LOCATION_DWELL_MS);
    }

    #[test]
    fn test_merge_rejects_bad_values() {
        assert!(FallbackPolicy::merged(VerificationKind::Face, serde_json::json!({"dwell_ms": 0})).is_err());
        assert!(FallbackPolicy::merged(VerificationKind::Face, serde_json::json!({"dwell_ms": "slow"})).is_err());
        assert!(FallbackPolicy::merged(VerificationKind::Face, serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_worst_case_bound() {
        let policy = FallbackPolicy::face();
        assert_eq!(policy.worst_case_ms(), TOTAL_TIMEOUT_MS + FALLBACK_DELAY_MS);
    }
}
