//! Signal structures produced by capabilities

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Which verification variant a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    /// Live face verification (camera)
    Face,
    /// Location verification (GPS)
    Location,
}

impl VerificationKind {
    /// Path segment used by the remote verify endpoint
    pub fn endpoint(&self) -> &'static str {
        match self {
            VerificationKind::Face => "face",
            VerificationKind::Location => "location",
        }
    }
}

impl std::fmt::Display for VerificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

/// Normalized face bounding box (0.0-1.0 in frame coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FaceBounds {
    /// Center point of the box
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One camera frame tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceTick {
    /// Number of faces the detector reported
    pub faces_present: u32,
    /// Optional per-face boxes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounds: Vec<FaceBounds>,
    /// Optional captured frame (sent to the remote verifier)
    #[serde(skip)]
    pub capture: Option<Vec<u8>>,
}

impl FaceTick {
    /// Tick with a face count and nothing else
    pub fn count(faces_present: u32) -> Self {
        Self {
            faces_present,
            bounds: Vec::new(),
            capture: None,
        }
    }

    /// Attach a base64-encoded frame
    pub fn with_image(mut self, image: &str) -> Result<Self, base64::DecodeError> {
        self.capture = Some(STANDARD.decode(image)?);
        Ok(self)
    }
}

/// One GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f64,
}

impl LocationFix {
    /// Coordinates in range and accuracy a finite, non-negative radius
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.accuracy_m.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.accuracy_m >= 0.0
    }
}

/// Payload of one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Face(FaceTick),
    /// `fix: None` means no fix yet
    Location { fix: Option<LocationFix> },
}

/// One observation from a source; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub payload: SignalPayload,
    pub timestamp: DateTime<Utc>,
}

impl RawSignal {
    /// Face tick stamped now
    pub fn face(tick: FaceTick) -> Self {
        Self {
            payload: SignalPayload::Face(tick),
            timestamp: Utc::now(),
        }
    }

    /// Face tick with only a count
    pub fn faces(count: u32) -> Self {
        Self::face(FaceTick::count(count))
    }

    /// Location observation stamped now
    pub fn location(fix: Option<LocationFix>) -> Self {
        Self {
            payload: SignalPayload::Location { fix },
            timestamp: Utc::now(),
        }
    }

    /// Variant this signal belongs to
    pub fn kind(&self) -> VerificationKind {
        match self.payload {
            SignalPayload::Face(_) => VerificationKind::Face,
            SignalPayload::Location { .. } => VerificationKind::Location,
        }
    }
}

/// What a Signal Source pushes into its session
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Runtime permission granted, acquisition started
    PermissionGranted,
    Signal(RawSignal),
    /// Emitted once, then the source produces nothing more
    PermissionDenied,
    /// Hardware absent or unsupported; emitted once, then nothing more
    Unavailable,
}
