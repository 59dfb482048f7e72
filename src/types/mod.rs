//! Core types for Facegate

mod state;
mod signals;
mod status;
mod output;
mod reason;
mod policy;
mod error;
mod event;

pub use state::SessionState;
pub use signals::{VerificationKind, FaceBounds, FaceTick, LocationFix, SignalPayload, RawSignal, SourceEvent};
pub use status::{StatusSnapshot, SubCheck};
pub use output::StatusOutput;
pub use reason::{ReasonCode, FireReason};
pub use policy::FallbackPolicy;
pub use error::{VerifyError, CapabilityError, SourceError, ConfigError};
pub use event::{Verified, SessionFailure, SessionOutcome, SessionEvent, SessionReport};
