//! Core modules for Facegate

pub mod timer;
pub mod stability;
pub mod trigger;
pub mod fallback;
pub mod evaluator;
pub mod capability;
pub mod verifier;
pub mod observer;
pub mod session;
pub mod command;
pub mod api;

pub use timer::{CancellableTimer, Latch};
pub use stability::{StabilityChange, StabilityPhase, StabilityTimer};
pub use trigger::VerificationTrigger;
pub use fallback::{FallbackController, FallbackEvent};
pub use evaluator::{default_evaluator, CenteredCheck, Evaluator, FaceCheck, FaceEvaluator, LocationEvaluator, PresenceCheck};
pub use capability::{
    Capability, CapabilityConfig, DeviceCapability, DeviceFeed, FeedError, PermissionAnswer, Script, ScriptPermission,
    ScriptSignal, ScriptStep, ScriptedCapability, SignalSource, UnsupportedCapability,
};
pub use verifier::{verify_with_retries, HttpVerifier, RemoteOutcome, RemoteVerifier, VerifyRequest, VerifyResponse};
pub use observer::{BroadcastObserver, VerificationObserver};
pub use session::{SessionConfig, SessionHandle, VerificationSession};
pub use command::{CommandError, DeviceCommand};
pub use api::{create_router, run_server};
