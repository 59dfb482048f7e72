//! Signal Source adapter and device capabilities
//!
//! A `Capability` wraps one device resource (camera, GPS). `SignalSource`
//! turns it into a stream of `SourceEvent`s: permission first, then signals.
//! Denied permission or missing hardware is reported once and the stream
//! ends. The capability is released exactly once, when the pump task ends
//! or is aborted by `stop()`.
//!
//! Implementations:
//! - `DeviceCapability`: a real device pushes permission and signals through a `DeviceFeed`
//! - `ScriptedCapability`: deterministic replay of timed steps
//! - `UnsupportedCapability`: platform without the hardware

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};
use crate::SIGNAL_BUFFER;
use crate::types::{
    CapabilityError, ConfigError, FaceBounds, FaceTick, LocationFix, RawSignal, SourceError,
    SourceEvent, VerificationKind,
};

/// One device resource behind a uniform interface
#[async_trait]
pub trait Capability: Send {
    fn kind(&self) -> VerificationKind;

    /// Ask for the runtime permission. `Ok(false)` is a denial,
    /// `Err` means the hardware is absent or unsupported.
    async fn request_permission(&mut self) -> Result<bool, CapabilityError>;

    /// Next observation; `None` ends the stream
    async fn next_signal(&mut self) -> Option<RawSignal>;

    /// Give the resource back (close camera, stop GPS watch)
    fn release(&mut self);
}

/// Releases the wrapped capability when dropped, including on task abort
struct Held(Box<dyn Capability>);

impl Drop for Held {
    fn drop(&mut self) {
        debug!(kind = %self.0.kind(), "releasing capability");
        self.0.release();
    }
}

async fn pump(capability: Box<dyn Capability>, sink: mpsc::Sender<SourceEvent>) {
    let mut held = Held(capability);
    let kind = held.0.kind();

    match held.0.request_permission().await {
        Ok(true) => {
            debug!(%kind, "permission granted");
            if sink.send(SourceEvent::PermissionGranted).await.is_err() {
                return;
            }
        }
        Ok(false) => {
            info!(%kind, "permission denied");
            let _ = sink.send(SourceEvent::PermissionDenied).await;
            return;
        }
        Err(e) => {
            warn!(%kind, error = %e, "capability unavailable");
            let _ = sink.send(SourceEvent::Unavailable).await;
            return;
        }
    }

    while let Some(signal) = held.0.next_signal().await {
        if sink.send(SourceEvent::Signal(signal)).await.is_err() {
            break;
        }
    }
    debug!(%kind, "signal stream ended");
}

/// Start-once, stop-idempotent wrapper around a capability
pub struct SignalSource {
    kind: VerificationKind,
    capability: Option<Box<dyn Capability>>,
    pump: Option<JoinHandle<()>>,
    started: bool,
}

impl std::fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSource")
            .field("kind", &self.kind)
            .field("started", &self.started)
            .field("running", &self.pump.is_some())
            .finish()
    }
}

impl SignalSource {
    pub fn new(capability: Box<dyn Capability>) -> Self {
        Self {
            kind: capability.kind(),
            capability: Some(capability),
            pump: None,
            started: false,
        }
    }

    pub fn kind(&self) -> VerificationKind {
        self.kind
    }

    /// Request permission and begin pushing events into `sink`. Once only.
    pub fn start(&mut self, sink: mpsc::Sender<SourceEvent>) -> Result<(), SourceError> {
        if self.started {
            return Err(SourceError::AlreadyStarted);
        }
        let capability = self.capability.take().ok_or(SourceError::Released)?;
        self.started = true;
        self.pump = Some(tokio::spawn(pump(capability, sink)));
        Ok(())
    }

    /// Stop producing and release the resource. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        // Never started: nothing was acquired, just drop it
        self.capability = None;
    }

    pub fn is_running(&self) -> bool {
        self.pump.as_ref().map(|p| !p.is_finished()).unwrap_or(false)
    }
}

// =============================================================================
// DEVICE FEED
// =============================================================================

/// Permission outcome reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAnswer {
    Granted,
    Denied,
    Unavailable,
}

/// Host-side handle through which a real device reports to its session
#[derive(Debug, Clone)]
pub struct DeviceFeed {
    kind: VerificationKind,
    permission: Arc<watch::Sender<Option<PermissionAnswer>>>,
    signals: mpsc::Sender<RawSignal>,
    released: Arc<AtomicBool>,
}

/// Why a feed rejected input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("permission already answered")]
    AlreadyAnswered,

    #[error("expected a {expected} signal, got {got}")]
    WrongKind {
        expected: VerificationKind,
        got: VerificationKind,
    },

    #[error("permission not granted")]
    NotGranted,

    #[error("session no longer accepts signals")]
    Closed,
}

impl DeviceFeed {
    pub fn kind(&self) -> VerificationKind {
        self.kind
    }

    /// Report the permission outcome; only the first answer counts
    pub fn answer_permission(&self, answer: PermissionAnswer) -> Result<(), FeedError> {
        let accepted = self.permission.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(answer);
                true
            } else {
                false
            }
        });
        if accepted {
            Ok(())
        } else {
            Err(FeedError::AlreadyAnswered)
        }
    }

    /// Push one observation from the device
    pub async fn push(&self, signal: RawSignal) -> Result<(), FeedError> {
        if signal.kind() != self.kind {
            return Err(FeedError::WrongKind {
                expected: self.kind,
                got: signal.kind(),
            });
        }
        if self.is_released() {
            return Err(FeedError::Closed);
        }
        if *self.permission.borrow() != Some(PermissionAnswer::Granted) {
            return Err(FeedError::NotGranted);
        }
        self.signals.send(signal).await.map_err(|_| FeedError::Closed)
    }

    /// The session released the device
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// Capability fed by a real device through a `DeviceFeed`
pub struct DeviceCapability {
    kind: VerificationKind,
    permission: watch::Receiver<Option<PermissionAnswer>>,
    signals: mpsc::Receiver<RawSignal>,
    released: Arc<AtomicBool>,
}

impl DeviceCapability {
    /// Capability plus the feed the device writes into
    pub fn new(kind: VerificationKind) -> (Self, DeviceFeed) {
        let (permission_tx, permission_rx) = watch::channel(None);
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let released = Arc::new(AtomicBool::new(false));
        let capability = Self {
            kind,
            permission: permission_rx,
            signals: signal_rx,
            released: released.clone(),
        };
        let feed = DeviceFeed {
            kind,
            permission: Arc::new(permission_tx),
            signals: signal_tx,
            released,
        };
        (capability, feed)
    }
}

#[async_trait]
impl Capability for DeviceCapability {
    fn kind(&self) -> VerificationKind {
        self.kind
    }

    async fn request_permission(&mut self) -> Result<bool, CapabilityError> {
        let answer = self
            .permission
            .wait_for(|answer| answer.is_some())
            .await
            .map_err(|_| CapabilityError::FeedClosed)?;
        match *answer {
            Some(PermissionAnswer::Granted) => Ok(true),
            Some(PermissionAnswer::Denied) => Ok(false),
            _ => Err(CapabilityError::Unavailable("device reported no hardware".into())),
        }
    }

    async fn next_signal(&mut self) -> Option<RawSignal> {
        self.signals.recv().await
    }

    fn release(&mut self) {
        self.signals.close();
        self.released.store(true, Ordering::Release);
    }
}

// =============================================================================
// SCRIPTED
// =============================================================================

/// Permission outcome of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPermission {
    #[default]
    Granted,
    Denied,
    Unavailable,
}

/// Observation in a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ScriptSignal {
    Faces {
        count: u32,
        #[serde(default)]
        bounds: Vec<FaceBounds>,
        /// Base64 frame handed to the remote verifier
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },
    Fix {
        latitude: f64,
        longitude: f64,
        accuracy_m: f64,
    },
    NoFix,
}

impl ScriptSignal {
    fn to_raw(&self) -> RawSignal {
        match self {
            ScriptSignal::Faces { count, bounds, image } => {
                let tick = FaceTick {
                    faces_present: *count,
                    bounds: bounds.clone(),
                    capture: None,
                };
                let tick = match image {
                    Some(image) => tick.clone().with_image(image).unwrap_or_else(|e| {
                        warn!(error = %e, "script frame is not base64, dropping it");
                        tick
                    }),
                    None => tick,
                };
                RawSignal::face(tick)
            }
            ScriptSignal::Fix { latitude, longitude, accuracy_m } => RawSignal::location(Some(LocationFix {
                latitude: *latitude,
                longitude: *longitude,
                accuracy_m: *accuracy_m,
            })),
            ScriptSignal::NoFix => RawSignal::location(None),
        }
    }
}

/// One timed step, relative to source start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub signal: ScriptSignal,
}

/// Deterministic signal timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub kind: VerificationKind,
    #[serde(default)]
    pub permission: ScriptPermission,
    /// How long the simulated permission prompt takes
    #[serde(default)]
    pub permission_delay_ms: u64,
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new(kind: VerificationKind) -> Self {
        Self {
            kind,
            permission: ScriptPermission::Granted,
            permission_delay_ms: 0,
            steps: Vec::new(),
        }
    }

    pub fn permission(mut self, permission: ScriptPermission) -> Self {
        self.permission = permission;
        self
    }

    pub fn permission_delay_ms(mut self, delay: u64) -> Self {
        self.permission_delay_ms = delay;
        self
    }

    /// One step at `at_ms`
    pub fn at(mut self, at_ms: u64, signal: ScriptSignal) -> Self {
        self.steps.push(ScriptStep { at_ms, signal });
        self
    }

    /// The same step every `step_ms` from `from_ms` to `to_ms` inclusive
    pub fn every(mut self, from_ms: u64, to_ms: u64, step_ms: u64, signal: ScriptSignal) -> Self {
        let step_ms = step_ms.max(1);
        let mut at_ms = from_ms;
        while at_ms <= to_ms {
            self.steps.push(ScriptStep { at_ms, signal: signal.clone() });
            at_ms += step_ms;
        }
        self
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let script: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        script.validate()?;
        Ok(script)
    }

    /// Every attached frame must be valid base64
    pub fn validate(&self) -> Result<(), ConfigError> {
        for step in &self.steps {
            if let ScriptSignal::Faces { image: Some(image), .. } = &step.signal {
                FaceTick::count(0)
                    .with_image(image)
                    .map_err(|e| ConfigError::InvalidScript(format!("frame at {}ms: {}", step.at_ms, e)))?;
            }
        }
        Ok(())
    }
}

/// Replays a `Script` against the tokio clock
pub struct ScriptedCapability {
    script: Script,
    steps: VecDeque<ScriptStep>,
    origin: Option<Instant>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedCapability {
    pub fn new(script: Script) -> Self {
        let mut steps: Vec<ScriptStep> = script.steps.clone();
        steps.sort_by_key(|s| s.at_ms);
        Self {
            script,
            steps: steps.into(),
            origin: None,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counts `release()` calls; lets hosts check the resource came back once
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        self.releases.clone()
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn kind(&self) -> VerificationKind {
        self.script.kind
    }

    async fn request_permission(&mut self) -> Result<bool, CapabilityError> {
        let origin = *self.origin.get_or_insert_with(Instant::now);
        sleep_until(origin + Duration::from_millis(self.script.permission_delay_ms)).await;
        match self.script.permission {
            ScriptPermission::Granted => Ok(true),
            ScriptPermission::Denied => Ok(false),
            ScriptPermission::Unavailable => {
                Err(CapabilityError::Unavailable("scripted: no hardware".into()))
            }
        }
    }

    async fn next_signal(&mut self) -> Option<RawSignal> {
        let origin = *self.origin.get_or_insert_with(Instant::now);
        let step = self.steps.pop_front()?;
        sleep_until(origin + Duration::from_millis(step.at_ms)).await;
        Some(step.signal.to_raw())
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// UNSUPPORTED
// =============================================================================

/// Platform without the hardware
pub struct UnsupportedCapability {
    kind: VerificationKind,
}

impl UnsupportedCapability {
    pub fn new(kind: VerificationKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Capability for UnsupportedCapability {
    fn kind(&self) -> VerificationKind {
        self.kind
    }

    async fn request_permission(&mut self) -> Result<bool, CapabilityError> {
        Err(CapabilityError::Unavailable(format!("no {} hardware on this platform", self.kind)))
    }

    async fn next_signal(&mut self) -> Option<RawSignal> {
        None
    }

    fn release(&mut self) {}
}

// =============================================================================
// SELECTION
// =============================================================================

/// Which capability backs a session; chosen once at construction
#[derive(Debug, Clone)]
pub enum CapabilityConfig {
    /// Fed by a real device through a `DeviceFeed`
    Device,
    Scripted(Script),
    Unsupported,
}

impl CapabilityConfig {
    /// Build the capability, plus the feed when a device drives it
    pub fn build(self, kind: VerificationKind) -> Result<(Box<dyn Capability>, Option<DeviceFeed>), ConfigError> {
        match self {
            CapabilityConfig::Device => {
                let (capability, feed) = DeviceCapability::new(kind);
                Ok((Box::new(capability), Some(feed)))
            }
            CapabilityConfig::Scripted(script) => {
                if script.kind != kind {
                    return Err(ConfigError::KindMismatch {
                        component: "script",
                        expected: kind,
                        got: script.kind,
                    });
                }
                Ok((Box::new(ScriptedCapability::new(script)), None))
            }
            CapabilityConfig::Unsupported => Ok((Box::new(UnsupportedCapability::new(kind)), None)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
