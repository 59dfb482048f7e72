//! Remote verify client
//!
//! `POST {base}/verify/face` with `{ session_id, image }` (base64 frame) or
//! `POST {base}/verify/location` with the latest fix. Response shape:
//! `{ verified, message?, error? }`. Attempts are retried with a fixed delay;
//! exhausting them hands control to the fallback controller, never to the user.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::types::{RawSignal, SignalPayload, VerificationKind, VerifyError};

/// Request timeout for one attempt
const HTTP_TIMEOUT_SECS: u64 = 15;

/// Body of a verify call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub session_id: Uuid,
    pub kind: VerificationKind,
    /// Base64 frame (face)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl VerifyRequest {
    /// Build from the latest signal the session saw
    pub fn from_signal(session_id: Uuid, kind: VerificationKind, last: Option<&RawSignal>) -> Self {
        let mut request = Self {
            session_id,
            kind,
            image: None,
            latitude: None,
            longitude: None,
            accuracy_m: None,
        };
        match last.map(|s| &s.payload) {
            Some(SignalPayload::Face(tick)) => {
                request.image = tick.capture.as_ref().map(|bytes| STANDARD.encode(bytes));
            }
            Some(SignalPayload::Location { fix: Some(fix) }) => {
                request.latitude = Some(fix.latitude);
                request.longitude = Some(fix.longitude);
                request.accuracy_m = Some(fix.accuracy_m);
            }
            _ => {}
        }
        request
    }
}

/// Verify endpoint response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResponse {
    /// Text describing a rejection
    pub fn rejection(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "not verified".to_string())
    }
}

/// One verify call against a backend
#[async_trait]
pub trait RemoteVerifier: Send + Sync {
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, VerifyError>;
}

/// reqwest-backed verifier
pub struct HttpVerifier {
    http: Client,
    base_url: String,
}

impl HttpVerifier {
    pub fn new(base_url: impl Into<String>) -> Result<Self, VerifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(format!("facegate/{}", crate::VERSION))
            .build()
            .map_err(|e| VerifyError::TransportError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, kind: VerificationKind) -> String {
        format!("{}/verify/{}", self.base_url, kind.endpoint())
    }
}

#[async_trait]
impl RemoteVerifier for HttpVerifier {
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, VerifyError> {
        let url = self.endpoint(request.kind);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| VerifyError::TransportError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerifyError::TransportError(format!("{} returned {}: {}", url, status, body)));
        }

        response
            .json::<VerifyResponse>()
            .await
            .map_err(|e| VerifyError::TransportError(format!("bad verify response: {}", e)))
    }
}

/// Result of a bounded retry run
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOutcome {
    pub verified: bool,
    pub attempts: u32,
    /// One entry per failed attempt
    pub errors: Vec<VerifyError>,
}

/// Call the verifier up to `attempts` times, `throttle` apart.
/// Transport errors and `verified: false` both count as failed attempts.
pub async fn verify_with_retries(
    verifier: Arc<dyn RemoteVerifier>,
    request: VerifyRequest,
    attempts: u32,
    throttle: Duration,
) -> RemoteOutcome {
    let attempts = attempts.max(1);
    let mut errors = Vec::new();

    for attempt in 1..=attempts {
        match verifier.verify(&request).await {
            Ok(response) if response.verified => {
                debug!(session_id = %request.session_id, attempt, "remote verification passed");
                return RemoteOutcome { verified: true, attempts: attempt, errors };
            }
            Ok(response) => {
                warn!(session_id = %request.session_id, attempt, reason = %response.rejection(), "remote verification rejected");
                errors.push(VerifyError::RemoteVerifyFailed(response.rejection()));
            }
            Err(e) => {
                warn!(session_id = %request.session_id, attempt, error = %e, "remote verification attempt failed");
                errors.push(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(throttle).await;
        }
    }

    RemoteOutcome { verified: false, attempts, errors }
}
