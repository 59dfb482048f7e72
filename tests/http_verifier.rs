//! Integration tests for the reqwest verifier against a local stub backend

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use facegate::core::{verify_with_retries, HttpVerifier, RemoteVerifier, VerifyRequest};
use facegate::types::{FaceTick, LocationFix, RawSignal, VerificationKind, VerifyError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct Backend {
    bodies: Mutex<Vec<Value>>,
}

async fn verify_face(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Json<Value> {
    let has_image = body["image"].is_string();
    backend.bodies.lock().unwrap().push(body);
    if has_image {
        Json(json!({"verified": true, "message": "match"}))
    } else {
        Json(json!({"verified": false, "error": "no image"}))
    }
}

async fn verify_location(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> (StatusCode, String) {
    backend.bodies.lock().unwrap().push(body);
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance".to_string())
}

async fn start_backend() -> (String, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/verify/face", post(verify_face))
        .route("/verify/location", post(verify_location))
        .with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), backend)
}

fn face_request(capture: Option<Vec<u8>>) -> VerifyRequest {
    let mut tick = FaceTick::count(1);
    tick.capture = capture;
    VerifyRequest::from_signal(Uuid::new_v4(), VerificationKind::Face, Some(&RawSignal::face(tick)))
}

#[tokio::test]
async fn test_face_verified_with_image() {
    let (base, backend) = start_backend().await;
    let verifier = HttpVerifier::new(base).unwrap();

    let response = verifier.verify(&face_request(Some(vec![1, 2, 3]))).await.unwrap();
    assert!(response.verified);
    assert_eq!(response.message.as_deref(), Some("match"));

    let bodies = backend.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["image"], "AQID");
    assert_eq!(bodies[0]["kind"], "face");
}

#[tokio::test]
async fn test_rejection_is_not_a_transport_error() {
    let (base, _backend) = start_backend().await;
    let verifier = HttpVerifier::new(base).unwrap();

    let response = verifier.verify(&face_request(None)).await.unwrap();
    assert!(!response.verified);
    assert_eq!(response.rejection(), "no image");
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let (base, backend) = start_backend().await;
    let verifier = HttpVerifier::new(base).unwrap();
    let signal = RawSignal::location(Some(LocationFix { latitude: 12.97, longitude: 77.59, accuracy_m: 15.0 }));
    let request = VerifyRequest::from_signal(Uuid::new_v4(), VerificationKind::Location, Some(&signal));

    let result = verifier.verify(&request).await;
    assert!(matches!(result, Err(VerifyError::TransportError(ref m)) if m.contains("503")));
    assert_eq!(backend.bodies.lock().unwrap()[0]["latitude"], 12.97);
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Nothing listens on the discard port
    let verifier = HttpVerifier::new("http://127.0.0.1:9").unwrap();
    let result = verifier.verify(&face_request(None)).await;
    assert!(matches!(result, Err(VerifyError::TransportError(_))));
}

#[tokio::test]
async fn test_retries_exhaust_against_backend() {
    let (base, backend) = start_backend().await;
    let verifier: Arc<dyn RemoteVerifier> = Arc::new(HttpVerifier::new(base).unwrap());

    let outcome = verify_with_retries(verifier, face_request(None), 2, Duration::from_millis(10)).await;
    assert!(!outcome.verified);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.errors, vec![VerifyError::RemoteVerifyFailed("no image".into()); 2]);
    assert_eq!(backend.bodies.lock().unwrap().len(), 2);
}
