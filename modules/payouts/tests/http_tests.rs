mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::TestApp;
use payouts_rs::{router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(test: &TestApp) -> Router {
    router(AppState {
        service: test.service.clone(),
    })
}

fn body() -> Value {
    json!({
        "user_id": "user-42",
        "submission_id": "sub-7",
        "amount": 20.5,
        "currency": "USD",
        "method": "standard",
        "scheduled_at": "2026-03-02T09:00:00Z"
    })
}

fn post(key: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/payouts")
        .header("content-type", "application/json")
        .header("X-Subject-Id", "user-42")
        .header("X-Role", "creator")
        .header("X-Request-Id", "req-http-1");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn read(resp: axum::response::Response) -> (StatusCode, Vec<u8>) {
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_health() {
    let test = TestApp::new();
    let resp = app(&test)
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let (status, bytes) = read(resp).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["module"], "payouts");
}

#[tokio::test]
async fn test_missing_idempotency_key_is_bad_request() {
    let test = TestApp::new();
    let resp = app(&test).oneshot(post(None, &body())).await.unwrap();
    let (status, bytes) = read(resp).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["code"], "idempotency_key_required");
    assert_eq!(value["request_id"], "req-http-1");
    assert!(test.outbox.is_empty().await);
}

#[tokio::test]
async fn test_retry_returns_identical_bytes() {
    let test = TestApp::new();

    let first = app(&test).oneshot(post(Some("k-1"), &body())).await.unwrap();
    assert!(first.headers().get("Idempotency-Replayed").is_none());
    let (status_a, bytes_a) = read(first).await;

    let second = app(&test).oneshot(post(Some("k-1"), &body())).await.unwrap();
    assert_eq!(
        second.headers().get("Idempotency-Replayed").unwrap(),
        "true"
    );
    let (status_b, bytes_b) = read(second).await;

    assert_eq!(status_a, StatusCode::CREATED);
    assert_eq!(status_b, StatusCode::CREATED);
    assert_eq!(bytes_a, bytes_b);

    let payout: Value = serde_json::from_slice(&bytes_a).unwrap();
    assert_eq!(payout["amount_minor"], 2050);
    assert_eq!(payout["status"], "paid");
    assert_eq!(test.outbox.len().await, 2);
}

#[tokio::test]
async fn test_key_reuse_with_new_body_is_conflict() {
    let test = TestApp::new();
    app(&test).oneshot(post(Some("k-2"), &body())).await.unwrap();

    let mut changed = body();
    changed["amount"] = json!(21.0);
    let resp = app(&test).oneshot(post(Some("k-2"), &changed)).await.unwrap();
    let (status, bytes) = read(resp).await;

    assert_eq!(status, StatusCode::CONFLICT);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["code"], "idempotency_conflict");
}

#[tokio::test]
async fn test_retries_without_request_id_report_the_same_id() {
    let test = TestApp::new();
    app(&test).oneshot(post(Some("k-5"), &body())).await.unwrap();

    let mut changed = body();
    changed["amount"] = json!(22.0);
    let retry = || {
        Request::builder()
            .method("POST")
            .uri("/api/payouts")
            .header("content-type", "application/json")
            .header("X-Subject-Id", "user-42")
            .header("X-Role", "creator")
            .header("Idempotency-Key", "k-5")
            .body(Body::from(changed.to_string()))
            .unwrap()
    };

    let (first_status, first_bytes) = read(app(&test).oneshot(retry()).await.unwrap()).await;
    let (second_status, second_bytes) = read(app(&test).oneshot(retry()).await.unwrap()).await;

    assert_eq!(first_status, StatusCode::CONFLICT);
    assert_eq!(second_status, StatusCode::CONFLICT);

    let first: Value = serde_json::from_slice(&first_bytes).unwrap();
    let second: Value = serde_json::from_slice(&second_bytes).unwrap();
    assert!(!first["request_id"].as_str().unwrap().is_empty());
    assert_eq!(first["request_id"], second["request_id"]);
}

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let test = TestApp::new();
    let req = Request::builder()
        .method("POST")
        .uri("/api/payouts")
        .header("X-Subject-Id", "user-42")
        .header("Idempotency-Key", "k-3")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, bytes) = read(app(&test).oneshot(req).await.unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["code"], value["error"]["code"]);
}

#[tokio::test]
async fn test_get_payout_owner_and_stranger() {
    let test = TestApp::new();
    let (_, bytes) = read(app(&test).oneshot(post(Some("k-4"), &body())).await.unwrap()).await;
    let payout: Value = serde_json::from_slice(&bytes).unwrap();
    let uri = format!("/api/payouts/{}", payout["payout_id"].as_str().unwrap());

    let owner = Request::builder()
        .uri(&uri)
        .header("X-Subject-Id", "user-42")
        .body(Body::empty())
        .unwrap();
    let (status, _) = read(app(&test).oneshot(owner).await.unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let stranger = Request::builder()
        .uri(&uri)
        .header("X-Subject-Id", "user-99")
        .body(Body::empty())
        .unwrap();
    let (status, _) = read(app(&test).oneshot(stranger).await.unwrap()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let missing = Request::builder()
        .uri("/api/payouts/po_missing")
        .header("X-Subject-Id", "user-42")
        .body(Body::empty())
        .unwrap();
    let (status, _) = read(app(&test).oneshot(missing).await.unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
