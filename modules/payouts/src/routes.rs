//! Payout API routes
//!
//! - `POST /api/payouts`: create and settle a payout. Requires
//!   `Idempotency-Key`; a retried key answers with the original bytes.
//! - `GET /api/payouts/{payout_id}`: read one payout (owner or finance)

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mutation_kernel::RequestContext;
use platform_http_contracts::{json_bytes_response, ApiError, RequestActor};
use std::sync::Arc;

use crate::models::CreatePayoutRequest;
use crate::service::PayoutService;

/// Set on responses served from the idempotency cache
pub const REPLAYED_HEADER: &str = "Idempotency-Replayed";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PayoutService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/payouts", post(create_payout))
        .route("/api/payouts/{payout_id}", get(get_payout))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": crate::SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Handler for POST /api/payouts
///
/// The body is taken raw so malformed JSON gets the shared error envelope.
pub async fn create_payout(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    body: Bytes,
) -> Response {
    let request: CreatePayoutRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return ApiError::bad_request(format!("invalid request body: {}", e), &actor.request_id)
                .into_response()
        }
    };

    let ctx = RequestContext::new(actor.request_id.clone());
    match state.service.create_payout(&ctx, &actor, request).await {
        Ok(resp) => {
            let mut response = json_bytes_response(resp.status_code, resp.body, &actor.request_id);
            if resp.replayed {
                response
                    .headers_mut()
                    .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
            }
            response
        }
        Err(e) => ApiError::from_kernel(&e, &actor.request_id).into_response(),
    }
}

/// Handler for GET /api/payouts/{payout_id}
pub async fn get_payout(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(payout_id): Path<String>,
) -> Response {
    match state.service.get_payout(&actor, &payout_id).await {
        Ok(payout) => Json(payout).into_response(),
        Err(e) => ApiError::from_kernel(&e, &actor.request_id).into_response(),
    }
}
