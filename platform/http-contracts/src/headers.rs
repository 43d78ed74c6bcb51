//! Actor and idempotency headers, standing in for the auth middleware.

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::response::Response;
use http::header::CONTENT_TYPE;
use http::request::Parts;
use http::{HeaderMap, HeaderValue, StatusCode};
use mutation_kernel::Actor;
use std::convert::Infallible;
use uuid::Uuid;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const SUBJECT_ID_HEADER: &str = "X-Subject-Id";
pub const ROLE_HEADER: &str = "X-Role";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Request id for a caller that sent none.
///
/// Keyed requests get a UUIDv5 of `subject:key`, so every retry of one
/// logical request reports the same id. Unkeyed requests get a random one.
pub fn fallback_request_id(subject_id: &str, idempotency_key: &str) -> String {
    if idempotency_key.is_empty() {
        return Uuid::new_v4().to_string();
    }
    let name = format!("{}:{}", subject_id, idempotency_key);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// Build the actor from request headers. A missing request id falls back to
/// [`fallback_request_id`]; missing subject or key stay empty for the kernel
/// guard to reject.
pub fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let subject_id = header(headers, SUBJECT_ID_HEADER);
    let idempotency_key = header(headers, IDEMPOTENCY_KEY_HEADER);

    let mut request_id = header(headers, REQUEST_ID_HEADER);
    if request_id.is_empty() {
        request_id = fallback_request_id(&subject_id, &idempotency_key);
    }

    Actor::new(subject_id, header(headers, ROLE_HEADER))
        .with_request_id(request_id)
        .with_idempotency_key(idempotency_key)
}

/// Extractor wrapping [`actor_from_headers`]
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestActor(actor_from_headers(&parts.headers)))
    }
}

/// Response carrying already-serialized JSON bytes verbatim
pub fn json_bytes_response(status: u16, body: Vec<u8>, request_id: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(SUBJECT_ID_HEADER, HeaderValue::from_static("user-1"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("user"));
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static(" pay:req:1 "));
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-7"));

        let actor = actor_from_headers(&headers);
        assert_eq!(actor.subject_id, "user-1");
        assert_eq!(actor.role, "user");
        assert_eq!(actor.idempotency_key, "pay:req:1");
        assert_eq!(actor.request_id, "req-7");
    }

    #[test]
    fn test_request_id_generated_when_absent() {
        let actor = actor_from_headers(&HeaderMap::new());
        assert!(!actor.request_id.is_empty());
        assert!(actor.subject_id.is_empty());
        assert!(actor.idempotency_key.is_empty());
    }

    #[test]
    fn test_keyed_retries_share_a_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert(SUBJECT_ID_HEADER, HeaderValue::from_static("user-1"));
        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("pay:req:1"));

        let first = actor_from_headers(&headers);
        let retry = actor_from_headers(&headers);
        assert_eq!(first.request_id, retry.request_id);
        assert!(Uuid::parse_str(&first.request_id).is_ok());

        headers.insert(SUBJECT_ID_HEADER, HeaderValue::from_static("user-2"));
        assert_ne!(actor_from_headers(&headers).request_id, first.request_id);
    }

    #[test]
    fn test_unkeyed_requests_get_fresh_ids() {
        let headers = HeaderMap::new();
        assert_ne!(
            actor_from_headers(&headers).request_id,
            actor_from_headers(&headers).request_id
        );
    }
}
