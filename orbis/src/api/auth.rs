//! Signed-request verification middleware.
//!
//! State-changing requests to protected paths must carry `X-Pubkey`,
//! `X-Timestamp` and `X-Signature` headers whose signature covers
//! `METHOD:path:timestamp:canonical_json(body)` (see `lib-crypto`).

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use lib_crypto::{unix_now, verify_request, AuthError};

/// Paths requiring a signature on mutating methods.
const PROTECTED_PATHS: &[&str] = &["/api/tx", "/api/proposal", "/api/peers"];

/// Maximum accepted request body.
const MAX_BODY_BYTES: usize = 1_048_576;

/// The verified sender public key, injected for downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthedPubkey(pub String);

fn unauthorized(error: AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": error.to_string()})),
    )
        .into_response()
}

pub async fn require_signature(request: Request, next: Next) -> Response {
    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::DELETE
    );
    let path = request.uri().path().to_string();
    if !mutating || !PROTECTED_PATHS.iter().any(|p| path.starts_with(p)) {
        return next.run(request).await;
    }

    let (pubkey, timestamp, signature) = {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        (
            header("X-Pubkey"),
            header("X-Timestamp"),
            header("X-Signature"),
        )
    };
    if pubkey.is_empty() || timestamp.is_empty() || signature.is_empty() {
        return unauthorized(AuthError::MissingHeaders);
    }

    let method = request.method().as_str().to_string();
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"detail": "request body too large"})),
            )
                .into_response()
        }
    };
    let body_json: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": "body must be JSON"})),
            )
                .into_response()
        }
    };

    if let Err(error) = verify_request(
        &pubkey,
        &timestamp,
        &signature,
        &method,
        &path,
        &body_json,
        unix_now(),
    ) {
        return unauthorized(error);
    }

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(AuthedPubkey(pubkey));
    next.run(request).await
}
