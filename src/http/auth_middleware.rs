use crate::http::error::ApiError;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret every request must present.
#[derive(Debug, Clone)]
pub struct ApiKey(pub Arc<str>);

#[derive(Debug, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Axum middleware rejecting requests without the configured API key.
///
/// The key is read from the `x-api-key` header, falling back to the `key`
/// query parameter. Mounted only when a key is configured.
pub async fn auth_middleware(
    State(api_key): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let from_header = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let presented = from_header.or_else(|| {
        Query::<KeyQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(q)| q.key)
    });

    if presented.as_deref() != Some(&*api_key.0) {
        tracing::debug!(path = %request.uri().path(), "Rejected request without valid API key");
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}
