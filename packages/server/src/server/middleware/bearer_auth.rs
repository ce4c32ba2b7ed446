use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

/// Bearer-token middleware for the admin and event-intake routes
///
/// Requests pass only when `Authorization: Bearer <token>` matches the token
/// configured for that surface. With no token configured the surface is
/// disabled and every request gets 401.
pub async fn bearer_auth_middleware(
    expected: Option<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        warn!(path = %request.uri().path(), "Request rejected: no API token configured for this route");
        return (StatusCode::UNAUTHORIZED, "API disabled").into_response();
    };

    match extract_bearer_token(request.headers()) {
        Some(token) if tokens_match(token, &expected) => next.run(request).await,
        Some(_) => {
            debug!(path = %request.uri().path(), "Request with wrong API token");
            StatusCode::UNAUTHORIZED.into_response()
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Extract Bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ").map(str::trim)
}

/// Comparison time does not depend on where the tokens differ.
fn tokens_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(extract_bearer_token(&headers), Some("s3cret"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cres", "s3cret"));
        assert!(!tokens_match("s3cret-longer", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }
}
