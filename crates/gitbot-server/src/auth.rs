use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// Bearer token for the `/api/v1` routes. `None` disables auth.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub bearer_token: Option<String>,
}

impl AuthConfig {
    /// Whether `headers` carry the configured token.
    pub fn allows(&self, headers: &HeaderMap) -> bool {
        let Some(ref expected) = self.bearer_token else {
            return true;
        };
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected)
    }
}

/// Axum middleware that validates Bearer token authentication against the
/// `AuthConfig` in the request extensions. Without one, every request passes.
pub async fn bearer_auth_middleware(
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_config = request
        .extensions()
        .get::<AuthConfig>()
        .cloned()
        .unwrap_or_default();

    if !auth_config.allows(request.headers()) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn no_token_allows_everything() {
        let auth = AuthConfig::default();
        assert!(auth.allows(&HeaderMap::new()));
        assert!(auth.allows(&headers("Bearer anything")));
    }

    #[test]
    fn token_must_match() {
        let auth = AuthConfig {
            bearer_token: Some("s3cret".to_string()),
        };
        assert!(auth.allows(&headers("Bearer s3cret")));
        assert!(!auth.allows(&headers("Bearer wrong")));
        assert!(!auth.allows(&headers("s3cret")));
        assert!(!auth.allows(&HeaderMap::new()));
    }
}
