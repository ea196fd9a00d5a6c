use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use warden_auth::{Principal, TokenIssuer};

use crate::app::errors::json_error;

#[derive(Clone)]
pub struct AuthState {
    pub issuer: Arc<TokenIssuer>,
}

/// Verify the bearer token and attach the [`Principal`] it describes.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).ok_or_else(unauthenticated)?;

    let data = state.issuer.verify(token, Utc::now()).map_err(|err| {
        debug!(error = %err, "rejected bearer token");
        unauthenticated()
    })?;
    let principal = Principal::from_token(&data).ok_or_else(unauthenticated)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

fn unauthenticated() -> Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "unauthenticated",
        "authentication required",
    )
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer(&headers("Bearer   ")), None);
        assert_eq!(extract_bearer(&headers("Basic dXNlcg==")), None);
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }
}
