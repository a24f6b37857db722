use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::server::state::AppState;

/// Extract Bearer token from Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth_header = headers.get("Authorization")?.to_str().ok()?;
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify the bearer token and attach the resulting [`AccessContext`] to the request.
///
/// [`AccessContext`]: super::context::AccessContext
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let Some(token) = extract_bearer_token(&headers) else {
        tracing::debug!("Auth middleware: no bearer token on {}", req.uri().path());
        return Err((
            StatusCode::UNAUTHORIZED,
            "Missing bearer token in Authorization header".to_string(),
        ));
    };

    let context = state.token_verifier.verify(token).map_err(|e| {
        tracing::warn!("Rejected access token: {}", e);
        (StatusCode::UNAUTHORIZED, "Invalid or expired token".to_string())
    })?;

    tracing::debug!(
        subject = %context.subject,
        role = %context.role,
        namespace = ?context.bound_namespace,
        "Authenticated request"
    );
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));
    }
}
