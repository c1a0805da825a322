use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

/// Bearer-token gate for the admin subtree. The token is deployment
/// configuration; an unset token locks the subtree entirely.
pub async fn admin_auth(
    State(_state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let admin_token = std::env::var("ADMIN_API_TOKEN")
        .ok()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Admin API is not configured".to_string()))?;

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header".to_string()))?;

    let provided = header.strip_prefix("Bearer ").unwrap_or_default();
    if provided != admin_token {
        return Err(ApiError::unauthorized("Invalid admin token".to_string()));
    }

    Ok(next.run(request).await)
}
