use axum::{extract::State, Extension, Json};
use serde::Serialize;

use crate::api::extract::AppJson;
use crate::api::state::AppState;
use crate::auth::{Credentials, SignUpRequest};
use crate::crypto::Claims;
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// POST /signup
pub async fn signup(
    State(state): State<AppState>,
    AppJson(req): AppJson<SignUpRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.auth.sign_up(&req).await?;

    Ok(Json(TokenResponse { token }))
}

/// POST /signin
pub async fn signin(
    State(state): State<AppState>,
    AppJson(credentials): AppJson<Credentials>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.auth.sign_in(&credentials).await?;

    Ok(Json(TokenResponse { token }))
}

/// GET /me (requires auth via middleware)
pub async fn me(Extension(claims): Extension<Claims>) -> Json<Claims> {
    Json(claims)
}
