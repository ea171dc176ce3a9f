use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::extract::{AppJson, AppQuery};
use crate::api::state::AppState;
use crate::assistant::ReplyItem;
use crate::crypto::Claims;
use crate::error::AppError;

/// Session key of the unauthenticated `/test` and `/restartSession` routes.
///
/// Registered users are keyed under `user:` (see [`user_session_key`]), so no
/// username can reach this slot.
pub const TEST_SESSION_KEY: &str = "anonymous:test";

/// Session key for a signed-in user.
pub fn user_session_key(username: &str) -> String {
    format!("user:{}", username)
}

const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
pub struct TestQuery {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub items: Vec<ReplyItem>,
}

#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub restarted: bool,
}

fn validate_message(message: &str) -> Result<(), AppError> {
    if message.trim().is_empty() || message.len() > MAX_MESSAGE_LEN {
        return Err(AppError::Validation(format!(
            "Message must be 1-{} characters",
            MAX_MESSAGE_LEN
        )));
    }
    Ok(())
}

/// GET /test?message=... (no auth, fixed test identity)
pub async fn test(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TestQuery>,
) -> Result<String, AppError> {
    validate_message(&query.message)?;

    let reply = state.sessions.converse(TEST_SESSION_KEY, &query.message).await?;

    Ok(reply.text)
}

/// POST /restartSession (no auth, fixed test identity)
pub async fn restart_session(State(state): State<AppState>) -> &'static str {
    state.sessions.invalidate(TEST_SESSION_KEY).await;

    "Session restarted"
}

/// POST /chat (requires auth)
pub async fn chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    AppJson(req): AppJson<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    validate_message(&req.message)?;

    let reply = state.sessions.converse(&user_session_key(&claims.sub), &req.message).await?;

    Ok(Json(ChatResponse {
        reply: reply.text,
        items: reply.items,
    }))
}

/// POST /chat/restart (requires auth)
pub async fn restart_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<RestartResponse> {
    let restarted = state.sessions.invalidate(&user_session_key(&claims.sub)).await.is_some();

    Json(RestartResponse { restarted })
}
