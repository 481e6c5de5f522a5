//! HTTP routes for the One engine.
//!
//! The transport is thin: `/chat` hands the message to the engine and
//! wraps whatever comes back. Engine-level failures already arrive as the
//! safe apology reply, so only malformed or invalid requests produce a
//! non-200.

use crate::engine::ConversationEngine;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use one_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatApiRequest {
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Chat response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub message: String,
    pub workflow_type: String,
    pub status: String,
    pub timestamp: String,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Transport-level error, mapped to HTTP via the unified error type.
pub struct ApiError(pub Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.status_code();
        let status =
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

/// Build the engine router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatApiRequest>,
) -> Result<Json<ChatApiResponse>, ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError(Error::InvalidInput("user_id is required".into())));
    }

    let reply = state
        .engine
        .process_message(&request.user_id, &request.message)
        .await;

    Ok(Json(ChatApiResponse {
        message: reply.message,
        workflow_type: reply.workflow_type,
        status: reply.status.as_str().to_string(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "one-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
