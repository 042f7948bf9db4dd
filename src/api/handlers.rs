//! HTTP request handlers

use super::types::{
    ErrorResponse, MessageResponse, PatternsResponse, SendMessageRequest, SuccessResponse,
};
use super::AppState;
use crate::error::TurnError;
use crate::runtime::InboundMessage;
use crate::state_machine::ConversationState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Inbound channel
        .route("/api/messages", post(send_message))
        // Conversation inspection and lifecycle
        .route(
            "/api/conversations/:id",
            get(get_conversation).delete(end_conversation),
        )
        // Memory statistics
        .route("/api/patterns", get(list_patterns))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Messages
// ============================================================

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if req.user_id.trim().is_empty() || req.tenant_id.trim().is_empty() {
        return Err(AppError::BadRequest(
            "user_id and tenant_id are required".to_string(),
        ));
    }
    let conversation_id = req
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let reply = state
        .orchestrator
        .handle_message(InboundMessage {
            user_id: req.user_id,
            tenant_id: req.tenant_id,
            conversation_id: conversation_id.clone(),
            text: req.text,
        })
        .await
        .map_err(|e| match e {
            TurnError::RateLimitExceeded { retry_after } => AppError::RateLimited(retry_after),
            other => AppError::Internal(other.to_string()),
        })?;

    Ok(Json(MessageResponse {
        conversation_id,
        reply: reply.reply,
        responder: reply.responder,
        requires_human: reply.requires_human,
        escalation_level: reply.escalation_level,
        similar_used: reply.similar_used,
    }))
}

// ============================================================
// Conversations
// ============================================================

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationState>, AppError> {
    state
        .orchestrator
        .get_conversation(&id)
        .await
        .map_err(AppError::Internal)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Conversation not found: {id}")))
}

async fn end_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    if state.orchestrator.end_conversation(&id).await {
        Ok(Json(SuccessResponse { success: true }))
    } else {
        Err(AppError::NotFound(format!("Conversation not found: {id}")))
    }
}

// ============================================================
// Patterns
// ============================================================

async fn list_patterns(State(state): State<AppState>) -> Result<Json<PatternsResponse>, AppError> {
    let patterns = state
        .orchestrator
        .memory()
        .pattern_stats()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(PatternsResponse { patterns }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("concierge ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    RateLimited(Duration),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::RateLimited(wait) => {
                // Whole seconds, rounded up so clients never retry early
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "Rate limit exceeded".to_string(),
                    Some(secs.max(1)),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = Json(ErrorResponse {
            retry_after_secs: retry_after,
            ..ErrorResponse::new(message)
        });
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
