//! API request and response types

use crate::escalation::EscalationLevel;
use crate::memory::PatternStat;
use crate::responder::Role;
use serde::{Deserialize, Serialize};

/// Inbound message from a channel adapter
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub user_id: String,
    pub tenant_id: String,
    /// A new conversation is started when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub text: String,
}

/// Reply to forward to the user
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub conversation_id: String,
    pub reply: String,
    pub responder: Role,
    pub requires_human: bool,
    pub escalation_level: Option<EscalationLevel>,
    pub similar_used: usize,
}

#[derive(Debug, Serialize)]
pub struct PatternsResponse {
    pub patterns: Vec<PatternStat>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            retry_after_secs: None,
        }
    }
}
