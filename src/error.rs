//! Turn-level error taxonomy
//!
//! Only [`TurnError::RateLimitExceeded`] ever leaves `handle_message`; every other
//! kind is recorded on the conversation and replaced by a safe fallback reply.

use crate::llm::LlmError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while processing one conversation turn
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Rate limit exceeded, retry after {}s", retry_after.as_secs_f64())]
    RateLimitExceeded { retry_after: Duration },

    #[error("Completion backend failed after {attempts} attempt(s): {source}")]
    Llm {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    #[error("Tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Memory store unavailable: {0}")]
    MemoryStore(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TurnError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            TurnError::Llm { .. } => ErrorKind::Llm,
            TurnError::Tool { .. } => ErrorKind::Tool,
            TurnError::MemoryStore(_) => ErrorKind::MemoryStore,
            TurnError::Validation(_) => ErrorKind::Validation,
            TurnError::Cancelled => ErrorKind::Cancelled,
            TurnError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert into the record stored on the conversation
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.kind(), self.to_string())
    }
}

/// Error classification persisted with the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimitExceeded,
    Llm,
    Tool,
    MemoryStore,
    Validation,
    Cancelled,
    Internal,
}

/// One entry in `ConversationState::errors`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}
