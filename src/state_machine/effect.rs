//! Effects produced by router transitions

use crate::error::{ErrorKind, ErrorRecord};
use crate::escalation::EscalationLevel;
use crate::responder::Role;
use crate::tools::ToolInvocation;

/// Effects to be executed after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Raise the conversation's escalation level
    EscalateTo(EscalationLevel),

    /// Clear the sticky responder once it has been used
    ConsumeNextResponder,

    /// Invoke the responder for `role`
    Dispatch { role: Role, hops: u32 },

    SetCurrentResponder(Role),

    /// Route the following turn to `role`
    SetNextResponder(Role),

    /// Append tool calls to the audit trail
    AttachToolResults(Vec<ToolInvocation>),

    RecordErrors(Vec<ErrorRecord>),

    /// Forward the responder's text to the user unchanged
    Deliver { role: Role, text: String },

    /// Record the error and reply with the safe fallback message
    Fallback { role: Role, error: ErrorRecord },

    /// Note in the transcript (handoffs, hop cap)
    Note(String),
}

impl Effect {
    pub fn fallback(role: Role, kind: ErrorKind, message: impl Into<String>) -> Self {
        Effect::Fallback {
            role,
            error: ErrorRecord::new(kind, message),
        }
    }
}
