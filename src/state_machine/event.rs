//! Events that drive the router

use crate::error::ErrorRecord;
use crate::responder::ResponderReply;

/// Events that trigger router transitions
#[derive(Debug, Clone)]
pub enum Event {
    /// Route the latest user text (turn start, or re-entry after a handoff)
    Route { text: String },

    /// The dispatched responder produced a reply
    ResponderReplied { reply: ResponderReply },

    /// The dispatched responder failed after its own recovery
    ResponderFailed { error: ErrorRecord },
}
