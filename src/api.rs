//! HTTP API
//!
//! Thin surface over the orchestrator: the inbound message endpoint plus
//! conversation and memory inspection.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::runtime::Orchestrator;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}
