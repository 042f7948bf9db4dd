//! Concierge - multi-responder conversational front desk
//!
//! Routes each inbound patient message to one specialised responder, tracks
//! escalation, and records every exchange in a causal memory that later
//! turns retrieve from.

mod api;
mod config;
mod db;
mod error;
mod escalation;
mod llm;
mod memory;
mod rate_limit;
mod responder;
mod rules;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use escalation::EscalationEvaluator;
use llm::{build_service, LlmService, RetryController, UnconfiguredService};
use memory::{CausalMemory, HashingEmbedder, PatternDetector};
use rate_limit::RateLimiter;
use responder::{ResponderSet, SpecialistResponder};
use rules::RuleSet;
use runtime::{DatabaseStorage, Orchestrator, TurnExecutor};
use std::net::SocketAddr;
use std::sync::Arc;
use tools::{ClinicRecords, HttpClinic, InMemoryClinic, ToolRegistry};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concierge=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let config = AppConfig::from_env()?;
    let rules = config.rules()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Causal memory
    let memory = Arc::new(CausalMemory::new(
        Arc::new(db.clone()),
        Arc::new(HashingEmbedder::new(config.embedding_dims)),
        PatternDetector::new(&rules.patterns)?,
        config.memory,
    ));

    // Clinic records and tools
    let records: Arc<dyn ClinicRecords> = match &config.clinic_url {
        Some(url) => {
            tracing::info!(url = %url, "Using clinic records API");
            Arc::new(HttpClinic::new(url.clone(), config.clinic_timeout)?)
        }
        None => {
            tracing::warn!("CONCIERGE_CLINIC_URL not set, using in-process clinic records");
            Arc::new(InMemoryClinic::new())
        }
    };
    let tools = Arc::new(ToolRegistry::clinic(records));

    // Completion backend
    let llm: Arc<dyn LlmService> = if let Some(service) = build_service(&config.llm) {
        tracing::info!(model = %service.model_id(), "Completion backend initialized");
        service
    } else {
        tracing::warn!("No completion backend configured. Set ANTHROPIC_API_KEY.");
        Arc::new(UnconfiguredService)
    };

    // Responders
    let evaluator = Arc::new(EscalationEvaluator::new(&rules.escalation)?);
    let settings = config.specialist_settings();
    let mut responders = ResponderSet::new();
    for descriptor in rules.roles {
        responders.insert(Arc::new(SpecialistResponder::new(
            descriptor,
            Arc::clone(&llm),
            Arc::clone(&tools),
            RetryController::new(config.retry),
            &evaluator,
            settings,
        )?));
    }
    tracing::info!(roles = ?responders.roles(), "Responders registered");

    let executor = TurnExecutor::new(
        responders,
        Arc::new(RuleSet::compile(&rules.routing)?),
        evaluator,
    )
    .with_max_hops(config.max_hops);

    let orchestrator = Orchestrator::new(
        Arc::new(DatabaseStorage::new(db)),
        Arc::new(RateLimiter::new(config.rate_limit)),
        memory,
        executor,
    )
    .with_similar_limit(config.similar_limit);

    // Router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(Arc::new(orchestrator)))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Concierge listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
