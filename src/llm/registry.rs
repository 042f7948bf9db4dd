//! Completion backend configuration and construction

use super::{AnthropicService, LlmError, LlmRequest, LlmResponse, LlmService, LoggingService};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Configuration for the completion backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Override for the Messages endpoint (proxies, gateways)
    pub endpoint: Option<String>,
    pub request_timeout: Duration,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: None,
            request_timeout: Duration::from_secs(60),
            max_tokens: 2048,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: std::env::var("CONCIERGE_MODEL").unwrap_or(defaults.model),
            endpoint: std::env::var("CONCIERGE_LLM_ENDPOINT").ok(),
            request_timeout: std::env::var("CONCIERGE_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.request_timeout, Duration::from_secs),
            max_tokens: std::env::var("CONCIERGE_LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
        }
    }
}

/// Build the configured completion service, wrapped with logging.
///
/// Returns `None` when no API key is configured.
pub fn build_service(config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
    let api_key = config.api_key.clone()?;
    match AnthropicService::new(
        api_key,
        config.model.clone(),
        config.endpoint.as_deref(),
        config.request_timeout,
    ) {
        Ok(service) => Some(Arc::new(LoggingService::new(Arc::new(service)))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to create completion service");
            None
        }
    }
}

/// Stand-in used when no backend is configured.
///
/// Every request fails with a non-retryable auth error, so turns degrade to
/// the fallback reply instead of the service refusing to start.
pub struct UnconfiguredService;

#[async_trait]
impl LlmService for UnconfiguredService {
    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        Err(LlmError::auth("No completion backend configured (set ANTHROPIC_API_KEY)"))
    }

    fn model_id(&self) -> &str {
        "unconfigured"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_key_means_no_service() {
        let config = LlmConfig::default();
        assert!(build_service(&config).is_none());
    }

    #[test]
    fn test_service_uses_configured_model() {
        let config = LlmConfig {
            api_key: Some("test-key".to_string()),
            model: "claude-test".to_string(),
            ..LlmConfig::default()
        };
        let service = build_service(&config).unwrap();
        assert_eq!(service.model_id(), "claude-test");
    }

    #[tokio::test]
    async fn test_unconfigured_service_fails_without_retry() {
        let err = UnconfiguredService
            .complete(&LlmRequest {
                system: String::new(),
                messages: vec![],
                tools: vec![],
                max_tokens: None,
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
