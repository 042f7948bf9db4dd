//! Service configuration
//!
//! Everything comes from `CONCIERGE_*` environment variables with defaults.
//! Rule tables default to the built-in data and can be replaced wholesale
//! from a JSON file named by `CONCIERGE_RULES_PATH`.

use crate::escalation::{default_rules, EscalationLevel};
use crate::llm::{LlmConfig, RetryPolicy};
use crate::memory::{default_detectors, MemoryConfig};
use crate::rate_limit::RateLimitConfig;
use crate::responder::{
    default_descriptors, default_routing_rules, Role, RoleDescriptor, SpecialistSettings,
};
use crate::rules::RuleSpec;
use crate::runtime::DEFAULT_SIMILAR_LIMIT;
use crate::state_machine::DEFAULT_MAX_HOPS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
    #[error("Failed to read rules file {path}: {source}")]
    RulesRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse rules file {path}: {source}")]
    RulesParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub memory: MemoryConfig,
    pub embedding_dims: usize,
    pub max_hops: u32,
    pub max_tool_rounds: usize,
    pub similar_limit: usize,
    /// Clinic records API; the in-process store is used when unset
    pub clinic_url: Option<String>,
    pub clinic_timeout: Duration,
    pub rules_path: Option<PathBuf>,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|var| std::env::var(var).ok())?;
        config.llm = LlmConfig::from_env();
        Ok(config)
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let memory_defaults = MemoryConfig::default();
        let retry_defaults = RetryPolicy::default();

        let db_path = vars.get("CONCIERGE_DB_PATH").map_or_else(
            || {
                let home = vars.get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".concierge").join("concierge.db")
            },
            PathBuf::from,
        );

        let max_age_days: u64 = vars.parse("CONCIERGE_RETRIEVE_MAX_AGE_DAYS", 7)?;
        let retrieve_max_age = max_age_days
            .checked_mul(SECS_PER_DAY)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::InvalidValue {
                var: "CONCIERGE_RETRIEVE_MAX_AGE_DAYS",
                value: max_age_days.to_string(),
            })?;

        Ok(Self {
            port: vars.parse("CONCIERGE_PORT", 8000)?,
            db_path,
            rate_limit: RateLimitConfig {
                burst_capacity: vars.parse("CONCIERGE_RATE_LIMIT_BURST", 10)?,
                window: Duration::from_secs(vars.parse("CONCIERGE_RATE_LIMIT_WINDOW_SECS", 60)?),
            },
            retry: RetryPolicy {
                max_attempts: vars.parse("CONCIERGE_RETRY_ATTEMPTS", retry_defaults.max_attempts)?,
                base_delay: Duration::from_millis(vars.parse("CONCIERGE_RETRY_BASE_DELAY_MS", 500)?),
                max_delay: retry_defaults.max_delay,
            },
            memory: MemoryConfig {
                edge_threshold: vars.parse("CONCIERGE_EDGE_THRESHOLD", memory_defaults.edge_threshold)?,
                edge_window: vars.parse("CONCIERGE_EDGE_WINDOW", memory_defaults.edge_window)?,
                retrieve_threshold: vars
                    .parse("CONCIERGE_RETRIEVE_THRESHOLD", memory_defaults.retrieve_threshold)?,
                retrieve_max_age,
                retrieve_cap: vars.parse("CONCIERGE_RETRIEVE_CAP", memory_defaults.retrieve_cap)?,
                tenant_scoped: vars.parse("CONCIERGE_TENANT_SCOPED", memory_defaults.tenant_scoped)?,
            },
            embedding_dims: vars.parse("CONCIERGE_EMBEDDING_DIMS", 512)?,
            max_hops: vars.parse("CONCIERGE_MAX_HOPS", DEFAULT_MAX_HOPS)?,
            max_tool_rounds: vars.parse("CONCIERGE_MAX_TOOL_ROUNDS", 4)?,
            similar_limit: vars.parse("CONCIERGE_SIMILAR_LIMIT", DEFAULT_SIMILAR_LIMIT)?,
            clinic_url: vars.get("CONCIERGE_CLINIC_URL"),
            clinic_timeout: Duration::from_secs(vars.parse("CONCIERGE_CLINIC_TIMEOUT_SECS", 10)?),
            rules_path: vars.get("CONCIERGE_RULES_PATH").map(PathBuf::from),
            llm: LlmConfig::default(),
        })
    }

    /// Per-responder limits drawn from the tool and completion settings
    pub fn specialist_settings(&self) -> SpecialistSettings {
        SpecialistSettings {
            max_tool_rounds: self.max_tool_rounds,
            max_tokens: self.llm.max_tokens,
        }
    }

    /// Rule tables from `rules_path`, or the built-in ones
    pub fn rules(&self) -> Result<RulesConfig, ConfigError> {
        match &self.rules_path {
            Some(path) => RulesConfig::load(path),
            None => Ok(RulesConfig::default()),
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(var) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { var, value }),
        }
    }
}

/// Data-driven rule tables
#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// Ordered routing table, first match wins
    #[serde(default = "default_routing_rules")]
    pub routing: Vec<RuleSpec<Role>>,
    #[serde(default = "default_rules")]
    pub escalation: Vec<RuleSpec<EscalationLevel>>,
    #[serde(default = "default_detectors")]
    pub patterns: Vec<RuleSpec<String>>,
    #[serde(default = "default_descriptors")]
    pub roles: Vec<RoleDescriptor>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            routing: default_routing_rules(),
            escalation: default_rules(),
            patterns: default_detectors(),
            roles: default_descriptors(),
        }
    }
}

impl RulesConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RulesRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::RulesParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("HOME", "/home/clinic")])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("/home/clinic/.concierge/concierge.db"));
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.memory, MemoryConfig::default());
        assert_eq!(config.max_hops, 2);
        assert!(config.clinic_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("CONCIERGE_PORT", "9100"),
            ("CONCIERGE_RATE_LIMIT_BURST", "3"),
            ("CONCIERGE_RATE_LIMIT_WINDOW_SECS", "10"),
            ("CONCIERGE_RETRIEVE_THRESHOLD", "0.75"),
            ("CONCIERGE_TENANT_SCOPED", "false"),
            ("CONCIERGE_CLINIC_URL", "http://clinic.internal"),
            ("CONCIERGE_DB_PATH", "/var/lib/concierge.db"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.rate_limit.burst_capacity, 3);
        assert_eq!(config.rate_limit.window, Duration::from_secs(10));
        assert!((config.memory.retrieve_threshold - 0.75).abs() < f32::EPSILON);
        assert!(!config.memory.tenant_scoped);
        assert_eq!(config.clinic_url.as_deref(), Some("http://clinic.internal"));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/concierge.db"));
    }

    #[test]
    fn test_oversized_max_age_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[(
            "CONCIERGE_RETRIEVE_MAX_AGE_DAYS",
            "18446744073709551615",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "CONCIERGE_RETRIEVE_MAX_AGE_DAYS",
                ..
            }
        ));

        let config =
            AppConfig::from_lookup(lookup(&[("CONCIERGE_RETRIEVE_MAX_AGE_DAYS", "30")])).unwrap();
        assert_eq!(config.memory.retrieve_max_age, Duration::from_secs(30 * SECS_PER_DAY));
    }

    #[test]
    fn test_specialist_settings_follow_config() {
        let mut config =
            AppConfig::from_lookup(lookup(&[("CONCIERGE_MAX_TOOL_ROUNDS", "2")])).unwrap();
        config.llm.max_tokens = 512;
        let settings = config.specialist_settings();
        assert_eq!(settings.max_tool_rounds, 2);
        assert_eq!(settings.max_tokens, 512);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("CONCIERGE_MAX_HOPS", "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "CONCIERGE_MAX_HOPS",
                ..
            }
        ));
    }

    #[test]
    fn test_rules_file_overrides_only_given_tables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"routing": [{{"pattern": "\\bdentures?\\b", "outcome": "medical"}}]}}"#
        )
        .unwrap();

        let rules = RulesConfig::load(file.path()).unwrap();
        assert_eq!(rules.routing.len(), 1);
        assert_eq!(rules.routing[0].outcome, Role::Medical);
        assert_eq!(rules.escalation, default_rules());
        assert_eq!(rules.roles.len(), Role::ALL.len());
    }

    #[test]
    fn test_missing_rules_file() {
        let err = RulesConfig::load(Path::new("/nonexistent/rules.json")).unwrap_err();
        assert!(matches!(err, ConfigError::RulesRead { .. }));
    }
}
