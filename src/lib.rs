pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

pub use application::{EvaluationError, PolicyEvaluationService};
pub use domain::{Effect, PolicyEvaluationRequest, PolicyEvaluationResult};

use application::{ConditionEngine, ConditionEngineConfig, PolicyMatcher, RhaiConditionEngine};
use infrastructure::{
    AttributeReader, DecisionCache, KeyValueStore, PolicySetRepository, ZoneResolver,
};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Evaluation tuning knobs, loadable from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// Ceiling on a single attribute-resolution call, in milliseconds.
    pub attribute_timeout_ms: u64,
    /// Rhai sandbox: maximum operations per condition evaluation.
    pub condition_max_operations: u64,
    /// Rhai sandbox: maximum nested call levels.
    pub condition_max_call_levels: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            attribute_timeout_ms: 10_000,
            condition_max_operations: 100_000,
            condition_max_call_levels: 32,
        }
    }
}

impl EvaluationConfig {
    /// Creates an EvaluationConfig from environment variables, falling back
    /// to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            attribute_timeout_ms: env_or("ATTRIBUTE_TIMEOUT_MS", defaults.attribute_timeout_ms)?,
            condition_max_operations: env_or(
                "CONDITION_MAX_OPERATIONS",
                defaults.condition_max_operations,
            )?,
            condition_max_call_levels: env_or(
                "CONDITION_MAX_CALL_LEVELS",
                defaults.condition_max_call_levels,
            )?,
        })
    }

    pub fn attribute_timeout(&self) -> Duration {
        Duration::from_millis(self.attribute_timeout_ms)
    }

    pub fn condition_engine_config(&self) -> ConditionEngineConfig {
        ConditionEngineConfig {
            max_operations: self.condition_max_operations,
            max_call_levels: self.condition_max_call_levels,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{name}={raw}"))),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingRequired(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SERVICE BUILDER
// ============================================================================

/// Builder wiring every collaborator explicitly; no global state. The
/// condition engine defaults to a Rhai engine built from the config.
#[derive(Default)]
pub struct PdpBuilder {
    zone_resolver: Option<Arc<dyn ZoneResolver>>,
    policy_set_repository: Option<Arc<dyn PolicySetRepository>>,
    subject_reader: Option<Arc<dyn AttributeReader>>,
    resource_reader: Option<Arc<dyn AttributeReader>>,
    store: Option<Arc<dyn KeyValueStore>>,
    condition_engine: Option<Arc<dyn ConditionEngine>>,
    config: Option<EvaluationConfig>,
}

impl PdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zone_resolver(mut self, zone_resolver: Arc<dyn ZoneResolver>) -> Self {
        self.zone_resolver = Some(zone_resolver);
        self
    }

    pub fn with_policy_set_repository(
        mut self,
        policy_set_repository: Arc<dyn PolicySetRepository>,
    ) -> Self {
        self.policy_set_repository = Some(policy_set_repository);
        self
    }

    pub fn with_subject_reader(mut self, subject_reader: Arc<dyn AttributeReader>) -> Self {
        self.subject_reader = Some(subject_reader);
        self
    }

    pub fn with_resource_reader(mut self, resource_reader: Arc<dyn AttributeReader>) -> Self {
        self.resource_reader = Some(resource_reader);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_condition_engine(mut self, condition_engine: Arc<dyn ConditionEngine>) -> Self {
        self.condition_engine = Some(condition_engine);
        self
    }

    pub fn with_config(mut self, config: EvaluationConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Arc<PolicyEvaluationService>, AppError> {
        let config = self.config.unwrap_or_default();
        let zone_resolver = self
            .zone_resolver
            .ok_or(AppError::MissingDependency("zone resolver"))?;
        let policy_set_repository = self
            .policy_set_repository
            .ok_or(AppError::MissingDependency("policy set repository"))?;
        let subject_reader = self
            .subject_reader
            .ok_or(AppError::MissingDependency("subject attribute reader"))?;
        let resource_reader = self
            .resource_reader
            .ok_or(AppError::MissingDependency("resource attribute reader"))?;
        let store = self
            .store
            .ok_or(AppError::MissingDependency("key-value store"))?;
        let condition_engine = self
            .condition_engine
            .unwrap_or_else(|| Arc::new(RhaiConditionEngine::new(config.condition_engine_config())));

        let matcher =
            PolicyMatcher::new(subject_reader, resource_reader, config.attribute_timeout());
        let cache = DecisionCache::new(store);

        Ok(Arc::new(PolicyEvaluationService::new(
            zone_resolver,
            policy_set_repository,
            matcher,
            condition_engine,
            cache,
        )))
    }
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ZoneContext;
    use crate::infrastructure::{
        InMemoryAttributeReader, InMemoryKeyValueStore, InMemoryPolicySetRepository,
        StaticZoneResolver,
    };

    #[test]
    fn test_evaluation_config_defaults() {
        let config = EvaluationConfig::default();
        assert_eq!(config.attribute_timeout(), Duration::from_secs(10));
        assert_eq!(config.condition_engine_config().max_operations, 100_000);
    }

    #[test]
    fn test_evaluation_config_from_env() {
        unsafe {
            std::env::set_var("ATTRIBUTE_TIMEOUT_MS", "250");
        }
        let config = EvaluationConfig::from_env().unwrap();
        assert_eq!(config.attribute_timeout_ms, 250);
        assert_eq!(config.condition_max_call_levels, 32); // default value
        unsafe {
            std::env::remove_var("ATTRIBUTE_TIMEOUT_MS");
        }
    }

    #[test]
    fn test_evaluation_config_from_env_invalid_value() {
        unsafe {
            std::env::set_var("CONDITION_MAX_OPERATIONS", "not-a-number");
        }
        let result = EvaluationConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        unsafe {
            std::env::remove_var("CONDITION_MAX_OPERATIONS");
        }
    }

    #[test]
    fn test_builder_requires_every_dependency() {
        let result = PdpBuilder::new().build();
        assert!(matches!(
            result,
            Err(AppError::MissingDependency("zone resolver"))
        ));
    }

    #[test]
    fn test_builder_wires_in_memory_components() {
        let result = PdpBuilder::new()
            .with_zone_resolver(Arc::new(StaticZoneResolver::new(ZoneContext::new(
                "zone-1",
                "acceptance",
            ))))
            .with_policy_set_repository(Arc::new(InMemoryPolicySetRepository::new()))
            .with_subject_reader(Arc::new(InMemoryAttributeReader::new()))
            .with_resource_reader(Arc::new(InMemoryAttributeReader::new()))
            .with_store(Arc::new(InMemoryKeyValueStore::new()))
            .build();
        assert!(result.is_ok());
    }
}
