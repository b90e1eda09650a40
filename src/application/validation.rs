use crate::application::conditions::{ConditionEngine, ConditionError};
use crate::application::uri_template::{UriTemplate, UriTemplateError};
use crate::domain::policy::PolicySet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PolicyValidationError {
    #[error("policy '{policy}': {source}")]
    Condition {
        policy: String,
        #[source]
        source: ConditionError,
    },
    #[error("policy '{policy}': {source}")]
    UriTemplate {
        policy: String,
        #[source]
        source: UriTemplateError,
    },
}

/// Validates a policy set at create/update time: every condition must
/// compile and every resource URI template must parse. Policy-authoring
/// defects surface here instead of as INDETERMINATE decisions later. As a
/// side effect, validated conditions land in the engine's compile cache.
pub struct PolicySetValidator {
    condition_engine: Arc<dyn ConditionEngine>,
}

impl PolicySetValidator {
    pub fn new(condition_engine: Arc<dyn ConditionEngine>) -> Self {
        Self { condition_engine }
    }

    pub fn validate(&self, policy_set: &PolicySet) -> Result<(), PolicyValidationError> {
        for policy in &policy_set.policies {
            for condition in &policy.conditions {
                self.condition_engine.validate(condition).map_err(|source| {
                    PolicyValidationError::Condition {
                        policy: policy.name.clone(),
                        source,
                    }
                })?;
            }
            if let Some(resource) = policy.target.as_ref().and_then(|t| t.resource.as_ref()) {
                let templates = [
                    Some(resource.uri_template.as_str()),
                    resource.attribute_uri_template.as_deref(),
                ];
                for template in templates.into_iter().flatten() {
                    UriTemplate::parse(template).map_err(|source| {
                        PolicyValidationError::UriTemplate {
                            policy: policy.name.clone(),
                            source,
                        }
                    })?;
                }
            }
        }
        Ok(())
    }
}
