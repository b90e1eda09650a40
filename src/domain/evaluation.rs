use crate::domain::attribute::Attribute;
use crate::domain::policy::Effect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A request for an access decision. The three identifiers are required and
/// validated non-empty; everything else defaults to empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyEvaluationRequest {
    pub resource_identifier: String,
    pub subject_identifier: String,
    pub action: String,
    /// Supplemental attributes supplied by the caller, merged with the
    /// resolved ones. Absent and empty are equivalent.
    #[serde(default)]
    pub subject_attributes: Vec<Attribute>,
    #[serde(default)]
    pub resource_attributes: Vec<Attribute>,
    /// Ordered policy-set names to evaluate. Empty means the zone must hold
    /// exactly one policy set.
    #[serde(default)]
    pub policy_sets_evaluation_order: Vec<String>,
}

impl PolicyEvaluationRequest {
    pub fn new(resource_identifier: &str, subject_identifier: &str, action: &str) -> Self {
        Self {
            resource_identifier: resource_identifier.to_string(),
            subject_identifier: subject_identifier.to_string(),
            action: action.to_string(),
            subject_attributes: vec![],
            resource_attributes: vec![],
            policy_sets_evaluation_order: vec![],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyEvaluationResult {
    pub effect: Effect,
    /// The resolved subject attribute set actually used for the decision.
    pub subject_attributes: HashSet<Attribute>,
    /// Resolved resource attributes, ordered: the first matching policy's
    /// contribution comes first.
    pub resource_attributes: Vec<Attribute>,
    /// Resource identifiers this decision depends on. Always contains the
    /// originally requested resource identifier.
    pub resolved_resource_uris: HashSet<String>,
    /// Decision evaluation time; re-stamped when the decision is cached.
    pub timestamp: DateTime<Utc>,
    /// Diagnostic text, set only for error / INDETERMINATE cases.
    pub message: Option<String>,
}

impl PolicyEvaluationResult {
    pub fn with_effect(effect: Effect, requested_resource: &str) -> Self {
        let mut resolved_resource_uris = HashSet::new();
        resolved_resource_uris.insert(requested_resource.to_string());
        Self {
            effect,
            subject_attributes: HashSet::new(),
            resource_attributes: vec![],
            resolved_resource_uris,
            timestamp: Utc::now(),
            message: None,
        }
    }

    pub fn indeterminate(requested_resource: &str, message: String) -> Self {
        let mut result = Self::with_effect(Effect::Indeterminate, requested_resource);
        result.message = Some(message);
        result
    }
}
