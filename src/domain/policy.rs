use crate::domain::attribute::Attribute;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating a request against zone policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Effect {
    Permit,
    Deny,
    NotApplicable,
    Indeterminate,
}

/// An ordered collection of policies evaluated as a unit. The first policy
/// whose target matches and whose conditions all hold determines the effect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicySet {
    pub name: String, // unique within a zone
    pub policies: Vec<Policy>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub target: Option<Target>, // no target matches any subject/resource/action
    #[serde(default)]
    pub conditions: Vec<Condition>, // AND-ed; empty means "always true"
    pub effect: Effect, // policies only carry Permit or Deny
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Target {
    pub name: Option<String>,
    pub subject: Option<SubjectTarget>,
    pub action: Option<String>, // comma-separated verbs, e.g. "GET, POST"
    pub resource: Option<ResourceTarget>,
}

/// Subject criteria: the policy matches only if the resolved subject
/// attributes contain each listed attribute by issuer and name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubjectTarget {
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceTarget {
    pub uri_template: String, // e.g. "/sites/{site_id}/assets/{asset_id}"
    /// Expanded with the variables bound by matching `uri_template` against
    /// the request URI; the expansion is the sub-resource identifier whose
    /// attributes the policy needs.
    pub attribute_uri_template: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub name: Option<String>,
    pub condition: String, // boolean expression over subject/resource accessors
}

impl Condition {
    pub fn new(condition: &str) -> Self {
        Self {
            name: None,
            condition: condition.to_string(),
        }
    }
}

impl Policy {
    /// Whether the policy's target action list (if any) contains the given
    /// action. Membership is a case-sensitive verb comparison.
    pub fn applies_to_action(&self, action: &str) -> bool {
        match self.target.as_ref().and_then(|t| t.action.as_deref()) {
            None => true,
            Some(list) => list.split(',').any(|verb| verb.trim() == action),
        }
    }
}
