use crate::application::conditions::{ConditionContext, ConditionEngine};
use crate::application::matcher::{MatchCandidate, PolicyMatcher};
use crate::domain::evaluation::{PolicyEvaluationRequest, PolicyEvaluationResult};
use crate::domain::policy::{Effect, PolicySet};
use crate::infrastructure::{
    ANY_POLICY_SET_ID, CacheKey, DecisionCache, PolicySetRepository, ZoneResolver,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Request-shape failures returned to the caller. Everything else that can
/// go wrong during evaluation is absorbed into the result's effect and
/// message, so `evaluate` is total for well-formed requests.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("missing required request field: {0}")]
    InvalidRequest(&'static str),
    #[error("zone could not be resolved: {0}")]
    ZoneNotFound(String),
    #[error("policy_sets_evaluation_order is required: the zone has {0} policy sets")]
    AmbiguousEvaluationOrder(usize),
    #[error("policy set '{0}' does not exist in this zone")]
    PolicySetNotFound(String),
}

/// Top-level entry point: resolves the zone and the policy-set evaluation
/// order, consults the decision cache, and on a miss drives the matcher and
/// condition engine until the first applicable policy set decides.
pub struct PolicyEvaluationService {
    zone_resolver: Arc<dyn ZoneResolver>,
    policy_set_repository: Arc<dyn PolicySetRepository>,
    matcher: PolicyMatcher,
    condition_engine: Arc<dyn ConditionEngine>,
    cache: DecisionCache,
}

impl PolicyEvaluationService {
    pub fn new(
        zone_resolver: Arc<dyn ZoneResolver>,
        policy_set_repository: Arc<dyn PolicySetRepository>,
        matcher: PolicyMatcher,
        condition_engine: Arc<dyn ConditionEngine>,
        cache: DecisionCache,
    ) -> Self {
        Self {
            zone_resolver,
            policy_set_repository,
            matcher,
            condition_engine,
            cache,
        }
    }

    #[instrument(skip(self, request), fields(
        subject = %request.subject_identifier,
        resource = %request.resource_identifier,
        action = %request.action
    ))]
    pub async fn evaluate(
        &self,
        request: &PolicyEvaluationRequest,
    ) -> Result<PolicyEvaluationResult, EvaluationError> {
        validate_request(request)?;

        let zone = self
            .zone_resolver
            .current_zone()
            .await
            .map_err(|e| EvaluationError::ZoneNotFound(e.to_string()))?;

        let all_sets = match self.policy_set_repository.all_policy_sets(&zone.id).await {
            Ok(sets) => sets,
            Err(e) => {
                error!(error = %e, "Failed to load policy sets");
                return Ok(PolicyEvaluationResult::indeterminate(
                    &request.resource_identifier,
                    format!("failed to load policy sets: {e}"),
                ));
            }
        };
        if all_sets.is_empty() {
            info!("Zone has no policy sets");
            return Ok(PolicyEvaluationResult::with_effect(
                Effect::NotApplicable,
                &request.resource_identifier,
            ));
        }

        let (ordered_sets, key_set_ids) =
            resolve_evaluation_order(&request.policy_sets_evaluation_order, all_sets)?;

        let cache_key = match CacheKey::new(&zone.id, request, key_set_ids) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "Failed to build cache key; evaluating without cache");
                None
            }
        };
        if let Some(key) = &cache_key {
            match self.cache.get(key, &zone).await {
                Ok(Some(cached)) => {
                    info!("Serving decision from cache");
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Decision cache read failed; treating as miss");
                }
            }
        }

        let candidate = MatchCandidate {
            zone_id: zone.id.clone(),
            action: request.action.clone(),
            resource_uri: request.resource_identifier.clone(),
            subject_identifier: request.subject_identifier.clone(),
            supplemental_subject_attributes: request.subject_attributes.clone(),
            supplemental_resource_attributes: request.resource_attributes.clone(),
        };

        let mut dependencies: HashSet<String> = HashSet::new();
        dependencies.insert(request.resource_identifier.clone());
        let mut outcome =
            PolicyEvaluationResult::with_effect(Effect::NotApplicable, &request.resource_identifier);
        for policy_set in &ordered_sets {
            let result = self.evaluate_policy_set(policy_set, &candidate).await;
            dependencies.extend(result.resolved_resource_uris.iter().cloned());
            let decided = result.effect != Effect::NotApplicable;
            outcome = result;
            if decided {
                // First applicable policy set wins, in caller-specified
                // order; remaining sets are not consulted.
                break;
            }
        }
        outcome.resolved_resource_uris = dependencies;

        if outcome.effect != Effect::Indeterminate {
            if let Some(key) = &cache_key {
                if let Err(e) = self.cache.set(key, &mut outcome).await {
                    warn!(error = %e, "Decision cache write failed");
                }
            }
        }
        Ok(outcome)
    }

    /// Evaluates one policy set: structural match, then conditions in
    /// declaration order; the first policy whose conditions hold decides.
    /// Matching or condition failures collapse to INDETERMINATE here, as a
    /// normal result rather than an error to the caller.
    async fn evaluate_policy_set(
        &self,
        policy_set: &PolicySet,
        candidate: &MatchCandidate,
    ) -> PolicyEvaluationResult {
        let match_result = match self
            .matcher
            .match_policies(candidate, &policy_set.policies)
            .await
        {
            Ok(match_result) => match_result,
            Err(e) => {
                error!(policy_set = %policy_set.name, error = %e, "Attribute resolution failed");
                return PolicyEvaluationResult::indeterminate(
                    &candidate.resource_uri,
                    e.to_string(),
                );
            }
        };

        let mut result = PolicyEvaluationResult::with_effect(
            Effect::NotApplicable,
            &candidate.resource_uri,
        );
        result.resolved_resource_uris = match_result.resolved_resource_uris.clone();
        result.subject_attributes = match_result.subject_attributes.clone();
        result.resource_attributes = candidate.supplemental_resource_attributes.clone();

        for matched in &match_result.matched_policies {
            let context = ConditionContext {
                subject_attributes: &match_result.subject_attributes,
                resource_attributes: &matched.resource_attributes,
                resource_uri: &candidate.resource_uri,
                uri_template: matched.uri_template.as_deref(),
            };
            match self
                .condition_engine
                .evaluate(&matched.policy.conditions, &context)
            {
                Ok(true) => {
                    info!(policy_set = %policy_set.name, policy = %matched.policy.name,
                        effect = ?matched.policy.effect, "First applicable policy");
                    result.effect = matched.policy.effect;
                    result.resource_attributes = matched.resource_attributes.clone();
                    return result;
                }
                Ok(false) => continue,
                Err(e) => {
                    error!(policy_set = %policy_set.name, policy = %matched.policy.name,
                        error = %e, "Condition evaluation failed");
                    let mut indeterminate = PolicyEvaluationResult::indeterminate(
                        &candidate.resource_uri,
                        e.to_string(),
                    );
                    indeterminate.resolved_resource_uris =
                        match_result.resolved_resource_uris.clone();
                    return indeterminate;
                }
            }
        }
        result
    }
}

fn validate_request(request: &PolicyEvaluationRequest) -> Result<(), EvaluationError> {
    if request.resource_identifier.is_empty() {
        return Err(EvaluationError::InvalidRequest("resource_identifier"));
    }
    if request.subject_identifier.is_empty() {
        return Err(EvaluationError::InvalidRequest("subject_identifier"));
    }
    if request.action.is_empty() {
        return Err(EvaluationError::InvalidRequest("action"));
    }
    Ok(())
}

/// Picks the policy sets to evaluate and the ids that go into the cache key.
/// An empty order is only valid for a single-set zone, where the key carries
/// the any-policy-set sentinel instead of the set's name.
fn resolve_evaluation_order(
    order: &[String],
    all_sets: Vec<PolicySet>,
) -> Result<(Vec<PolicySet>, Vec<String>), EvaluationError> {
    if order.is_empty() {
        if all_sets.len() > 1 {
            return Err(EvaluationError::AmbiguousEvaluationOrder(all_sets.len()));
        }
        return Ok((all_sets, vec![ANY_POLICY_SET_ID.to_string()]));
    }
    let mut ordered = Vec::with_capacity(order.len());
    for name in order {
        let set = all_sets
            .iter()
            .find(|set| &set.name == name)
            .ok_or_else(|| EvaluationError::PolicySetNotFound(name.clone()))?;
        ordered.push(set.clone());
    }
    Ok((ordered, order.to_vec()))
}
