use crate::application::uri_template::UriTemplate;
use crate::domain::attribute::Attribute;
use crate::domain::policy::Policy;
use crate::infrastructure::{AttributeReader, RepoError, RepoResult};
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{instrument, warn};

/// The request slice a policy target is matched against.
#[derive(Clone, Debug)]
pub struct MatchCandidate {
    pub zone_id: String,
    pub action: String,
    pub resource_uri: String,
    pub subject_identifier: String,
    pub supplemental_subject_attributes: Vec<Attribute>,
    pub supplemental_resource_attributes: Vec<Attribute>,
}

/// A policy whose target matched, with the attributes its conditions see.
#[derive(Clone, Debug)]
pub struct MatchedPolicy {
    pub policy: Policy,
    pub resource_attributes: Vec<Attribute>,
    /// The identifier whose attributes were resolved for this policy: the
    /// request URI, or the expansion of the target's attribute URI template.
    pub resolved_uri: String,
    pub uri_template: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MatchResult {
    pub matched_policies: Vec<MatchedPolicy>,
    /// Resolved subject attributes (supplemental merged with the reader's),
    /// needed for subject-target matching even when nothing matches.
    pub subject_attributes: HashSet<Attribute>,
    /// Identifiers the evaluation depends on. Always contains the request
    /// URI.
    pub resolved_resource_uris: HashSet<String>,
}

/// Determines which policies structurally apply to a request and resolves
/// the attributes their conditions need. Condition evaluation happens in the
/// orchestrator so it can short-circuit on the first policy that holds.
pub struct PolicyMatcher {
    subject_reader: Arc<dyn AttributeReader>,
    resource_reader: Arc<dyn AttributeReader>,
    attribute_timeout: Duration,
}

impl PolicyMatcher {
    pub fn new(
        subject_reader: Arc<dyn AttributeReader>,
        resource_reader: Arc<dyn AttributeReader>,
        attribute_timeout: Duration,
    ) -> Self {
        Self {
            subject_reader,
            resource_reader,
            attribute_timeout,
        }
    }

    #[instrument(skip(self, candidate, policies), fields(action = %candidate.action, resource = %candidate.resource_uri))]
    pub async fn match_policies(
        &self,
        candidate: &MatchCandidate,
        policies: &[Policy],
    ) -> RepoResult<MatchResult> {
        let mut subject_attributes: HashSet<Attribute> = candidate
            .supplemental_subject_attributes
            .iter()
            .cloned()
            .collect();
        subject_attributes.extend(
            self.fetch(
                &self.subject_reader,
                &candidate.zone_id,
                &candidate.subject_identifier,
            )
            .await?,
        );

        let mut structural: Vec<(&Policy, String, Option<String>)> = Vec::new();
        for policy in policies {
            if !policy.applies_to_action(&candidate.action) {
                continue;
            }
            if !subject_target_matches(policy, &subject_attributes) {
                continue;
            }
            let Some((resolved_uri, template)) = resolve_resource_uri(policy, candidate) else {
                continue;
            };
            structural.push((policy, resolved_uri, template));
        }

        // Resolve each distinct identifier once, concurrently.
        let mut distinct_uris: Vec<String> = Vec::new();
        for (_, uri, _) in &structural {
            if !distinct_uris.contains(uri) {
                distinct_uris.push(uri.clone());
            }
        }
        let fetched = try_join_all(
            distinct_uris
                .iter()
                .map(|uri| self.fetch(&self.resource_reader, &candidate.zone_id, uri)),
        )
        .await?;
        let attributes_by_uri: HashMap<String, HashSet<Attribute>> =
            distinct_uris.into_iter().zip(fetched).collect();

        let mut resolved_resource_uris = HashSet::new();
        resolved_resource_uris.insert(candidate.resource_uri.clone());

        let mut matched_policies = Vec::with_capacity(structural.len());
        for (policy, resolved_uri, uri_template) in structural {
            let resolved = attributes_by_uri
                .get(&resolved_uri)
                .cloned()
                .unwrap_or_default();
            let resource_attributes =
                merge_resource_attributes(candidate, &resolved_uri, resolved);
            resolved_resource_uris.insert(resolved_uri.clone());
            matched_policies.push(MatchedPolicy {
                policy: policy.clone(),
                resource_attributes,
                resolved_uri,
                uri_template,
            });
        }

        Ok(MatchResult {
            matched_policies,
            subject_attributes,
            resolved_resource_uris,
        })
    }

    async fn fetch(
        &self,
        reader: &Arc<dyn AttributeReader>,
        zone_id: &str,
        identifier: &str,
    ) -> RepoResult<HashSet<Attribute>> {
        match timeout(
            self.attribute_timeout,
            reader.attributes_for(zone_id, identifier),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RepoError::Unavailable(format!(
                "attribute resolution for '{identifier}' timed out after {}ms",
                self.attribute_timeout.as_millis()
            ))),
        }
    }
}

fn subject_target_matches(policy: &Policy, subject_attributes: &HashSet<Attribute>) -> bool {
    let Some(subject_target) = policy.target.as_ref().and_then(|t| t.subject.as_ref()) else {
        return true;
    };
    subject_target.attributes.iter().all(|criteria| {
        subject_attributes
            .iter()
            .any(|attribute| attribute.same_criteria(criteria))
    })
}

/// Matches the target's resource URI template and decides which identifier
/// the policy needs attributes for. Returns `None` when the policy does not
/// apply to this resource.
fn resolve_resource_uri(
    policy: &Policy,
    candidate: &MatchCandidate,
) -> Option<(String, Option<String>)> {
    let Some(resource_target) = policy.target.as_ref().and_then(|t| t.resource.as_ref()) else {
        return Some((candidate.resource_uri.clone(), None));
    };

    let template = match UriTemplate::parse(&resource_target.uri_template) {
        Ok(template) => template,
        Err(e) => {
            warn!(policy = %policy.name, template = %resource_target.uri_template, error = %e,
                "Skipping policy with malformed resource URI template");
            return None;
        }
    };
    let variables = template.match_variables(&candidate.resource_uri)?;

    let resolved_uri = match resource_target.attribute_uri_template.as_deref() {
        None => candidate.resource_uri.clone(),
        Some(attribute_template) => match UriTemplate::parse(attribute_template)
            .and_then(|t| t.expand(&variables))
        {
            Ok(expanded) => expanded,
            Err(e) => {
                // Authoring error; fall back to the request URI.
                warn!(policy = %policy.name, template = %attribute_template, error = %e,
                    "Failed to expand attribute URI template");
                candidate.resource_uri.clone()
            }
        },
    };
    Some((resolved_uri, Some(resource_target.uri_template.clone())))
}

/// Supplemental attributes apply to the originally requested resource only.
/// Resolver attributes follow in sorted order so cached results stay
/// deterministic.
fn merge_resource_attributes(
    candidate: &MatchCandidate,
    resolved_uri: &str,
    resolved: HashSet<Attribute>,
) -> Vec<Attribute> {
    let mut attributes = if resolved_uri == candidate.resource_uri {
        candidate.supplemental_resource_attributes.clone()
    } else {
        Vec::new()
    };
    let mut from_reader: Vec<Attribute> = resolved
        .into_iter()
        .filter(|a| !attributes.contains(a))
        .collect();
    from_reader.sort();
    attributes.extend(from_reader);
    attributes
}
