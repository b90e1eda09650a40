use super::{KeyValueStore, RepoError, RepoResult};
use crate::domain::evaluation::{PolicyEvaluationRequest, PolicyEvaluationResult};
use crate::domain::policy::Effect;
use crate::domain::zone::ZoneContext;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Sentinel policy-set id used in cache keys when the request names no
/// explicit evaluation order and the zone holds exactly one policy set. Any
/// policy-set change stamps this id, so such decisions never outlive a
/// policy-set mutation in their zone.
pub const ANY_POLICY_SET_ID: &str = "any-policy-set";

/// Identifies a cached decision: zone plus hashes of the subject, resource,
/// and the full request, carrying the resolved policy-set ids the decision
/// depends on for invalidation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    pub zone_id: String,
    pub subject_id: String,
    pub resource_id: String,
    request_hash: String,
    pub policy_set_ids: Vec<String>,
}

impl CacheKey {
    /// The policy-set id list must already be resolved: the sentinel for an
    /// implicit single-set order, the explicit names otherwise. It is
    /// immutable for the lifetime of the key.
    pub fn new(
        zone_id: &str,
        request: &PolicyEvaluationRequest,
        policy_set_ids: Vec<String>,
    ) -> RepoResult<Self> {
        let request_json = serde_json::to_string(request)
            .map_err(|e| RepoError::Unavailable(format!("failed to fingerprint request: {e}")))?;
        Ok(Self {
            zone_id: zone_id.to_string(),
            subject_id: request.subject_identifier.clone(),
            resource_id: request.resource_identifier.clone(),
            request_hash: hash_hex(&request_json),
            policy_set_ids,
        })
    }

    pub fn decision_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.zone_id,
            hash_hex(&self.subject_id),
            hash_hex(&self.resource_id),
            self.request_hash
        )
    }

    pub fn policy_set_key(zone_id: &str, policy_set_id: &str) -> String {
        format!("{}:set-id:{}", zone_id, hash_hex(policy_set_id))
    }

    pub fn resource_key(zone_id: &str, resource_id: &str) -> String {
        format!("{}:res-id:{}", zone_id, hash_hex(resource_id))
    }

    pub fn subject_key(zone_id: &str, subject_id: &str) -> String {
        format!("{}:sub-id:{}", zone_id, hash_hex(subject_id))
    }
}

fn hash_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Layers invalidation semantics over the key-value store: decisions are
/// reusable until any entity they depend on (subject, resource, policy set,
/// or an external connector's freshness window) changes. A missing timestamp
/// always reads as "changed"; staleness fails toward a miss, never toward a
/// false hit.
pub struct DecisionCache {
    store: Arc<dyn KeyValueStore>,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, key, zone), fields(zone = %key.zone_id))]
    pub async fn get(
        &self,
        key: &CacheKey,
        zone: &ZoneContext,
    ) -> RepoResult<Option<PolicyEvaluationResult>> {
        let mut keys: Vec<String> = key
            .policy_set_ids
            .iter()
            .map(|id| CacheKey::policy_set_key(&key.zone_id, id))
            .collect();
        keys.push(CacheKey::subject_key(&key.zone_id, &key.subject_id));
        keys.push(CacheKey::resource_key(&key.zone_id, &key.resource_id));
        keys.push(key.decision_key());
        let values = self.store.multi_get(&keys).await?;

        let set_count = key.policy_set_ids.len();
        let Some(decision_json) = values.last().cloned().flatten() else {
            return Ok(None);
        };
        let result: PolicyEvaluationResult = match serde_json::from_str(&decision_json) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Evicting undeserializable cached decision");
                self.store.delete(&key.decision_key()).await?;
                return Ok(None);
            }
        };
        let decision_time = result.timestamp;

        // Policy-set changes invalidate regardless of connector config.
        for timestamp in &values[..set_count] {
            if is_stale(timestamp.as_deref(), decision_time) {
                self.store.delete(&key.decision_key()).await?;
                return Ok(None);
            }
        }

        if zone.has_connectors() {
            // Externally-fetched attributes go stale by elapsed time, per
            // connector, rather than by local entity timestamps.
            let elapsed = Utc::now().signed_duration_since(decision_time);
            for connector in [&zone.subject_connector, &zone.resource_connector]
                .into_iter()
                .flatten()
            {
                if elapsed >= Duration::minutes(connector.max_cached_interval_minutes) {
                    debug!("Cached decision expired against connector interval");
                    self.store.delete(&key.decision_key()).await?;
                    return Ok(None);
                }
            }
        } else {
            let subject_timestamp = &values[set_count];
            if is_stale(subject_timestamp.as_deref(), decision_time) {
                self.store.delete(&key.decision_key()).await?;
                return Ok(None);
            }

            let only_requested = result.resolved_resource_uris.len() == 1
                && result.resolved_resource_uris.contains(&key.resource_id);
            if only_requested {
                // Already fetched in the first batch.
                if is_stale(values[set_count + 1].as_deref(), decision_time) {
                    self.store.delete(&key.decision_key()).await?;
                    return Ok(None);
                }
            } else {
                let resource_keys: Vec<String> = result
                    .resolved_resource_uris
                    .iter()
                    .map(|uri| CacheKey::resource_key(&key.zone_id, uri))
                    .collect();
                for timestamp in self.store.multi_get(&resource_keys).await? {
                    if is_stale(timestamp.as_deref(), decision_time) {
                        self.store.delete(&key.decision_key()).await?;
                        return Ok(None);
                    }
                }
            }
        }

        Ok(Some(result))
    }

    /// Stamps a last-modified timestamp for every entity the decision
    /// depends on, but only where none exists yet: an invalidation marker
    /// written by an administrative change must never be resurrected. The
    /// decision itself is then stored under its own fresh timestamp.
    #[instrument(skip(self, key, result), fields(zone = %key.zone_id, effect = ?result.effect))]
    pub async fn set(
        &self,
        key: &CacheKey,
        result: &mut PolicyEvaluationResult,
    ) -> RepoResult<()> {
        if result.effect == Effect::Indeterminate {
            debug!("Not caching INDETERMINATE decision");
            return Ok(());
        }

        let now = Utc::now();
        let now_text = now.to_rfc3339();
        self.store
            .set_if_not_exists(
                &CacheKey::subject_key(&key.zone_id, &key.subject_id),
                &now_text,
            )
            .await?;
        for uri in &result.resolved_resource_uris {
            self.store
                .set_if_not_exists(&CacheKey::resource_key(&key.zone_id, uri), &now_text)
                .await?;
        }
        for policy_set_id in &key.policy_set_ids {
            self.store
                .set_if_not_exists(
                    &CacheKey::policy_set_key(&key.zone_id, policy_set_id),
                    &now_text,
                )
                .await?;
        }

        result.timestamp = now;
        let decision_json = serde_json::to_string(result)
            .map_err(|e| RepoError::Unavailable(format!("failed to serialize decision: {e}")))?;
        self.store.set(&key.decision_key(), &decision_json).await
    }

    /// Unconditionally stamps "now" for a policy set and for the
    /// any-policy-set sentinel, so decisions cached without an explicit
    /// evaluation order are invalidated too.
    pub async fn reset_for_policy_set(
        &self,
        zone_id: &str,
        policy_set_id: &str,
    ) -> RepoResult<()> {
        let now_text = Utc::now().to_rfc3339();
        self.store
            .multi_set(&[
                (CacheKey::policy_set_key(zone_id, policy_set_id), now_text.clone()),
                (CacheKey::policy_set_key(zone_id, ANY_POLICY_SET_ID), now_text),
            ])
            .await
    }

    pub async fn reset_for_resource(&self, zone_id: &str, resource_id: &str) -> RepoResult<()> {
        self.store
            .set(
                &CacheKey::resource_key(zone_id, resource_id),
                &Utc::now().to_rfc3339(),
            )
            .await
    }

    pub async fn reset_for_resources(
        &self,
        zone_id: &str,
        resource_ids: &[String],
    ) -> RepoResult<()> {
        let now_text = Utc::now().to_rfc3339();
        let pairs: Vec<(String, String)> = resource_ids
            .iter()
            .map(|id| (CacheKey::resource_key(zone_id, id), now_text.clone()))
            .collect();
        self.store.multi_set(&pairs).await
    }

    pub async fn reset_for_subject(&self, zone_id: &str, subject_id: &str) -> RepoResult<()> {
        self.store
            .set(
                &CacheKey::subject_key(zone_id, subject_id),
                &Utc::now().to_rfc3339(),
            )
            .await
    }

    pub async fn reset_for_subjects(
        &self,
        zone_id: &str,
        subject_ids: &[String],
    ) -> RepoResult<()> {
        let now_text = Utc::now().to_rfc3339();
        let pairs: Vec<(String, String)> = subject_ids
            .iter()
            .map(|id| (CacheKey::subject_key(zone_id, id), now_text.clone()))
            .collect();
        self.store.multi_set(&pairs).await
    }

    /// Flushes the whole cache. Disaster-recovery and test isolation only.
    pub async fn reset(&self) -> RepoResult<()> {
        self.store.flush_all().await
    }
}

/// A missing or unparsable timestamp always reads as stale.
fn is_stale(timestamp: Option<&str>, decision_time: DateTime<Utc>) -> bool {
    match timestamp {
        None => true,
        Some(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(entity_time) => entity_time.with_timezone(&Utc) > decision_time,
            Err(_) => true,
        },
    }
}
