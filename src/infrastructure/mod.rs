use crate::domain::attribute::Attribute;
use crate::domain::policy::PolicySet;
use crate::domain::zone::ZoneContext;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Failures surfaced by the consumed collaborators (stores, resolvers,
/// readers). Evaluation maps these into client errors or INDETERMINATE
/// results; it never panics on them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("attribute limit exceeded for '{identifier}': {count} attributes (max {max})")]
    LimitExceeded {
        identifier: String,
        count: usize,
        max: usize,
    },
}

pub type RepoResult<T> = Result<T, RepoError>;

// Infrastructure layer: consumed-collaborator interfaces and their
// in-memory reference implementations.

pub mod attribute_reader;
pub use attribute_reader::InMemoryAttributeReader;

pub mod decision_cache;
pub use decision_cache::{ANY_POLICY_SET_ID, CacheKey, DecisionCache};

pub mod memory_store;
pub use memory_store::InMemoryKeyValueStore;

/// Resolves the caller's tenant context. All policy-set lookups and cache
/// keys are scoped by the returned zone's id.
#[async_trait]
pub trait ZoneResolver: Send + Sync {
    async fn current_zone(&self) -> RepoResult<ZoneContext>;
}

#[async_trait]
pub trait PolicySetRepository: Send + Sync {
    async fn all_policy_sets(&self, zone_id: &str) -> RepoResult<Vec<PolicySet>>;
}

/// Returns the directly-assigned plus inherited attributes of a subject or
/// resource identifier. Implementations enforce their own attribute-count
/// limits and are expected to walk any inheritance hierarchy themselves.
#[async_trait]
pub trait AttributeReader: Send + Sync {
    async fn attributes_for(
        &self,
        zone_id: &str,
        identifier: &str,
    ) -> RepoResult<HashSet<Attribute>>;
}

/// The backing store for the decision cache: UTF-8 string keys and values,
/// atomic single-key operations, best-effort batches.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> RepoResult<Option<String>>;
    async fn multi_get(&self, keys: &[String]) -> RepoResult<Vec<Option<String>>>;
    async fn set(&self, key: &str, value: &str) -> RepoResult<()>;
    /// Writes only when the key does not exist; returns whether it wrote.
    async fn set_if_not_exists(&self, key: &str, value: &str) -> RepoResult<bool>;
    async fn multi_set(&self, entries: &[(String, String)]) -> RepoResult<()>;
    async fn delete(&self, key: &str) -> RepoResult<()>;
    async fn delete_matching(&self, key_prefix: &str) -> RepoResult<u64>;
    async fn flush_all(&self) -> RepoResult<()>;
}

/// Zone resolver for deployments (and tests) where the tenant context is
/// fixed per engine instance.
pub struct StaticZoneResolver {
    zone: ZoneContext,
}

impl StaticZoneResolver {
    pub fn new(zone: ZoneContext) -> Self {
        Self { zone }
    }
}

#[async_trait]
impl ZoneResolver for StaticZoneResolver {
    async fn current_zone(&self) -> RepoResult<ZoneContext> {
        Ok(self.zone.clone())
    }
}

pub struct InMemoryPolicySetRepository {
    pub policy_sets: Mutex<HashMap<String, Vec<PolicySet>>>, // zone_id -> policy sets
}

impl InMemoryPolicySetRepository {
    pub fn new() -> Self {
        Self {
            policy_sets: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, zone_id: &str, policy_set: PolicySet) {
        let mut policy_sets = self.policy_sets.lock().unwrap();
        let sets = policy_sets.entry(zone_id.to_string()).or_default();
        sets.retain(|existing| existing.name != policy_set.name);
        sets.push(policy_set);
    }

    pub fn remove(&self, zone_id: &str, name: &str) {
        let mut policy_sets = self.policy_sets.lock().unwrap();
        if let Some(sets) = policy_sets.get_mut(zone_id) {
            sets.retain(|existing| existing.name != name);
        }
    }
}

impl Default for InMemoryPolicySetRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicySetRepository for InMemoryPolicySetRepository {
    async fn all_policy_sets(&self, zone_id: &str) -> RepoResult<Vec<PolicySet>> {
        let policy_sets = self.policy_sets.lock().unwrap();
        Ok(policy_sets.get(zone_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::PolicySet;

    #[tokio::test]
    async fn test_static_zone_resolver_returns_configured_zone() {
        let resolver = StaticZoneResolver::new(ZoneContext::new("zone-1", "acceptance"));
        let zone = resolver.current_zone().await.unwrap();
        assert_eq!(zone.id, "zone-1");
    }

    #[tokio::test]
    async fn test_policy_set_repository_is_zone_scoped() {
        let repo = InMemoryPolicySetRepository::new();
        repo.put(
            "zone-1",
            PolicySet {
                name: "default".to_string(),
                policies: vec![],
            },
        );
        assert_eq!(repo.all_policy_sets("zone-1").await.unwrap().len(), 1);
        assert!(repo.all_policy_sets("zone-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_policy_set_put_replaces_by_name() {
        let repo = InMemoryPolicySetRepository::new();
        repo.put(
            "zone-1",
            PolicySet {
                name: "default".to_string(),
                policies: vec![],
            },
        );
        repo.put(
            "zone-1",
            PolicySet {
                name: "default".to_string(),
                policies: vec![],
            },
        );
        assert_eq!(repo.all_policy_sets("zone-1").await.unwrap().len(), 1);

        repo.remove("zone-1", "default");
        assert!(repo.all_policy_sets("zone-1").await.unwrap().is_empty());
    }
}
