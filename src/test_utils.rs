//! In-memory wiring helpers shared by unit and integration tests.

use crate::application::PolicyEvaluationService;
use crate::domain::attribute::Attribute;
use crate::domain::policy::{Condition, Effect, Policy, PolicySet, Target};
use crate::domain::zone::ZoneContext;
use crate::infrastructure::{
    DecisionCache, InMemoryAttributeReader, InMemoryKeyValueStore, InMemoryPolicySetRepository,
    StaticZoneResolver,
};
use crate::{EvaluationConfig, PdpBuilder};
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_ISSUER: &str = "https://attributes.example.org";

/// A fully wired in-memory engine plus handles to every collaborator, so
/// tests can seed policy sets and attributes, force failures, and drive the
/// cache directly.
pub struct TestPdp {
    pub service: Arc<PolicyEvaluationService>,
    pub zone: ZoneContext,
    pub policy_sets: Arc<InMemoryPolicySetRepository>,
    pub subjects: Arc<InMemoryAttributeReader>,
    pub resources: Arc<InMemoryAttributeReader>,
    pub store: Arc<InMemoryKeyValueStore>,
    pub cache: DecisionCache,
}

impl TestPdp {
    pub fn put_policy_set(&self, policy_set: PolicySet) {
        self.policy_sets.put(&self.zone.id, policy_set);
    }
}

/// Engine over a freshly generated zone.
pub fn create_test_pdp() -> TestPdp {
    create_test_pdp_with_zone(ZoneContext::new(
        &format!("zone-{}", Uuid::new_v4()),
        "test-zone",
    ))
}

pub fn create_test_pdp_with_zone(zone: ZoneContext) -> TestPdp {
    let policy_sets = Arc::new(InMemoryPolicySetRepository::new());
    let subjects = Arc::new(InMemoryAttributeReader::new());
    let resources = Arc::new(InMemoryAttributeReader::new());
    let store = Arc::new(InMemoryKeyValueStore::new());

    let service = PdpBuilder::new()
        .with_zone_resolver(Arc::new(StaticZoneResolver::new(zone.clone())))
        .with_policy_set_repository(policy_sets.clone())
        .with_subject_reader(subjects.clone())
        .with_resource_reader(resources.clone())
        .with_store(store.clone())
        .with_config(EvaluationConfig::default())
        .build()
        .expect("test PDP wiring is complete");

    TestPdp {
        service,
        zone,
        policy_sets,
        subjects,
        resources,
        store: store.clone(),
        cache: DecisionCache::new(store),
    }
}

pub fn attribute(name: &str, value: &str) -> Attribute {
    Attribute::new(TEST_ISSUER, name, value)
}

/// A policy set with a single untargeted, condition-free policy.
pub fn unconditional_policy_set(name: &str, effect: Effect) -> PolicySet {
    PolicySet {
        name: name.to_string(),
        policies: vec![Policy {
            name: format!("{name}-policy"),
            target: None,
            conditions: vec![],
            effect,
        }],
    }
}

pub fn policy_with_conditions(name: &str, effect: Effect, conditions: Vec<Condition>) -> Policy {
    Policy {
        name: name.to_string(),
        target: None,
        conditions,
        effect,
    }
}

pub fn policy_with_target(name: &str, effect: Effect, target: Target) -> Policy {
    Policy {
        name: name.to_string(),
        target: Some(target),
        conditions: vec![],
        effect,
    }
}

/// Installs a fmt subscriber honoring RUST_LOG; repeat calls are no-ops.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
