use access_control_service::domain::policy::{
    Condition, Effect, Policy, PolicySet, ResourceTarget, SubjectTarget, Target,
};
use access_control_service::domain::{PolicyEvaluationRequest, ZoneContext};
use access_control_service::infrastructure::{
    InMemoryAttributeReader, InMemoryKeyValueStore, InMemoryPolicySetRepository, RepoError,
    RepoResult, ZoneResolver,
};
use access_control_service::test_utils::{
    TEST_ISSUER, attribute, create_test_pdp, init_test_tracing, policy_with_conditions,
    policy_with_target, unconditional_policy_set,
};
use access_control_service::{EvaluationError, PdpBuilder};
use std::collections::HashSet;
use std::sync::Arc;

fn request(resource: &str, subject: &str, action: &str) -> PolicyEvaluationRequest {
    PolicyEvaluationRequest::new(resource, subject, action)
}

// ===== REQUEST-SHAPE ERRORS =====

#[tokio::test]
async fn test_missing_required_fields_are_client_errors() {
    let pdp = create_test_pdp();

    let mut missing_action = request("/x-files", "mulder", "GET");
    missing_action.action = String::new();
    assert!(matches!(
        pdp.service.evaluate(&missing_action).await,
        Err(EvaluationError::InvalidRequest("action"))
    ));

    let mut missing_subject = request("/x-files", "mulder", "GET");
    missing_subject.subject_identifier = String::new();
    assert!(matches!(
        pdp.service.evaluate(&missing_subject).await,
        Err(EvaluationError::InvalidRequest("subject_identifier"))
    ));

    let mut missing_resource = request("/x-files", "mulder", "GET");
    missing_resource.resource_identifier = String::new();
    assert!(matches!(
        pdp.service.evaluate(&missing_resource).await,
        Err(EvaluationError::InvalidRequest("resource_identifier"))
    ));
}

#[tokio::test]
async fn test_zone_resolution_failure_is_a_client_error() {
    struct FailingZoneResolver;

    #[async_trait::async_trait]
    impl ZoneResolver for FailingZoneResolver {
        async fn current_zone(&self) -> RepoResult<ZoneContext> {
            Err(RepoError::NotFound("no tenant context".to_string()))
        }
    }

    let service = PdpBuilder::new()
        .with_zone_resolver(Arc::new(FailingZoneResolver))
        .with_policy_set_repository(Arc::new(InMemoryPolicySetRepository::new()))
        .with_subject_reader(Arc::new(InMemoryAttributeReader::new()))
        .with_resource_reader(Arc::new(InMemoryAttributeReader::new()))
        .with_store(Arc::new(InMemoryKeyValueStore::new()))
        .build()
        .unwrap();

    assert!(matches!(
        service.evaluate(&request("/x-files", "mulder", "GET")).await,
        Err(EvaluationError::ZoneNotFound(_))
    ));
}

#[tokio::test]
async fn test_empty_zone_is_not_applicable_without_caching() {
    let pdp = create_test_pdp();
    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::NotApplicable);
    assert!(pdp.store.is_empty());
}

#[tokio::test]
async fn test_empty_order_with_two_policy_sets_is_ambiguous() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(unconditional_policy_set("first", Effect::Permit));
    pdp.put_policy_set(unconditional_policy_set("second", Effect::Deny));

    assert!(matches!(
        pdp.service.evaluate(&request("/x-files", "mulder", "GET")).await,
        Err(EvaluationError::AmbiguousEvaluationOrder(2))
    ));
}

#[tokio::test]
async fn test_unknown_policy_set_in_order_is_rejected() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(unconditional_policy_set("default", Effect::Permit));

    let mut bad_order = request("/x-files", "mulder", "GET");
    bad_order.policy_sets_evaluation_order = vec!["no-such-set".to_string()];
    assert!(matches!(
        pdp.service.evaluate(&bad_order).await,
        Err(EvaluationError::PolicySetNotFound(name)) if name == "no-such-set"
    ));
}

// ===== DECISIONS =====

#[tokio::test]
async fn test_unconditional_permit_matches_any_request() {
    init_test_tracing();
    let pdp = create_test_pdp();
    pdp.put_policy_set(unconditional_policy_set("default", Effect::Permit));

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
    assert_eq!(
        result.resolved_resource_uris,
        HashSet::from(["/x-files".to_string()])
    );
}

#[tokio::test]
async fn test_action_mismatch_is_not_applicable() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_target(
            "post-only",
            Effect::Permit,
            Target {
                action: Some("POST".to_string()),
                ..Target::default()
            },
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::NotApplicable);
}

#[tokio::test]
async fn test_unmet_condition_falls_through_to_not_applicable() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_conditions(
            "admins-only",
            Effect::Permit,
            vec![Condition::new(&format!(
                "subject.attributes(\"{TEST_ISSUER}\", \"role\") == \"administrator\""
            ))],
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::NotApplicable);
}

#[tokio::test]
async fn test_condition_over_resolved_subject_attributes() {
    let pdp = create_test_pdp();
    pdp.subjects
        .put(&pdp.zone.id, "mulder", [attribute("role", "administrator")]);
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_conditions(
            "admins-only",
            Effect::Permit,
            vec![Condition::new(&format!(
                "subject.attributes(\"{TEST_ISSUER}\", \"role\") == \"administrator\""
            ))],
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
    assert!(result
        .subject_attributes
        .contains(&attribute("role", "administrator")));
}

#[tokio::test]
async fn test_caller_supplied_attributes_are_merged() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_conditions(
            "admins-only",
            Effect::Permit,
            vec![Condition::new(&format!(
                "subject.attributes(\"{TEST_ISSUER}\", \"role\") == \"administrator\""
            ))],
        )],
    });

    let mut with_supplemental = request("/x-files", "mulder", "GET");
    with_supplemental.subject_attributes = vec![attribute("role", "administrator")];
    let result = pdp.service.evaluate(&with_supplemental).await.unwrap();
    assert_eq!(result.effect, Effect::Permit);
}

#[tokio::test]
async fn test_first_applicable_policy_within_a_set_wins() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![
            policy_with_conditions("never-matches", Effect::Deny, vec![Condition::new("false")]),
            policy_with_conditions("always-matches", Effect::Permit, vec![]),
            policy_with_conditions("shadowed", Effect::Deny, vec![]),
        ],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
}

#[tokio::test]
async fn test_first_applicable_policy_set_short_circuits() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "inapplicable".to_string(),
        policies: vec![policy_with_conditions(
            "never",
            Effect::Permit,
            vec![Condition::new("false")],
        )],
    });
    pdp.put_policy_set(unconditional_policy_set("decisive", Effect::Deny));

    // The inapplicable set falls through to the decisive one.
    let mut ordered = request("/x-files", "mulder", "GET");
    ordered.policy_sets_evaluation_order =
        vec!["inapplicable".to_string(), "decisive".to_string()];
    let result = pdp.service.evaluate(&ordered).await.unwrap();
    assert_eq!(result.effect, Effect::Deny);

    // With the decisive set first, the second set is never consulted: only
    // one subject-attribute resolution happens.
    let before = pdp.subjects.read_count();
    let mut reversed = request("/x-files", "scully", "GET");
    reversed.policy_sets_evaluation_order =
        vec!["decisive".to_string(), "inapplicable".to_string()];
    let result = pdp.service.evaluate(&reversed).await.unwrap();
    assert_eq!(result.effect, Effect::Deny);
    assert_eq!(pdp.subjects.read_count(), before + 1);
}

#[tokio::test]
async fn test_subject_target_criteria_filter_by_issuer_and_name() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_target(
            "agents-only",
            Effect::Permit,
            Target {
                subject: Some(SubjectTarget {
                    attributes: vec![attribute("role", "")],
                }),
                ..Target::default()
            },
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::NotApplicable);

    pdp.subjects
        .put(&pdp.zone.id, "scully", [attribute("role", "agent")]);
    let result = pdp
        .service
        .evaluate(&request("/x-files", "scully", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
}

#[tokio::test]
async fn test_uri_template_resolves_sub_resource_attributes() {
    let pdp = create_test_pdp();
    pdp.resources.put(
        &pdp.zone.id,
        "/sites/sanramon",
        [attribute("region", "west")],
    );
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![Policy {
            name: "west-sites".to_string(),
            target: Some(Target {
                resource: Some(ResourceTarget {
                    uri_template: "/secured/sites/{site_id}".to_string(),
                    attribute_uri_template: Some("/sites/{site_id}".to_string()),
                }),
                ..Target::default()
            }),
            conditions: vec![Condition::new(&format!(
                "resource.attributes(\"{TEST_ISSUER}\", \"region\") == \"west\" \
                 && resource.uri_variable(\"site_id\") == \"sanramon\""
            ))],
            effect: Effect::Permit,
        }],
    });

    let result = pdp
        .service
        .evaluate(&request("/secured/sites/sanramon", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
    assert_eq!(
        result.resolved_resource_uris,
        HashSet::from([
            "/secured/sites/sanramon".to_string(),
            "/sites/sanramon".to_string()
        ])
    );
    assert_eq!(
        result.resource_attributes,
        vec![attribute("region", "west")]
    );
}

// ===== INDETERMINATE =====

#[tokio::test]
async fn test_attribute_failure_yields_indeterminate_result() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(unconditional_policy_set("default", Effect::Permit));
    pdp.subjects
        .fail_next(RepoError::Unavailable("adapter offline".to_string()));

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Indeterminate);
    assert!(result.message.as_deref().unwrap().contains("adapter offline"));

    // The failure is transient and was not cached; the retry succeeds.
    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
}

#[tokio::test]
async fn test_attribute_limit_yields_indeterminate_result() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(unconditional_policy_set("default", Effect::Permit));
    pdp.subjects.fail_next(RepoError::LimitExceeded {
        identifier: "mulder".to_string(),
        count: 5_000,
        max: 1_000,
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Indeterminate);
    assert!(result.message.as_deref().unwrap().contains("limit"));
}

#[tokio::test]
async fn test_condition_runtime_error_yields_indeterminate_result() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_conditions(
            "broken",
            Effect::Permit,
            vec![Condition::new("undefined_variable == 1")],
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Indeterminate);
    assert!(result.message.is_some());
}

#[tokio::test]
async fn test_failed_assertion_is_false_not_indeterminate() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_conditions(
            "asserting",
            Effect::Permit,
            vec![Condition::new(&format!(
                "assert_that(subject.has_attribute(\"{TEST_ISSUER}\", \"role\")); true"
            ))],
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::NotApplicable);
}

// ===== CACHING BEHAVIOR =====

#[tokio::test]
async fn test_repeated_evaluation_is_idempotent_and_served_from_cache() {
    let pdp = create_test_pdp();
    pdp.put_policy_set(unconditional_policy_set("default", Effect::Permit));

    let first = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    let resolver_calls = pdp.subjects.read_count();

    let second = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(first.effect, second.effect);
    // No attribute resolution on the second call: it hit the cache.
    assert_eq!(pdp.subjects.read_count(), resolver_calls);
}

#[tokio::test]
async fn test_inherited_attributes_feed_conditions() {
    let pdp = create_test_pdp();
    pdp.subjects
        .put(&pdp.zone.id, "mulder", [attribute("unit", "x-files")]);
    pdp.subjects.put(&pdp.zone.id, "fbi", [attribute("agency", "fbi")]);
    pdp.subjects
        .set_parents(&pdp.zone.id, "mulder", vec!["fbi".to_string()]);
    pdp.put_policy_set(PolicySet {
        name: "default".to_string(),
        policies: vec![policy_with_conditions(
            "agency-wide",
            Effect::Permit,
            vec![Condition::new(&format!(
                "subject.attributes(\"{TEST_ISSUER}\", \"agency\") == \"fbi\""
            ))],
        )],
    });

    let result = pdp
        .service
        .evaluate(&request("/x-files", "mulder", "GET"))
        .await
        .unwrap();
    assert_eq!(result.effect, Effect::Permit);
}
