// Application layer: the evaluation services driven by the consumed
// infrastructure interfaces.

pub mod conditions;
pub mod evaluation;
pub mod matcher;
pub mod uri_template;
pub mod validation;

pub use conditions::{
    ConditionContext, ConditionEngine, ConditionEngineConfig, ConditionError, RhaiConditionEngine,
};
pub use evaluation::{EvaluationError, PolicyEvaluationService};
pub use matcher::{MatchCandidate, MatchResult, MatchedPolicy, PolicyMatcher};
pub use uri_template::{UriTemplate, UriTemplateError};
pub use validation::{PolicySetValidator, PolicyValidationError};
