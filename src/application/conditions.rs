use crate::application::uri_template::UriTemplate;
use crate::domain::attribute::Attribute;
use crate::domain::policy::Condition;
use rhai::{AST, Array, Dynamic, Engine, EvalAltResult, Position, Scope};
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::RwLock;
use tracing::warn;

// Marker carried by the runtime error that assert_that raises. Rhai wraps
// errors raised inside registered functions, so detection goes through the
// rendered message rather than the error variant.
const ASSERTION_FAILED: &str = "policy condition assertion failed";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConditionError {
    #[error("condition '{expression}' failed to compile: {message}")]
    Validation { expression: String, message: String },
    #[error("condition evaluation failed: {message}")]
    Evaluation { message: String },
}

/// Per-request attribute bindings a condition is evaluated against.
pub struct ConditionContext<'a> {
    pub subject_attributes: &'a HashSet<Attribute>,
    pub resource_attributes: &'a [Attribute],
    pub resource_uri: &'a str,
    /// The matched policy's resource URI template, used for
    /// template-relative lookups (`resource.uri_variable(..)`).
    pub uri_template: Option<&'a str>,
}

/// The contract a condition engine must satisfy: compile-and-cache per
/// distinct expression text, AND-ed evaluation with short-circuiting, and
/// assertion-as-false semantics.
pub trait ConditionEngine: Send + Sync {
    /// Compiles the condition, caching the result. Fails with a
    /// condition-validation error on uncompilable expressions.
    fn validate(&self, condition: &Condition) -> Result<(), ConditionError>;

    /// Evaluates all conditions against the bindings. Compilation of every
    /// condition happens before any evaluation.
    fn evaluate(
        &self,
        conditions: &[Condition],
        context: &ConditionContext<'_>,
    ) -> Result<bool, ConditionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionEngineConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
}

impl Default for ConditionEngineConfig {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
        }
    }
}

/// Rhai-backed condition engine. The engine is created once with sandbox
/// limits and helper functions; expressions are compiled to AST on first use
/// and cached by expression-text hash. Only the evaluation scope is built
/// per request.
pub struct RhaiConditionEngine {
    engine: Engine,
    ast_cache: RwLock<HashMap<u64, AST>>,
}

impl RhaiConditionEngine {
    pub fn new(config: ConditionEngineConfig) -> Self {
        let mut engine = Engine::new();

        engine.set_max_operations(config.max_operations);
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_expr_depths(64, 64);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);
        engine.disable_symbol("eval");

        Self::register_bindings(&mut engine);

        Self {
            engine,
            ast_cache: RwLock::new(HashMap::new()),
        }
    }

    fn register_bindings(engine: &mut Engine) {
        engine.register_type_with_name::<SubjectHandler>("Subject");
        engine.register_fn(
            "attributes",
            |subject: &mut SubjectHandler, issuer: &str, name: &str| -> String {
                first_value(&subject.attributes, issuer, name)
            },
        );
        engine.register_fn(
            "attribute_values",
            |subject: &mut SubjectHandler, issuer: &str, name: &str| -> Array {
                all_values(&subject.attributes, issuer, name)
            },
        );
        engine.register_fn(
            "has_attribute",
            |subject: &mut SubjectHandler, issuer: &str, name: &str| -> bool {
                has_attribute(&subject.attributes, issuer, name)
            },
        );

        engine.register_type_with_name::<ResourceHandler>("Resource");
        engine.register_fn(
            "attributes",
            |resource: &mut ResourceHandler, issuer: &str, name: &str| -> String {
                first_value(&resource.attributes, issuer, name)
            },
        );
        engine.register_fn(
            "attribute_values",
            |resource: &mut ResourceHandler, issuer: &str, name: &str| -> Array {
                all_values(&resource.attributes, issuer, name)
            },
        );
        engine.register_fn(
            "has_attribute",
            |resource: &mut ResourceHandler, issuer: &str, name: &str| -> bool {
                has_attribute(&resource.attributes, issuer, name)
            },
        );
        engine.register_fn(
            "uri_variable",
            |resource: &mut ResourceHandler, name: &str| -> String {
                resource.variables.get(name).cloned().unwrap_or_default()
            },
        );

        engine.register_type_with_name::<AttributeMatcher>("Matcher");
        engine.register_fn(
            "single",
            |_: &mut AttributeMatcher, values: Array, expected: &str| -> bool {
                values
                    .iter()
                    .any(|v| v.clone().into_string().ok().as_deref() == Some(expected))
            },
        );
        engine.register_fn(
            "any",
            |_: &mut AttributeMatcher, left: Array, right: Array| -> bool {
                let wanted: Vec<String> = right
                    .iter()
                    .filter_map(|v| v.clone().into_string().ok())
                    .collect();
                left.iter()
                    .filter_map(|v| v.clone().into_string().ok())
                    .any(|v| wanted.contains(&v))
            },
        );

        engine.register_fn(
            "assert_that",
            |predicate: bool| -> Result<(), Box<EvalAltResult>> {
                if predicate {
                    Ok(())
                } else {
                    Err(EvalAltResult::ErrorRuntime(ASSERTION_FAILED.into(), Position::NONE).into())
                }
            },
        );
    }

    fn get_or_compile(&self, condition: &Condition) -> Result<AST, ConditionError> {
        let hash = hash_expression(&condition.condition);

        {
            let cache = self.ast_cache.read().unwrap();
            if let Some(ast) = cache.get(&hash) {
                return Ok(ast.clone());
            }
        }

        let ast = self
            .engine
            .compile(&condition.condition)
            .map_err(|e| ConditionError::Validation {
                expression: condition.condition.clone(),
                message: e.to_string(),
            })?;

        self.ast_cache.write().unwrap().insert(hash, ast.clone());
        Ok(ast)
    }

    fn build_scope(&self, context: &ConditionContext<'_>) -> Scope<'static> {
        let variables = context
            .uri_template
            .and_then(|template| UriTemplate::parse(template).ok())
            .and_then(|template| template.match_variables(context.resource_uri))
            .unwrap_or_default();

        let mut scope = Scope::new();
        scope.push(
            "subject",
            SubjectHandler {
                attributes: context.subject_attributes.iter().cloned().collect(),
            },
        );
        scope.push(
            "resource",
            ResourceHandler {
                attributes: context.resource_attributes.to_vec(),
                variables,
            },
        );
        scope.push("matcher", AttributeMatcher);
        scope
    }

    /// Number of distinct expressions currently compiled and cached.
    pub fn cached_expressions(&self) -> usize {
        self.ast_cache.read().unwrap().len()
    }
}

impl ConditionEngine for RhaiConditionEngine {
    fn validate(&self, condition: &Condition) -> Result<(), ConditionError> {
        self.get_or_compile(condition).map(|_| ())
    }

    fn evaluate(
        &self,
        conditions: &[Condition],
        context: &ConditionContext<'_>,
    ) -> Result<bool, ConditionError> {
        // Compile everything up front so a validation failure surfaces
        // before any condition runs.
        let mut compiled = Vec::with_capacity(conditions.len());
        for condition in conditions {
            compiled.push(self.get_or_compile(condition)?);
        }

        for (condition, ast) in conditions.iter().zip(&compiled) {
            let mut scope = self.build_scope(context);
            match self.engine.eval_ast_with_scope::<Dynamic>(&mut scope, ast) {
                Ok(value) => match value.as_bool() {
                    Ok(true) => {}
                    Ok(false) => return Ok(false),
                    Err(type_name) => {
                        return Err(ConditionError::Evaluation {
                            message: format!(
                                "condition '{}' returned non-boolean result of type {type_name}",
                                condition.condition
                            ),
                        });
                    }
                },
                Err(e) if e.to_string().contains(ASSERTION_FAILED) => {
                    return Ok(false);
                }
                Err(e) => {
                    warn!(condition = %condition.condition, error = %e, "Condition evaluation failed");
                    return Err(ConditionError::Evaluation {
                        message: format!("condition '{}': {e}", condition.condition),
                    });
                }
            }
        }
        Ok(true)
    }
}

#[derive(Clone)]
struct SubjectHandler {
    attributes: Vec<Attribute>,
}

#[derive(Clone)]
struct ResourceHandler {
    attributes: Vec<Attribute>,
    variables: HashMap<String, String>,
}

#[derive(Clone)]
struct AttributeMatcher;

fn first_value(attributes: &[Attribute], issuer: &str, name: &str) -> String {
    attributes
        .iter()
        .find(|a| a.issuer == issuer && a.name == name)
        .map(|a| a.value.clone())
        .unwrap_or_default()
}

fn all_values(attributes: &[Attribute], issuer: &str, name: &str) -> Array {
    attributes
        .iter()
        .filter(|a| a.issuer == issuer && a.name == name)
        .map(|a| Dynamic::from(a.value.clone()))
        .collect()
}

fn has_attribute(attributes: &[Attribute], issuer: &str, name: &str) -> bool {
    attributes
        .iter()
        .any(|a| a.issuer == issuer && a.name == name)
}

fn hash_expression(expression: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    expression.hash(&mut hasher);
    hasher.finish()
}
