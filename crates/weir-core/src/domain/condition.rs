use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Condition expression attached to a sequence flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionExpression {
    /// The condition expression
    pub expression: String,

    /// The language/format of the expression (e.g., "jmespath")
    pub language: String,
}

impl ConditionExpression {
    /// A JMESPath predicate over the instance variables
    pub fn jmespath(expression: &str) -> Self {
        Self {
            expression: expression.to_string(),
            language: "jmespath".to_string(),
        }
    }
}

/// Evaluates a flow's condition against the instance variables
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the condition within the given variable scope
    fn evaluate(
        &self,
        expression: &str,
        language: &str,
        variables: &serde_json::Value,
    ) -> Result<bool, EngineError>;
}

/// Default condition evaluator using JMESPath
///
/// The expression is searched against the variable scope and the result's
/// truthiness decides the flow. Comparison predicates use JMESPath literal
/// syntax, e.g. ``input < `3` ``.
pub struct JmesPathEvaluator;

impl ConditionEvaluator for JmesPathEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        language: &str,
        variables: &serde_json::Value,
    ) -> Result<bool, EngineError> {
        match language {
            "jmespath" => {
                let compiled = jmespath::compile(expression).map_err(|e| {
                    EngineError::ConditionEvaluationError(format!(
                        "invalid expression '{}': {}",
                        expression, e
                    ))
                })?;
                let result = compiled.search(variables.clone()).map_err(|e| {
                    EngineError::ConditionEvaluationError(format!(
                        "evaluation of '{}' failed: {}",
                        expression, e
                    ))
                })?;
                Ok(result.is_truthy())
            }
            _ => Err(EngineError::ConditionEvaluationError(format!(
                "Unsupported condition language: {}",
                language
            ))),
        }
    }
}
