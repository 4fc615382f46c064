//! Adapter around an external constraint (FHIRPath) evaluator.
//!
//! The validator never parses expressions itself. It hands each expression to
//! a [`ConstraintEvaluator`] and normalizes whatever comes back into a
//! [`ConstraintVerdict`].

use serde_json::Value;

/// Context handed to the evaluator alongside the focus value.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// The resource being validated (`%resource`)
    pub root: &'a Value,
    /// Path of the element the constraint is attached to
    pub path: &'a str,
}

/// Raw result of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintOutcome {
    pub passed: bool,
    pub error: Option<String>,
}

impl ConstraintOutcome {
    pub fn passed() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            passed: false,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(message.into()),
        }
    }
}

pub trait ConstraintEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expression: &str,
        value: &Value,
        context: &EvaluationContext<'_>,
    ) -> ConstraintOutcome;
}

impl<F> ConstraintEvaluator for F
where
    F: Fn(&str, &Value, &EvaluationContext<'_>) -> ConstraintOutcome + Send + Sync,
{
    fn evaluate(
        &self,
        expression: &str,
        value: &Value,
        context: &EvaluationContext<'_>,
    ) -> ConstraintOutcome {
        self(expression, value, context)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintVerdict {
    Passed,
    Failed,
    /// The expression could not be evaluated
    Unevaluable(String),
}

/// Evaluate `expression` and normalize the outcome.
pub fn evaluate_constraint(
    evaluator: &dyn ConstraintEvaluator,
    expression: &str,
    value: &Value,
    context: &EvaluationContext<'_>,
) -> ConstraintVerdict {
    let outcome = evaluator.evaluate(expression, value, context);
    match (outcome.passed, outcome.error) {
        (true, _) => ConstraintVerdict::Passed,
        (false, Some(error)) => {
            tracing::debug!("Constraint '{}' could not be evaluated: {}", expression, error);
            ConstraintVerdict::Unevaluable(error)
        }
        (false, None) => ConstraintVerdict::Failed,
    }
}
