//! Constraint (invariant expression) pass.

use serde_json::Value;
use tracing::debug;

use super::path;
use super::{IssueCollector, ValidationContext};
use crate::evaluator::{ConstraintEvaluator, ConstraintVerdict, EvaluationContext, evaluate_constraint};
use crate::types::{Constraint, ConstraintSeverity, IssueCode, Schema};

/// Keys enforced structurally by the walker and global invariant checks.
const NATIVE_CONSTRAINTS: &[&str] = &["ele-1", "ext-1"];

/// Evaluate every constraint expression of `schema` against the resource.
///
/// The root element's constraints use the resource as focus. Other
/// constraints are evaluated once per value found at the element's path and
/// skipped when the element is absent.
pub fn check_constraints(
    schema: &Schema,
    resource: &Value,
    evaluator: &dyn ConstraintEvaluator,
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    for (index, element) in schema.elements.iter().enumerate() {
        if element.is_slice_scoped() || element.constraints.is_empty() {
            continue;
        }

        let targets = if index == 0 {
            vec![path::Located {
                path: ctx.path.clone(),
                value: resource,
            }]
        } else {
            path::resolve(resource, &element.path)
        };
        if targets.is_empty() {
            continue;
        }

        let eval_ctx = EvaluationContext {
            root: resource,
            path: &element.path,
        };

        for constraint in &element.constraints {
            if NATIVE_CONSTRAINTS.contains(&constraint.key.as_str()) {
                continue;
            }
            let Some(expression) = constraint.expression.as_deref() else {
                debug!("Constraint {} on {} has no expression", constraint.key, element.path);
                continue;
            };

            for target in &targets {
                if sink.should_stop() {
                    return;
                }
                let verdict = evaluate_constraint(evaluator, expression, target.value, &eval_ctx);
                let target_ctx = ValidationContext {
                    path: target.path.clone(),
                    ..ctx.clone()
                };
                report(constraint, verdict, &target_ctx, sink);
            }
        }
    }
}

fn report(
    constraint: &Constraint,
    verdict: ConstraintVerdict,
    ctx: &ValidationContext<'_>,
    sink: &mut IssueCollector,
) {
    match verdict {
        ConstraintVerdict::Passed => {}
        ConstraintVerdict::Failed => {
            let message = format!("Constraint failed: {}: {}", constraint.key, constraint.human);
            let issue = match constraint.severity {
                ConstraintSeverity::Error => ctx.error(IssueCode::Invariant, message),
                ConstraintSeverity::Warning => ctx.warning(IssueCode::Invariant, message),
            };
            sink.push(issue);
        }
        ConstraintVerdict::Unevaluable(error) => sink.push(ctx.warning(
            IssueCode::Invariant,
            format!(
                "Constraint {} could not be evaluated: {}",
                constraint.key, error
            ),
        )),
    }
}
