//! Step condition evaluation
//!
//! Conditions fail closed: any compile or evaluation error yields `false`
//! and a warning, so a broken condition skips its step instead of running it.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use super::expr::{eval_str, is_truthy, ExprError};

/// Evaluate a condition, returning the error instead of swallowing it
pub fn try_evaluate(expr: &str, vars: &HashMap<String, Value>) -> Result<bool, ExprError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Ok(true);
    }
    eval_str(trimmed, vars).map(|value| is_truthy(&value))
}

/// Evaluate a condition against instance variables
pub fn evaluate(expr: &str, vars: &HashMap<String, Value>) -> bool {
    match try_evaluate(expr, vars) {
        Ok(result) => result,
        Err(e) => {
            warn!(condition = %expr, error = %e, "Condition evaluation failed, treating as false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> HashMap<String, Value> {
        let mut vars = HashMap::new();
        vars.insert("random_number".to_string(), json!(73));
        vars.insert("items".to_string(), json!(["a", "b", "c"]));
        vars.insert("status".to_string(), json!("ok"));
        vars
    }

    #[test]
    fn test_true_and_false() {
        assert!(evaluate("random_number > 50", &vars()));
        assert!(!evaluate("random_number < 50", &vars()));
        assert!(evaluate("len(items) == 3 and status == 'ok'", &vars()));
        assert!(evaluate("any([false, random_number])", &vars()));
    }

    #[test]
    fn test_empty_condition_runs_step() {
        assert!(evaluate("  ", &vars()));
    }

    #[test]
    fn test_errors_fail_closed() {
        assert!(!evaluate("missing_var > 1", &vars()));
        assert!(!evaluate("random_number >", &vars()));
        assert!(!evaluate("status > 3", &vars()));
        assert!(!evaluate("__import__('os')", &vars()));
    }

    #[test]
    fn test_try_evaluate_reports_error() {
        assert!(matches!(
            try_evaluate("nope == 1", &vars()),
            Err(ExprError::UndefinedVariable(_))
        ));
    }
}
