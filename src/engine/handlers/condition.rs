//! `condition` step handler
//!
//! Evaluates `parameters.condition` and returns `true_value` or
//! `false_value`. Evaluation errors select `false_value`.

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;
use crate::workflow::condition;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionHandler;

#[async_trait]
impl StepHandler for ConditionHandler {
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let expr = step
            .param_str("condition")
            .ok_or_else(|| HandlerError::MissingParameter("condition".to_string()))?;

        let (key, default) = if condition::evaluate(expr, &instance.variables) {
            ("true_value", Value::Bool(true))
        } else {
            ("false_value", Value::Bool(false))
        };
        Ok(step.parameters.get(key).cloned().unwrap_or(default))
    }
}
