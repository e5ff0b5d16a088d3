//! `inline-code` step handler
//!
//! Evaluates `name = expression` statements against a copy of the instance
//! variables. Each statement sees the bindings made before it.
//!
//! ```yaml
//! - id: pick
//!   type: inline-code
//!   parameters:
//!     code: |
//!       total = sum(scores)
//!       result = {"random_number": 73, "total": total}
//! ```
//!
//! When a `result` binding is assigned it becomes the step result; otherwise
//! the map of every assigned name is returned.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;
use crate::workflow::expr::run_program;

const RESULT_BINDING: &str = "result";

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineCodeHandler;

#[async_trait]
impl StepHandler for InlineCodeHandler {
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let code = step
            .param_str("code")
            .ok_or_else(|| HandlerError::MissingParameter("code".to_string()))?;

        let assigned = run_program(code, &instance.variables)
            .map_err(|e| HandlerError::failed(format!("Inline code error: {}", e)))?;

        if let Some((_, value)) = assigned.iter().find(|(name, _)| name == RESULT_BINDING) {
            return Ok(value.clone());
        }

        Ok(Value::Object(assigned.into_iter().collect::<Map<_, _>>()))
    }
}
