//! `database_query` step handler
//!
//! Query execution is delegated to a `QueryExecutor` supplied by the host
//! application through `Engine::register_query_executor`. Without one the
//! step fails.
//!
//! ```yaml
//! - id: load_users
//!   type: database_query
//!   parameters:
//!     query: "SELECT id, email FROM users WHERE team = $1"
//!     params: ["${team}"]
//! ```
//!
//! Result: `{rows, row_count}`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;

/// Executes a parameterized query and returns its rows
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, HandlerError>;
}

#[derive(Clone)]
pub struct DatabaseQueryHandler {
    executor: Option<Arc<dyn QueryExecutor>>,
}

impl DatabaseQueryHandler {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor: Some(executor),
        }
    }

    pub fn unconfigured() -> Self {
        Self { executor: None }
    }
}

#[async_trait]
impl StepHandler for DatabaseQueryHandler {
    async fn execute(
        &self,
        _instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| HandlerError::failed("No query executor registered"))?;
        let sql = step
            .param_str("query")
            .ok_or_else(|| HandlerError::MissingParameter("query".to_string()))?;
        let params = match step.parameters.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
        };

        let rows = executor.query(sql, &params).await?;
        info!(step_id = %step.id, row_count = rows.len(), "Query executed");

        Ok(json!({
            "row_count": rows.len(),
            "rows": rows,
        }))
    }
}
