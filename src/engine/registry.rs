//! Step handler registry
//!
//! Maps a step `type` to the handler that performs the step's work. The
//! built-in handlers are registered by `handlers::register_builtins`;
//! collaborators add their own with `HandlerRegistry::register`, and the last
//! registration for a type wins.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::error::HandlerError;
use super::instance::{StepRuntime, WorkflowInstance};

/// Performs the work of a step.
///
/// `instance` is a snapshot taken just before the call and `step.parameters`
/// are already interpolated. A map result is merged into the instance
/// variables; any other value is bound to the step id.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a `StepHandler`
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(WorkflowInstance, StepRuntime) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        (self.func)(instance.clone(), step.clone()).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn StepHandler>
where
    F: Fn(WorkflowInstance, StepRuntime) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { func })
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, step_type: impl Into<String>, handler: Arc<dyn StepHandler>) {
        let step_type = step_type.into();
        if self.handlers.insert(step_type.clone(), handler).is_some() {
            debug!(step_type = %step_type, "Replaced step handler");
        } else {
            debug!(step_type = %step_type, "Registered step handler");
        }
    }

    pub fn lookup(&self, step_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_type).cloned()
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Registered types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::WorkflowDefinition;
    use serde_json::json;

    fn constant(value: Value) -> Arc<dyn StepHandler> {
        handler_fn(move |_, _| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    fn instance() -> WorkflowInstance {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "name": "wf",
            "version": "1",
            "steps": [{"id": "s", "type": "echo", "name": "s"}]
        }))
        .unwrap();
        WorkflowInstance::new("wf_1", &definition, HashMap::new())
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", constant(json!("first")));

        let inst = instance();
        let handler = registry.lookup("echo").unwrap();
        let result = handler.execute(&inst, &inst.steps[0]).await.unwrap();
        assert_eq!(result, json!("first"));
        assert!(registry.lookup("missing").is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", constant(json!("first")));
        registry.register("echo", constant(json!("second")));

        let inst = instance();
        let result = registry
            .lookup("echo")
            .unwrap()
            .execute(&inst, &inst.steps[0])
            .await
            .unwrap();
        assert_eq!(result, json!("second"));
        assert_eq!(registry.types(), vec!["echo".to_string()]);
    }
}
