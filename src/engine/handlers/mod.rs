//! Built-in step handlers
//!
//! | type                  | handler                 |
//! |-----------------------|-------------------------|
//! | `script`              | `ScriptHandler`         |
//! | `http_request`        | `HttpRequestHandler`    |
//! | `database_query`      | `DatabaseQueryHandler`  |
//! | `inline-code`         | `InlineCodeHandler`     |
//! | `condition`           | `ConditionHandler`      |
//! | `delay`               | `DelayHandler`          |
//! | `notification`        | `NotificationHandler`   |
//! | `document_generation` | `DocumentHandler`       |

pub mod condition;
pub mod database;
pub mod delay;
pub mod document;
pub mod http;
pub mod inline_code;
pub mod notification;
pub mod script;

use std::sync::Arc;

pub use condition::ConditionHandler;
pub use database::{DatabaseQueryHandler, QueryExecutor};
pub use delay::{parse_duration, DelayHandler};
pub use document::DocumentHandler;
pub use http::HttpRequestHandler;
pub use inline_code::InlineCodeHandler;
pub use notification::NotificationHandler;
pub use script::ScriptHandler;

use super::registry::HandlerRegistry;
use crate::workflow::config::EngineConfig;

pub const SCRIPT: &str = "script";
pub const HTTP_REQUEST: &str = "http_request";
pub const DATABASE_QUERY: &str = "database_query";
pub const INLINE_CODE: &str = "inline-code";
pub const CONDITION: &str = "condition";
pub const DELAY: &str = "delay";
pub const NOTIFICATION: &str = "notification";
pub const DOCUMENT_GENERATION: &str = "document_generation";

/// Register every built-in handler
pub fn register_builtins(registry: &mut HandlerRegistry, config: &EngineConfig) {
    registry.register(SCRIPT, Arc::new(ScriptHandler));
    registry.register(HTTP_REQUEST, Arc::new(HttpRequestHandler::new(&config.http)));
    registry.register(DATABASE_QUERY, Arc::new(DatabaseQueryHandler::unconfigured()));
    registry.register(INLINE_CODE, Arc::new(InlineCodeHandler));
    registry.register(CONDITION, Arc::new(ConditionHandler));
    registry.register(DELAY, Arc::new(DelayHandler));
    registry.register(NOTIFICATION, Arc::new(NotificationHandler::new(&config.http)));
    registry.register(DOCUMENT_GENERATION, Arc::new(DocumentHandler));
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::{json, Value};
    use std::collections::HashMap;

    use crate::engine::instance::{StepRuntime, WorkflowInstance};
    use crate::workflow::definition::WorkflowDefinition;

    /// A one-step instance whose step carries `params`
    pub fn instance_with(
        step_type: &str,
        params: Value,
        vars: Value,
    ) -> (WorkflowInstance, StepRuntime) {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "name": "Test workflow",
            "version": "1",
            "steps": [{"id": "step", "type": step_type, "name": "Step", "parameters": params}]
        }))
        .unwrap();
        let variables: HashMap<String, Value> = serde_json::from_value(vars).unwrap();
        let instance = WorkflowInstance::new("wf_test", &definition, variables);
        let step = instance.steps[0].clone();
        (instance, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry, &EngineConfig::default());
        for step_type in [
            SCRIPT,
            HTTP_REQUEST,
            DATABASE_QUERY,
            INLINE_CODE,
            CONDITION,
            DELAY,
            NOTIFICATION,
            DOCUMENT_GENERATION,
        ] {
            assert!(registry.contains(step_type), "missing {}", step_type);
        }
    }
}
