//! # Stepflow
//!
//! A declarative workflow automation engine: ordered steps executed by
//! pluggable handlers, with per-step retries, conditional skips, configurable
//! error policies and time-based triggers.
//!
//! ## Features
//!
//! - **Declarative YAML/JSON definitions** - Steps, conditions, retries and schedules
//! - **Pluggable handlers** - Built-ins for scripts, HTTP, notifications and documents,
//!   plus `Engine::register_step_type` for your own
//! - **Error policies** - `abort`, `continue` or `goto` once a step runs out of retries
//! - **Variable interpolation** - `${name}` tokens in parameters resolve against
//!   instance variables
//! - **Sandboxed conditions** - A small whitelisted expression language
//! - **Scheduling** - Interval, cron-like and daily triggers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::time::Duration;
//! use stepflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let definition = r#"
//! id: lucky-number
//! name: Lucky number
//! version: "1"
//! steps:
//!   - id: pick
//!     type: inline-code
//!     parameters:
//!       code: "result = {'random_number': 73}"
//!   - id: notify
//!     type: notification
//!     condition: "random_number > 50"
//!     parameters:
//!       message: "${random_number} is high"
//! "#;
//!
//!     let engine = Engine::new(EngineConfig::default());
//!     engine
//!         .load_definition(&RawDefinition::new("lucky.yaml", definition))
//!         .await?;
//!
//!     let status = engine
//!         .run_workflow("lucky-number", HashMap::new(), Duration::from_secs(30))
//!         .await?;
//!     println!("{} finished: {}", status.instance_id, status.status);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod workflow;

// Re-export main types
pub use engine::{
    handler_fn, Engine, EngineError, HandlerError, HandlerRegistry, InstanceFilter,
    InstanceStatus, LogEntry, LogEvent, QueryExecutor, StatusView, StepHandler, StepRuntime,
    StepStatus, WorkflowInstance,
};
pub use workflow::{
    DefinitionSource, DirectorySource, EngineConfig, LoadError, RawDefinition, StaticSource,
    StepDefinition, ValidationError, WorkflowDefinition, WorkflowLoader,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::engine::{
        handler_fn, DefinitionSummary, Engine, EngineError, HandlerError, InstanceFilter,
        InstanceStatus, InstanceSummary, LogEntry, LogEvent, QueryExecutor, StatusView,
        StepHandler, StepRuntime, StepStatus, WorkflowInstance,
    };
    pub use crate::workflow::{
        DefinitionSource, DirectorySource, EngineConfig, ErrorHandling, LoadError,
        RawDefinition, StaticSource, StepDefinition, ValidationError, WorkflowDefinition,
        WorkflowLoader,
    };
}
