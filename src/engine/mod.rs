//! Workflow execution runtime
//!
//! This module contains:
//! - `executor` - The `Engine`: instances, work queue, workers and error policy
//! - `instance` - Instance, step runtime and log types
//! - `registry` - Step handler trait and registry
//! - `handlers` - Built-in step handlers
//! - `store` - Workflow definition store
//! - `retry` - Delay queue for step retries
//! - `scheduler` - Interval, cron and daily triggers
//! - `status` - Sanitized status and log views
//! - `error` - Engine error types

pub mod error;
pub mod executor;
pub mod handlers;
pub mod instance;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod store;

pub use error::{EngineError, HandlerError, SchedulingError};
pub use executor::{Engine, LoadReport, RejectedDefinition, WorkItem};
pub use handlers::{register_builtins, QueryExecutor};
pub use instance::{
    InstanceStatus, LogEntry, LogEvent, StepRuntime, StepStatus, WorkflowInstance,
};
pub use registry::{handler_fn, FnHandler, HandlerRegistry, StepHandler};
pub use scheduler::{ScheduledRun, Scheduler, Trigger};
pub use status::{InstanceFilter, InstanceSummary, Sanitizer, StatusView, StepView};
pub use store::{DefinitionStore, DefinitionSummary, LoadedDefinition};
