//! Workflow definitions and pure evaluation
//!
//! - `definition` - WorkflowDefinition, StepDefinition, schedule and error policy
//! - `loader` - Parse and validate definitions, `DefinitionSource` providers
//! - `interpolate` - `${name}` substitution in step parameters
//! - `expr` - Whitelisted expression grammar used by conditions and inline code
//! - `condition` - Fail-closed step condition evaluation
//! - `config` - Engine configuration file

pub mod condition;
pub mod config;
pub mod definition;
pub mod expr;
pub mod interpolate;
pub mod loader;

pub use condition::evaluate as evaluate_condition;
pub use config::{DisplayConfig, EngineConfig, HttpConfig};
pub use definition::{
    ErrorHandling, ErrorPolicy, ScheduleSpec, StepDefinition, WorkflowDefinition,
    MAX_RETRY_DELAY_SECONDS,
};
pub use expr::ExprError;
pub use interpolate::{interpolate_params, interpolate_str, interpolate_value};
pub use loader::{
    parse_definition, parse_definition_auto, DefinitionFormat, DefinitionSource,
    DirectorySource, LoadError, RawDefinition, StaticSource, ValidationError, WorkflowLoader,
};
