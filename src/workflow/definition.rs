//! Workflow and step definitions
//!
//! A `WorkflowDefinition` is the validated, immutable form of a definition
//! document. Documents are parsed and checked by the loader; this module only
//! holds the resulting types and their defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Workflow
// ============================================================================

/// A complete, validated workflow definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Unique definition id (reloading the same id replaces the definition)
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Definition version, kept as text ("1", "1.2.0", ...)
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered steps, never empty
    pub steps: Vec<StepDefinition>,

    /// Optional time-based trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,

    /// Policy applied when a step exhausts its retries
    #[serde(default)]
    pub error_handling: ErrorHandling,

    /// Target step for `error_handling: goto`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_goto_step: Option<String>,
}

impl WorkflowDefinition {
    /// Index of the step with the given id
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// The effective error policy, combining `error_handling` and `error_goto_step`
    pub fn error_policy(&self) -> ErrorPolicy {
        match self.error_handling {
            ErrorHandling::Abort => ErrorPolicy::Abort,
            ErrorHandling::Continue => ErrorPolicy::Continue,
            ErrorHandling::Goto => ErrorPolicy::Goto(self.error_goto_step.clone()),
        }
    }

    /// Non-fatal problems worth reporting at load time
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.error_handling == ErrorHandling::Goto {
            match &self.error_goto_step {
                None => warnings.push(
                    "error_handling is 'goto' but error_goto_step is not set; failures will abort"
                        .to_string(),
                ),
                Some(target) if self.step_index(target).is_none() => warnings.push(format!(
                    "error_goto_step '{}' does not match any step; failures will abort",
                    target
                )),
                Some(_) => {}
            }
        } else if self.error_goto_step.is_some() {
            warnings.push(format!(
                "error_goto_step is ignored when error_handling is '{}'",
                self.error_handling.as_str()
            ));
        }

        warnings
    }
}

/// Definition-level failure policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    #[default]
    Abort,
    Continue,
    Goto,
}

impl ErrorHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorHandling::Abort => "abort",
            ErrorHandling::Continue => "continue",
            ErrorHandling::Goto => "goto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "abort" => Some(ErrorHandling::Abort),
            "continue" => Some(ErrorHandling::Continue),
            "goto" => Some(ErrorHandling::Goto),
            _ => None,
        }
    }
}

/// Resolved error policy applied after retry exhaustion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPolicy {
    Abort,
    Continue,
    /// Jump to a step id; `None` or an unknown id degrades to abort
    Goto(Option<String>),
}

// ============================================================================
// Step
// ============================================================================

/// A single step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Unique within the definition
    pub id: String,

    /// Handler key in the step handler registry
    #[serde(rename = "type")]
    pub step_type: String,

    /// Display name, defaults to the id
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Opaque handler parameters, interpolated before each invocation
    #[serde(default)]
    pub parameters: HashMap<String, Value>,

    /// Boolean expression; the step is skipped when it evaluates false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Attempts remaining after the first one
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

pub fn default_timeout_seconds() -> u64 {
    300
}

pub fn default_retry_delay_seconds() -> u64 {
    30
}

/// Longest accepted `retry_delay_seconds` (one year)
pub const MAX_RETRY_DELAY_SECONDS: u64 = 365 * 24 * 60 * 60;

// ============================================================================
// Schedule
// ============================================================================

/// Raw trigger specification as written in the definition.
///
/// `kind` is kept as free text so that unknown kinds can be reported by the
/// scheduler without rejecting the whole definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSpec {
    #[serde(rename = "type")]
    pub kind: String,

    /// Used by `interval`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u64>,

    /// Used by `cron` (minute and hour fields only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Used by `daily`, formatted `HH:MM`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}
