//! Workflow instance state
//!
//! A `WorkflowInstance` is one execution of a definition: its variable bag,
//! a per-run copy of every step with execution state, the step cursor and an
//! append-only event log. Instances are only mutated by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{info, warn};

use crate::workflow::definition::{ErrorPolicy, StepDefinition, WorkflowDefinition};

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Some(InstanceStatus::Pending),
            "running" => Some(InstanceStatus::Running),
            "completed" => Some(InstanceStatus::Completed),
            "failed" => Some(InstanceStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Step runtime
// ============================================================================

/// Per-run copy of a step definition plus its execution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRuntime {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw parameters; handlers receive a copy with `${name}` tokens resolved
    pub parameters: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub timeout_seconds: u64,
    /// Retries still available; decremented on every failed attempt
    pub retry_count: u32,
    pub retry_delay_seconds: u64,

    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Number of times the handler has been invoked
    pub attempts: u32,
}

impl StepRuntime {
    pub fn from_definition(step: &StepDefinition) -> Self {
        Self {
            id: step.id.clone(),
            step_type: step.step_type.clone(),
            name: step.name.clone(),
            description: step.description.clone(),
            parameters: step.parameters.clone(),
            condition: step.condition.clone(),
            timeout_seconds: step.timeout_seconds,
            retry_count: step.retry_count,
            retry_delay_seconds: step.retry_delay_seconds,
            status: StepStatus::Pending,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            attempts: 0,
        }
    }

    /// A string parameter
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    /// A numeric parameter, accepting numbers or numeric strings
    pub fn param_f64(&self, name: &str) -> Option<f64> {
        match self.parameters.get(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_u64(&self, name: &str) -> Option<u64> {
        match self.parameters.get(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Duration of the step so far, or in total once finished
    pub fn duration_ms(&self) -> Option<i64> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds())
    }
}

// ============================================================================
// Log
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    WorkflowStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    StepRetry,
    StepSkipped,
    ErrorHandled,
    WorkflowCompleted,
    WorkflowFailed,
}

impl LogEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEvent::WorkflowStarted => "workflow_started",
            LogEvent::StepStarted => "step_started",
            LogEvent::StepCompleted => "step_completed",
            LogEvent::StepFailed => "step_failed",
            LogEvent::StepRetry => "step_retry",
            LogEvent::StepSkipped => "step_skipped",
            LogEvent::ErrorHandled => "error_handled",
            LogEvent::WorkflowCompleted => "workflow_completed",
            LogEvent::WorkflowFailed => "workflow_failed",
        }
    }

    fn is_failure(&self) -> bool {
        matches!(
            self,
            LogEvent::StepFailed | LogEvent::StepRetry | LogEvent::WorkflowFailed
        )
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: LogEvent,
    pub details: Value,
}

// ============================================================================
// Instance
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: InstanceStatus,
    pub variables: HashMap<String, Value>,
    pub steps: Vec<StepRuntime>,
    pub current_step_index: usize,
    pub logs: Vec<LogEntry>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Error policy captured from the definition at start
    pub error_policy: ErrorPolicy,
    /// Handler invocations across all steps, including retries
    pub step_executions: usize,
}

impl WorkflowInstance {
    pub fn new(
        id: impl Into<String>,
        definition: &WorkflowDefinition,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: definition.id.clone(),
            workflow_name: definition.name.clone(),
            status: InstanceStatus::Pending,
            variables,
            steps: definition
                .steps
                .iter()
                .map(StepRuntime::from_definition)
                .collect(),
            current_step_index: 0,
            logs: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            error_policy: definition.error_policy(),
            step_executions: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append an event to the instance log and mirror it to tracing
    pub fn log(&mut self, event: LogEvent, details: Value) {
        if event.is_failure() {
            warn!(instance_id = %self.id, event = %event, details = %details, "Workflow event");
        } else {
            info!(instance_id = %self.id, event = %event, details = %details, "Workflow event");
        }
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            event_type: event,
            details,
        });
    }

    /// Seconds since start, frozen once the instance is terminal
    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    /// Number of steps in each status
    pub fn step_counts(&self) -> BTreeMap<StepStatus, usize> {
        let mut counts = BTreeMap::new();
        for step in &self.steps {
            *counts.entry(step.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn current_step(&self) -> Option<&StepRuntime> {
        self.steps.get(self.current_step_index)
    }

    /// Merge a handler result: maps merge key-wise, anything else is bound
    /// to the step id
    pub fn record_result(&mut self, step_id: &str, result: &Value) {
        match result {
            Value::Object(map) => {
                for (key, value) in map {
                    self.variables.insert(key.clone(), value.clone());
                }
            }
            other => {
                self.variables.insert(step_id.to_string(), other.clone());
            }
        }
    }

    pub fn complete(&mut self) {
        self.status = InstanceStatus::Completed;
        self.end_time = Some(Utc::now());
        let elapsed = self.elapsed_seconds();
        self.log(
            LogEvent::WorkflowCompleted,
            json!({ "elapsed_seconds": elapsed }),
        );
    }

    pub fn fail(&mut self, step_id: Option<&str>, error: &str) {
        self.status = InstanceStatus::Failed;
        self.end_time = Some(Utc::now());
        let elapsed = self.elapsed_seconds();
        self.log(
            LogEvent::WorkflowFailed,
            json!({ "step_id": step_id, "error": error, "elapsed_seconds": elapsed }),
        );
    }
}
