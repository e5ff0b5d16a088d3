//! Read-only views over instance state
//!
//! Every view handed to callers passes through a `Sanitizer`: variables whose
//! key looks sensitive are redacted and long lists are truncated with a
//! trailing marker. Stored state is never modified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::instance::{InstanceStatus, LogEntry, StepStatus, WorkflowInstance};
use crate::workflow::config::DisplayConfig;

pub const REDACTED: &str = "***REDACTED***";

// ============================================================================
// Sanitizer
// ============================================================================

#[derive(Debug, Clone)]
pub struct Sanitizer {
    redacted_keys: Vec<String>,
    max_list_items: usize,
}

impl Sanitizer {
    pub fn new(config: &DisplayConfig) -> Self {
        Self {
            redacted_keys: config
                .redacted_keys
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            max_list_items: config.max_list_items,
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.redacted_keys.iter().any(|needle| key.contains(needle))
    }

    pub fn sanitize_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.sanitize_entry(k, v)))
                    .collect(),
            ),
            Value::Array(items) if items.len() > self.max_list_items => {
                let mut kept: Vec<Value> = items[..self.max_list_items]
                    .iter()
                    .map(|v| self.sanitize_value(v))
                    .collect();
                kept.push(Value::String(format!(
                    "... ({} more items)",
                    items.len() - self.max_list_items
                )));
                Value::Array(kept)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect())
            }
            other => other.clone(),
        }
    }

    fn sanitize_entry(&self, key: &str, value: &Value) -> Value {
        if self.is_sensitive(key) {
            Value::String(REDACTED.to_string())
        } else {
            self.sanitize_value(value)
        }
    }

    pub fn sanitize_variables(&self, vars: &HashMap<String, Value>) -> Map<String, Value> {
        vars.iter()
            .map(|(k, v)| (k.clone(), self.sanitize_entry(k, v)))
            .collect()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(&DisplayConfig::default())
    }
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStep {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Answer to `Engine::get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub instance_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: InstanceStatus,
    /// Count of steps per status, every status present
    pub step_counts: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<CurrentStep>,
    pub elapsed_seconds: f64,
    pub variables: Map<String, Value>,
    pub steps: Vec<StepView>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Error of the failing step when the instance failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusView {
    pub fn build(instance: &WorkflowInstance, sanitizer: &Sanitizer) -> Self {
        let mut step_counts: BTreeMap<String, usize> = [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Skipped,
        ]
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
        for (status, count) in instance.step_counts() {
            step_counts.insert(status.as_str().to_string(), count);
        }

        let current_step = instance.current_step().map(|step| CurrentStep {
            index: instance.current_step_index,
            id: step.id.clone(),
            name: step.name.clone(),
            status: step.status,
        });

        let error = if instance.status == InstanceStatus::Failed {
            instance
                .logs
                .iter()
                .rev()
                .find(|entry| entry.event_type == super::instance::LogEvent::WorkflowFailed)
                .and_then(|entry| entry.details.get("error"))
                .and_then(Value::as_str)
                .map(String::from)
        } else {
            None
        };

        Self {
            instance_id: instance.id.clone(),
            workflow_id: instance.workflow_id.clone(),
            workflow_name: instance.workflow_name.clone(),
            status: instance.status,
            step_counts,
            current_step,
            elapsed_seconds: instance.elapsed_seconds(),
            variables: sanitizer.sanitize_variables(&instance.variables),
            steps: instance
                .steps
                .iter()
                .map(|step| StepView {
                    id: step.id.clone(),
                    name: step.name.clone(),
                    step_type: step.step_type.clone(),
                    status: step.status,
                    attempts: step.attempts,
                    error: step.error.clone(),
                    start_time: step.start_time,
                    end_time: step.end_time,
                })
                .collect(),
            start_time: instance.start_time,
            end_time: instance.end_time,
            error,
        }
    }

    pub fn step_count(&self, status: StepStatus) -> usize {
        self.step_counts.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Listing entry for `Engine::list_instances`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub workflow_id: String,
    pub status: InstanceStatus,
    pub current_step_index: usize,
    pub step_total: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&WorkflowInstance> for InstanceSummary {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            instance_id: instance.id.clone(),
            workflow_id: instance.workflow_id.clone(),
            status: instance.status,
            current_step_index: instance.current_step_index,
            step_total: instance.steps.len(),
            start_time: instance.start_time,
            end_time: instance.end_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub workflow_id: Option<String>,
    pub status: Option<InstanceStatus>,
}

impl InstanceFilter {
    pub fn workflow(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.workflow_id
            .as_deref()
            .map_or(true, |id| instance.workflow_id == id)
            && self.status.map_or(true, |status| instance.status == status)
    }
}

/// Sanitized copy of an instance log
pub fn sanitize_logs(logs: &[LogEntry], sanitizer: &Sanitizer) -> Vec<LogEntry> {
    logs.iter()
        .map(|entry| LogEntry {
            timestamp: entry.timestamp,
            event_type: entry.event_type,
            details: sanitizer.sanitize_value(&entry.details),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::WorkflowDefinition;
    use serde_json::json;

    fn sanitizer(max: usize) -> Sanitizer {
        Sanitizer::new(&DisplayConfig {
            max_list_items: max,
            ..DisplayConfig::default()
        })
    }

    #[test]
    fn test_redacts_sensitive_keys() {
        let s = sanitizer(10);
        let mut vars = HashMap::new();
        vars.insert("DB_Password".to_string(), json!("hunter2"));
        vars.insert("api_key".to_string(), json!("abc"));
        vars.insert("Authorization".to_string(), json!("Bearer x"));
        vars.insert("config".to_string(), json!({"secret_token": "s", "port": 80}));
        vars.insert("user".to_string(), json!("ada"));

        let out = s.sanitize_variables(&vars);
        assert_eq!(out["DB_Password"], json!(REDACTED));
        assert_eq!(out["api_key"], json!(REDACTED));
        assert_eq!(out["Authorization"], json!(REDACTED));
        assert_eq!(out["config"]["secret_token"], json!(REDACTED));
        assert_eq!(out["config"]["port"], json!(80));
        assert_eq!(out["user"], json!("ada"));
    }

    #[test]
    fn test_truncates_long_lists() {
        let s = sanitizer(3);
        let out = s.sanitize_value(&json!([1, 2, 3, 4, 5]));
        assert_eq!(out, json!([1, 2, 3, "... (2 more items)"]));
        assert_eq!(s.sanitize_value(&json!([1, 2, 3])), json!([1, 2, 3]));
    }

    #[test]
    fn test_status_view_and_filter() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf",
            "name": "Workflow",
            "version": "1",
            "steps": [
                {"id": "a", "type": "delay", "name": "A"},
                {"id": "b", "type": "delay", "name": "B"}
            ]
        }))
        .unwrap();
        let mut vars = HashMap::new();
        vars.insert("token".to_string(), json!("t"));
        let mut instance = WorkflowInstance::new("wf_1", &definition, vars);
        instance.status = InstanceStatus::Running;
        instance.steps[0].status = StepStatus::Completed;
        instance.current_step_index = 1;

        let view = StatusView::build(&instance, &Sanitizer::default());
        assert_eq!(view.step_count(StepStatus::Completed), 1);
        assert_eq!(view.step_count(StepStatus::Pending), 1);
        assert_eq!(view.step_count(StepStatus::Skipped), 0);
        assert_eq!(view.current_step.as_ref().unwrap().id, "b");
        assert_eq!(view.variables["token"], json!(REDACTED));
        assert!(view.error.is_none());

        assert!(InstanceFilter::workflow("wf").matches(&instance));
        assert!(!InstanceFilter::workflow("other").matches(&instance));
        assert!(!InstanceFilter::default()
            .with_status(InstanceStatus::Completed)
            .matches(&instance));

        instance.fail(Some("b"), "boom");
        let view = StatusView::build(&instance, &Sanitizer::default());
        assert_eq!(view.error.as_deref(), Some("boom"));
    }
}
