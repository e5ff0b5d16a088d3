#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stepflow::prelude::*;
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_workflow(dir: &Path, filename: &str, content: &str) {
    fs::write(dir.join(filename), content).expect("Failed to write workflow file");
}

pub fn write_engine_config(dir: &Path, content: &str) {
    fs::write(dir.join("engine.yaml"), content).expect("Failed to write engine.yaml");
}

/// A definition whose steps all use the same step type
pub fn linear_workflow(id: &str, step_type: &str, steps: usize) -> String {
    let mut doc = format!("id: {id}\nname: {id}\nversion: \"1\"\nsteps:\n");
    for i in 0..steps {
        doc.push_str(&format!("  - id: s{i}\n    type: {step_type}\n"));
    }
    doc
}

/// A definition that only needs the built-in handlers
pub fn simple_workflow(id: &str) -> String {
    format!(
        r#"
id: {id}
name: {id}
version: "1"
steps:
  - id: compute
    type: inline-code
    parameters:
      code: "answer = 6 * 7"
  - id: announce
    type: notification
    parameters:
      message: "answer is ${{answer}}"
"#
    )
}

/// A definition whose only step always fails
pub fn failing_workflow(id: &str) -> String {
    format!(
        r#"
id: {id}
name: {id}
version: "1"
steps:
  - id: boom
    type: inline-code
    parameters:
      code: "x = 1 / 0"
"#
    )
}

pub async fn engine_with(definitions: &[&str]) -> Engine {
    let engine = Engine::new(EngineConfig::default());
    for (i, doc) in definitions.iter().enumerate() {
        engine
            .load_definition(&RawDefinition::new(format!("doc-{i}.yaml"), *doc))
            .await
            .expect("definition should load");
    }
    engine
}

pub async fn run(engine: &Engine, workflow_id: &str, vars: HashMap<String, Value>) -> StatusView {
    engine
        .run_workflow(workflow_id, vars, std::time::Duration::from_secs(10))
        .await
        .expect("workflow should finish")
}

pub fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ============================================================================
// Test handlers
// ============================================================================

/// One handler invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub instance_id: String,
    pub step_id: String,
    pub step_index: usize,
    pub parameters: HashMap<String, Value>,
}

/// Records every invocation and returns `{<step id>: <call number>}`
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<Call>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.step_id).collect()
    }
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call {
            instance_id: instance.id.clone(),
            step_id: step.id.clone(),
            step_index: instance.current_step_index,
            parameters: step.parameters.clone(),
        });
        let key = step.id.clone();
        Ok(json!({ key: calls.len() }))
    }
}

/// Fails every time and counts how often it was asked
#[derive(Debug, Default)]
pub struct FailingHandler {
    attempts: AtomicUsize,
}

impl FailingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for FailingHandler {
    async fn execute(
        &self,
        _instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::Failed(format!("{} is broken", step.id)))
    }
}
