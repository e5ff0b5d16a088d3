//! Workflow definition store
//!
//! Holds the authoritative index of loaded definitions. Loading a definition
//! with an existing id replaces it; instances already running keep the copy
//! they started with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::EngineError;
use super::registry::HandlerRegistry;
use crate::workflow::definition::WorkflowDefinition;
use crate::workflow::loader::{LoadError, RawDefinition};

/// Listing entry for a loaded definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub step_count: usize,
    pub scheduled: bool,
}

impl From<&WorkflowDefinition> for DefinitionSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            version: definition.version.clone(),
            description: definition.description.clone(),
            step_count: definition.steps.len(),
            scheduled: definition.schedule.is_some(),
        }
    }
}

/// Outcome of loading one definition
#[derive(Debug, Clone)]
pub struct LoadedDefinition {
    pub definition: Arc<WorkflowDefinition>,
    /// Non-fatal problems, such as step types with no registered handler
    pub warnings: Vec<String>,
    /// Whether an earlier definition with the same id was replaced
    pub replaced: bool,
}

#[derive(Debug, Default)]
pub struct DefinitionStore {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse, validate and index a raw document
    pub fn load(
        &mut self,
        raw: &RawDefinition,
        registry: &HandlerRegistry,
    ) -> Result<LoadedDefinition, LoadError> {
        let definition = raw.parse()?;
        Ok(self.insert(definition, registry))
    }

    /// Index an already validated definition
    pub fn insert(
        &mut self,
        definition: WorkflowDefinition,
        registry: &HandlerRegistry,
    ) -> LoadedDefinition {
        let mut warnings = definition.lint();
        for step in &definition.steps {
            if !registry.contains(&step.step_type) {
                warnings.push(format!(
                    "Step '{}' uses type '{}' which has no registered handler",
                    step.id, step.step_type
                ));
            }
        }
        for warning in &warnings {
            warn!(workflow_id = %definition.id, "{}", warning);
        }

        let definition = Arc::new(definition);
        let replaced = self
            .definitions
            .insert(definition.id.clone(), Arc::clone(&definition))
            .is_some();

        info!(
            workflow_id = %definition.id,
            version = %definition.version,
            steps = definition.steps.len(),
            replaced,
            "Loaded workflow definition"
        );

        LoadedDefinition {
            definition,
            warnings,
            replaced,
        }
    }

    pub fn get(&self, id: &str) -> Result<Arc<WorkflowDefinition>, EngineError> {
        self.definitions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.remove(id)
    }

    /// Summaries sorted by id
    pub fn list(&self) -> Vec<DefinitionSummary> {
        let mut summaries: Vec<DefinitionSummary> = self
            .definitions
            .values()
            .map(|d| DefinitionSummary::from(d.as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Definitions carrying a schedule
    pub fn scheduled(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.definitions
            .values()
            .filter(|d| d.schedule.is_some())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::handler_fn;
    use serde_json::json;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", handler_fn(|_, _| async { Ok(json!(null)) }));
        registry
    }

    const SIMPLE: &str = r#"
id: report
name: Report
version: "1"
steps:
  - id: a
    type: echo
"#;

    #[test]
    fn test_load_and_get() {
        let mut store = DefinitionStore::new();
        let loaded = store
            .load(&RawDefinition::new("report.yaml", SIMPLE), &registry())
            .unwrap();
        assert!(loaded.warnings.is_empty());
        assert!(!loaded.replaced);
        assert_eq!(store.get("report").unwrap().name, "Report");
        assert!(matches!(store.get("nope"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_unknown_step_type_is_a_warning() {
        let mut store = DefinitionStore::new();
        let content = SIMPLE.replace("type: echo", "type: custom_thing");
        let loaded = store
            .load(&RawDefinition::new("report.yaml", content), &registry())
            .unwrap();
        assert_eq!(loaded.warnings.len(), 1);
        assert!(loaded.warnings[0].contains("custom_thing"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reload_replaces_by_id() {
        let mut store = DefinitionStore::new();
        store
            .load(&RawDefinition::new("a.yaml", SIMPLE), &registry())
            .unwrap();
        let updated = SIMPLE.replace("name: Report", "name: Report v2");
        let loaded = store
            .load(&RawDefinition::new("b.yaml", updated), &registry())
            .unwrap();
        assert!(loaded.replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("report").unwrap().name, "Report v2");
    }

    #[test]
    fn test_invalid_document_rejected() {
        let mut store = DefinitionStore::new();
        let result = store.load(
            &RawDefinition::new("bad.yaml", "id: x\nname: y\nversion: 1\nsteps: []\n"),
            &registry(),
        );
        assert!(matches!(result, Err(LoadError::Invalid { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_and_scheduled() {
        let mut store = DefinitionStore::new();
        store
            .load(&RawDefinition::new("a.yaml", SIMPLE), &registry())
            .unwrap();
        let scheduled = format!(
            "{}schedule:\n  type: interval\n  interval_minutes: 5\n",
            SIMPLE.replace("id: report", "id: backup")
        );
        store
            .load(&RawDefinition::new("b.yaml", scheduled), &registry())
            .unwrap();

        let list = store.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "backup");
        assert!(list[0].scheduled);
        assert_eq!(list[1].step_count, 1);
        assert_eq!(store.scheduled().len(), 1);
    }
}
