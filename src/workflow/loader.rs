//! Workflow definition loader
//!
//! Parses YAML or JSON definition documents, validates them into
//! `WorkflowDefinition`s, and provides the `DefinitionSource` abstraction the
//! engine pulls definitions from.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::definition::{
    default_retry_delay_seconds, default_timeout_seconds, ErrorHandling, ScheduleSpec,
    StepDefinition, WorkflowDefinition, MAX_RETRY_DELAY_SECONDS,
};

/// A definition document that failed validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid definition syntax: {0}")]
    Syntax(String),

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Workflow must define at least one step")]
    EmptySteps,

    #[error("Step {index} is missing required field '{field}'")]
    StepMissingField { index: usize, field: &'static str },

    #[error("Duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid definition in {origin}: {error}")]
    Invalid {
        origin: String,
        error: ValidationError,
    },

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },
}

// ============================================================================
// Document format
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Format implied by a file extension, if it is a definition file at all
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(DefinitionFormat::Yaml),
            Some("json") => Some(DefinitionFormat::Json),
            _ => None,
        }
    }

    /// Guess the format from the document itself
    pub fn detect(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            DefinitionFormat::Json
        } else {
            DefinitionFormat::Yaml
        }
    }
}

/// An unparsed definition document plus where it came from
#[derive(Debug, Clone)]
pub struct RawDefinition {
    pub origin: String,
    pub format: DefinitionFormat,
    pub content: String,
}

impl RawDefinition {
    pub fn new(origin: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            origin: origin.into(),
            format: DefinitionFormat::detect(&content),
            content,
        }
    }

    pub fn parse(&self) -> Result<WorkflowDefinition, LoadError> {
        parse_definition(&self.content, self.format).map_err(|error| LoadError::Invalid {
            origin: self.origin.clone(),
            error,
        })
    }
}

// ============================================================================
// Parsing and validation
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawWorkflow {
    id: Option<String>,
    name: Option<String>,
    version: Option<Value>,
    description: Option<String>,
    steps: Option<Vec<RawStep>>,
    schedule: Option<ScheduleSpec>,
    error_handling: Option<String>,
    error_goto_step: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    id: Option<String>,
    #[serde(rename = "type")]
    step_type: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, Value>,
    condition: Option<String>,
    timeout_seconds: Option<u64>,
    retry_count: Option<u32>,
    retry_delay_seconds: Option<u64>,
}

/// Parse and validate a definition document of a known format
pub fn parse_definition(
    content: &str,
    format: DefinitionFormat,
) -> Result<WorkflowDefinition, ValidationError> {
    let raw: RawWorkflow = match format {
        DefinitionFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ValidationError::Syntax(e.to_string()))?
        }
        DefinitionFormat::Json => {
            serde_json::from_str(content).map_err(|e| ValidationError::Syntax(e.to_string()))?
        }
    };
    validate(raw)
}

/// Parse a definition, detecting JSON vs YAML from the content
pub fn parse_definition_auto(content: &str) -> Result<WorkflowDefinition, ValidationError> {
    parse_definition(content, DefinitionFormat::detect(content))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn version_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn validate(raw: RawWorkflow) -> Result<WorkflowDefinition, ValidationError> {
    let id = non_empty(raw.id).ok_or(ValidationError::MissingField("id"))?;
    let name = non_empty(raw.name).ok_or(ValidationError::MissingField("name"))?;
    let version = version_text(raw.version).ok_or(ValidationError::MissingField("version"))?;
    let raw_steps = raw.steps.ok_or(ValidationError::MissingField("steps"))?;
    if raw_steps.is_empty() {
        return Err(ValidationError::EmptySteps);
    }

    let error_handling = match raw.error_handling.as_deref() {
        None => ErrorHandling::default(),
        Some(value) => ErrorHandling::parse(value).ok_or_else(|| ValidationError::InvalidField {
            field: "error_handling".to_string(),
            reason: format!("expected abort, continue or goto, got '{}'", value),
        })?,
    };

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(raw_steps.len());

    for (index, step) in raw_steps.into_iter().enumerate() {
        let step_id = non_empty(step.id).ok_or(ValidationError::StepMissingField {
            index,
            field: "id",
        })?;
        let step_type = non_empty(step.step_type).ok_or(ValidationError::StepMissingField {
            index,
            field: "type",
        })?;

        if !seen.insert(step_id.clone()) {
            return Err(ValidationError::DuplicateStepId(step_id));
        }

        let retry_delay_seconds = step
            .retry_delay_seconds
            .unwrap_or_else(default_retry_delay_seconds);
        if retry_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(ValidationError::InvalidField {
                field: format!("steps[{}].retry_delay_seconds", index),
                reason: format!("must be at most {} seconds", MAX_RETRY_DELAY_SECONDS),
            });
        }

        steps.push(StepDefinition {
            name: non_empty(step.name).unwrap_or_else(|| step_id.clone()),
            id: step_id,
            step_type,
            description: step.description,
            parameters: step.parameters,
            condition: non_empty(step.condition),
            timeout_seconds: step.timeout_seconds.unwrap_or_else(default_timeout_seconds),
            retry_count: step.retry_count.unwrap_or(0),
            retry_delay_seconds,
        });
    }

    Ok(WorkflowDefinition {
        id,
        name,
        version,
        description: raw.description,
        steps,
        schedule: raw.schedule,
        error_handling,
        error_goto_step: non_empty(raw.error_goto_step),
    })
}

// ============================================================================
// File system loading
// ============================================================================

pub struct WorkflowLoader;

impl WorkflowLoader {
    /// Read every definition document in a directory (non-recursive)
    pub fn read_directory(dir: &Path) -> Result<Vec<RawDefinition>, LoadError> {
        let mut paths: Vec<PathBuf> = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

            // Skip the engine config - it's not a workflow
            if filename == "engine.yaml" || filename == "engine.yml" {
                continue;
            }

            if DefinitionFormat::from_path(&path).is_some() {
                paths.push(path);
            }
        }

        paths.sort();

        paths
            .into_iter()
            .map(|path| Self::read_file(&path))
            .collect()
    }

    pub fn read_file(path: &Path) -> Result<RawDefinition, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let format =
            DefinitionFormat::from_path(path).unwrap_or_else(|| DefinitionFormat::detect(&content));
        Ok(RawDefinition {
            origin: path.display().to_string(),
            format,
            content,
        })
    }

    /// Load and validate every definition in a directory, failing on the first invalid one
    pub fn load_directory(dir: &Path) -> Result<Vec<WorkflowDefinition>, LoadError> {
        Self::read_directory(dir)?
            .iter()
            .map(RawDefinition::parse)
            .collect()
    }

    pub fn load_file(path: &Path) -> Result<WorkflowDefinition, LoadError> {
        Self::read_file(path)?.parse()
    }
}

// ============================================================================
// Definition sources
// ============================================================================

/// Provider of definition documents (file system, database, API, ...)
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Short description used in logs
    fn describe(&self) -> String;

    /// Fetch all definition documents currently offered by the source
    async fn fetch(&self) -> Result<Vec<RawDefinition>, LoadError>;
}

/// Definitions stored as files in a single directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DefinitionSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }

    async fn fetch(&self) -> Result<Vec<RawDefinition>, LoadError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || WorkflowLoader::read_directory(&dir))
            .await
            .map_err(|e| LoadError::Io(std::io::Error::other(e.to_string())))?
    }
}

/// Definitions held in memory, mostly for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    documents: Vec<RawDefinition>,
}

impl StaticSource {
    pub fn new(documents: Vec<RawDefinition>) -> Self {
        Self { documents }
    }

    pub fn push(&mut self, origin: impl Into<String>, content: impl Into<String>) {
        self.documents.push(RawDefinition::new(origin, content));
    }
}

#[async_trait]
impl DefinitionSource for StaticSource {
    fn describe(&self) -> String {
        format!("{} in-memory documents", self.documents.len())
    }

    async fn fetch(&self) -> Result<Vec<RawDefinition>, LoadError> {
        Ok(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const VALID: &str = r#"
id: nightly-report
name: Nightly report
version: 2
steps:
  - id: fetch
    type: http_request
    parameters:
      url: "https://example.com/data"
    retry_count: 2
  - id: notify
    type: notification
    condition: "status_code == 200"
schedule:
  type: daily
  time: "02:30"
error_handling: goto
error_goto_step: notify
"#;

    #[test]
    fn test_parse_valid_yaml() {
        let def = parse_definition(VALID, DefinitionFormat::Yaml).unwrap();
        assert_eq!(def.id, "nightly-report");
        assert_eq!(def.version, "2");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].retry_count, 2);
        assert_eq!(def.steps[0].retry_delay_seconds, 30);
        assert_eq!(def.steps[0].timeout_seconds, 300);
        assert_eq!(def.steps[1].name, "notify");
        assert_eq!(def.error_handling, ErrorHandling::Goto);
        assert_eq!(def.schedule.unwrap().time.as_deref(), Some("02:30"));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"id":"a","name":"A","version":"1.0","steps":[{"id":"s","type":"delay"}]}"#;
        let def = parse_definition_auto(json).unwrap();
        assert_eq!(def.version, "1.0");
        assert_eq!(def.steps[0].step_type, "delay");
    }

    #[test]
    fn test_missing_top_level_fields() {
        let cases = [
            ("name: a\nversion: 1\nsteps: [{id: s, type: t}]", "id"),
            ("id: a\nversion: 1\nsteps: [{id: s, type: t}]", "name"),
            ("id: a\nname: a\nsteps: [{id: s, type: t}]", "version"),
            ("id: a\nname: a\nversion: 1", "steps"),
        ];
        for (doc, field) in cases {
            assert_eq!(
                parse_definition_auto(doc).unwrap_err(),
                ValidationError::MissingField(field)
            );
        }
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = parse_definition_auto("id: a\nname: a\nversion: 1\nsteps: []").unwrap_err();
        assert_eq!(err, ValidationError::EmptySteps);
    }

    #[test]
    fn test_step_missing_type() {
        let doc = "id: a\nname: a\nversion: 1\nsteps:\n  - id: ok\n    type: t\n  - id: bad\n";
        assert_eq!(
            parse_definition_auto(doc).unwrap_err(),
            ValidationError::StepMissingField {
                index: 1,
                field: "type"
            }
        );
    }

    #[test]
    fn test_duplicate_step_ids() {
        let doc = "id: a\nname: a\nversion: 1\nsteps:\n  - {id: x, type: t}\n  - {id: x, type: t}\n";
        assert_eq!(
            parse_definition_auto(doc).unwrap_err(),
            ValidationError::DuplicateStepId("x".to_string())
        );
    }

    #[test]
    fn test_unknown_error_handling() {
        let doc = "id: a\nname: a\nversion: 1\nerror_handling: retry\nsteps: [{id: s, type: t}]";
        assert!(matches!(
            parse_definition_auto(doc).unwrap_err(),
            ValidationError::InvalidField { .. }
        ));
    }

    #[test]
    fn test_retry_delay_upper_bound() {
        let doc = |delay: u64| {
            format!(
                "id: a\nname: a\nversion: 1\nsteps: [{{id: s, type: t, retry_delay_seconds: {}}}]",
                delay
            )
        };
        assert!(parse_definition_auto(&doc(MAX_RETRY_DELAY_SECONDS)).is_ok());
        assert_eq!(
            parse_definition_auto(&doc(100_000_000)).unwrap_err(),
            ValidationError::InvalidField {
                field: "steps[0].retry_delay_seconds".to_string(),
                reason: format!("must be at most {} seconds", MAX_RETRY_DELAY_SECONDS),
            }
        );
    }

    #[test]
    fn test_unknown_step_type_is_accepted() {
        let doc = "id: a\nname: a\nversion: 1\nsteps: [{id: s, type: registered_later}]";
        assert!(parse_definition_auto(doc).is_ok());
    }

    #[test]
    fn test_load_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), VALID).unwrap();
        fs::write(
            dir.path().join("b.json"),
            r#"{"id":"b","name":"B","version":1,"steps":[{"id":"s","type":"delay"}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("engine.yaml"), "worker_pool_size: 2").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let defs = WorkflowLoader::load_directory(dir.path()).unwrap();
        let ids: Vec<_> = defs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["nightly-report", "b"]);
    }

    #[test]
    fn test_load_file_reports_origin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "id: a\nname: a\n").unwrap();

        let err = WorkflowLoader::load_file(&path).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("broken.yaml"));
        assert!(message.contains("version"));
    }

    #[test]
    fn test_static_source() {
        let mut source = StaticSource::default();
        source.push("inline", VALID);
        let docs = tokio_test::block_on(source.fetch()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].format, DefinitionFormat::Yaml);
        assert_eq!(docs[0].parse().unwrap().id, "nightly-report");
    }
}
