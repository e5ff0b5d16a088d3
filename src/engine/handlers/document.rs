//! `document_generation` step handler
//!
//! Renders a Handlebars template against the instance variables and writes
//! the output to `output_path`.
//!
//! ```yaml
//! - id: report
//!   type: document_generation
//!   parameters:
//!     template: "Weekly report for {{team}}: {{count}} items"
//!     output_path: "./out/report-${team}.txt"
//! ```
//!
//! `template_file` may be given instead of `template`. Result:
//! `{document_path, document_size}`.

use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing::info;

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;

#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentHandler;

impl DocumentHandler {
    async fn load_template(step: &StepRuntime) -> Result<String, HandlerError> {
        if let Some(template) = step.param_str("template") {
            return Ok(template.to_string());
        }
        if let Some(path) = step.param_str("template_file") {
            return tokio::fs::read_to_string(path).await.map_err(|e| {
                HandlerError::failed(format!("Failed to read template '{}': {}", path, e))
            });
        }
        Err(HandlerError::MissingParameter(
            "document_generation requires 'template' or 'template_file'".to_string(),
        ))
    }
}

#[async_trait]
impl StepHandler for DocumentHandler {
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let output_path = PathBuf::from(
            step.param_str("output_path")
                .ok_or_else(|| HandlerError::MissingParameter("output_path".to_string()))?,
        );
        let template = Self::load_template(step).await?;

        let data: Map<String, Value> = instance
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let rendered = Handlebars::new()
            .render_template(&template, &data)
            .map_err(|e| HandlerError::failed(format!("Template rendering failed: {}", e)))?;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&output_path, rendered.as_bytes()).await?;

        info!(step_id = %step.id, path = %output_path.display(), bytes = rendered.len(), "Document generated");

        Ok(json!({
            "document_path": output_path.display().to_string(),
            "document_size": rendered.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handlers::test_support::instance_with;

    #[tokio::test]
    async fn test_renders_inline_template() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested/report.txt");
        let (instance, step) = instance_with(
            "document_generation",
            json!({
                "template": "Report for {{team}}: {{count}} items",
                "output_path": output.to_str().unwrap()
            }),
            json!({"team": "ops", "count": 4}),
        );

        let result = DocumentHandler.execute(&instance, &step).await.unwrap();
        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content, "Report for ops: 4 items");
        assert_eq!(result["document_size"], json!(content.len()));
        assert_eq!(result["document_path"], json!(output.display().to_string()));
    }

    #[tokio::test]
    async fn test_template_file() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.hbs");
        std::fs::write(&template, "{{#each items}}[{{this}}]{{/each}}").unwrap();
        let output = dir.path().join("out.txt");

        let (instance, step) = instance_with(
            "document_generation",
            json!({
                "template_file": template.to_str().unwrap(),
                "output_path": output.to_str().unwrap()
            }),
            json!({"items": ["a", "b"]}),
        );

        DocumentHandler.execute(&instance, &step).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "[a][b]");
    }

    #[tokio::test]
    async fn test_missing_output_path() {
        let (instance, step) =
            instance_with("document_generation", json!({"template": "x"}), json!({}));
        assert!(matches!(
            DocumentHandler.execute(&instance, &step).await,
            Err(HandlerError::MissingParameter(_))
        ));
    }
}
