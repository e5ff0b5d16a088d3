//! `notification` step handler
//!
//! ```yaml
//! - id: notify
//!   type: notification
//!   parameters:
//!     message: "${random_number} is high"
//!     level: warning
//!     channel: webhook
//!     url: "https://hooks.example.com/ops"
//!     recipients: ["ops@example.com"]
//! ```
//!
//! The `log` channel (default) writes the message to the tracing output; the
//! `webhook` channel POSTs it as JSON. Result:
//! `{notification_channel, notification_message}`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;
use crate::workflow::config::HttpConfig;

#[derive(Debug, Clone)]
pub struct NotificationHandler {
    client: reqwest::Client,
    timeout: Duration,
}

impl NotificationHandler {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(config.default_timeout_seconds),
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<(), HandlerError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| HandlerError::failed(format!("Webhook delivery failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::failed(format!(
                "Webhook returned status {}",
                status.as_u16()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StepHandler for NotificationHandler {
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let message = step
            .param_str("message")
            .ok_or_else(|| HandlerError::MissingParameter("message".to_string()))?;
        let channel = step.param_str("channel").unwrap_or("log");
        let level = step.param_str("level").unwrap_or("info");
        let recipients = step
            .parameters
            .get("recipients")
            .cloned()
            .unwrap_or_else(|| json!([]));

        match channel {
            "log" => match level {
                "error" => error!(instance_id = %instance.id, step_id = %step.id, %recipients, "Notification: {}", message),
                "warning" | "warn" => warn!(instance_id = %instance.id, step_id = %step.id, %recipients, "Notification: {}", message),
                _ => info!(instance_id = %instance.id, step_id = %step.id, %recipients, "Notification: {}", message),
            },
            "webhook" => {
                let url = step
                    .param_str("url")
                    .ok_or_else(|| HandlerError::MissingParameter("url".to_string()))?;
                let payload = json!({
                    "message": message,
                    "level": level,
                    "recipients": recipients,
                    "workflow_id": instance.workflow_id,
                    "instance_id": instance.id,
                });
                self.send_webhook(url, &payload).await?;
                info!(instance_id = %instance.id, step_id = %step.id, "Notification sent to webhook");
            }
            other => {
                return Err(HandlerError::invalid(
                    "channel",
                    format!("unsupported notification channel: {}", other),
                ))
            }
        }

        Ok(json!({
            "notification_channel": channel,
            "notification_message": message,
        }))
    }
}
