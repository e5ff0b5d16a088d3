//! `http_request` step handler
//!
//! ```yaml
//! - id: fetch
//!   type: http_request
//!   parameters:
//!     url: "https://api.example.com/users/${user_id}"
//!     method: POST
//!     headers:
//!       Authorization: "Bearer ${api_token}"
//!     body: {"active": true}
//!     timeout_seconds: 10
//!     fail_on_status: 500
//! ```
//!
//! Result: `{status_code, response, elapsed_ms}`. `response` is the parsed JSON
//! body when possible, otherwise the body text. Statuses at or above
//! `fail_on_status` (default 400) fail the step.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;
use crate::workflow::config::HttpConfig;
use crate::workflow::interpolate::stringify;

const DEFAULT_FAIL_ON_STATUS: u64 = 400;

#[derive(Debug, Clone)]
pub struct HttpRequestHandler {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpRequestHandler {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout: Duration::from_secs(config.default_timeout_seconds),
        }
    }

    fn build_request(&self, step: &StepRuntime) -> Result<reqwest::RequestBuilder, HandlerError> {
        let url = step
            .param_str("url")
            .ok_or_else(|| HandlerError::MissingParameter("url".to_string()))?;
        let method = step.param_str("method").unwrap_or("GET").to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            "HEAD" => self.client.head(url),
            other => {
                return Err(HandlerError::invalid(
                    "method",
                    format!("unknown HTTP method: {}", other),
                ))
            }
        };

        let timeout = step
            .param_f64("timeout_seconds")
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.default_timeout);
        request = request.timeout(timeout);

        if let Some(Value::Object(headers)) = step.parameters.get("headers") {
            for (key, value) in headers {
                request = request.header(key.as_str(), stringify(value));
            }
        }

        match step.parameters.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(value) => request = request.json(value),
        }

        debug!(step_id = %step.id, "Executing {} {}", method, url);
        Ok(request)
    }
}

#[async_trait]
impl StepHandler for HttpRequestHandler {
    async fn execute(
        &self,
        _instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let request = self.build_request(step)?;
        let fail_on_status = step
            .param_u64("fail_on_status")
            .unwrap_or(DEFAULT_FAIL_ON_STATUS);

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::failed(format!("HTTP request failed: {}", e)))?;
        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| HandlerError::failed(format!("Failed to read response body: {}", e)))?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let body: Value = if body_text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text))
        };

        info!(step_id = %step.id, status, elapsed_ms, "HTTP request finished");

        if u64::from(status) >= fail_on_status {
            return Err(HandlerError::failed(format!(
                "HTTP request returned status {}",
                status
            )));
        }

        Ok(json!({
            "status_code": status,
            "response": body,
            "elapsed_ms": elapsed_ms,
        }))
    }
}
