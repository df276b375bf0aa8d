use crate::{Engine, PromptHistory};
use async_trait::async_trait;
use relightcore::{EngineError, EventEmitter, ProgressEvent, Workflow};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

/// Connection settings for the engine's HTTP API
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// host:port of the engine, without scheme
    pub address: String,
    /// Delay between history polls while a prompt runs
    pub poll_interval: Duration,
    /// Upper bound for a single workflow execution
    pub execution_timeout: Duration,
    /// Per-request timeout for the HTTP calls themselves
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8188".to_string(),
            poll_interval: Duration::from_millis(500),
            execution_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for a ComfyUI server
pub struct ComfyClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl ComfyClient {
    pub fn new(config: ClientConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EngineError::Protocol(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    fn url(&self, path: &str) -> String {
        let address = self.config.address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}{}", address, path)
        } else {
            format!("http://{}{}", address, path)
        }
    }

    fn unreachable(&self, e: reqwest::Error) -> EngineError {
        EngineError::Unreachable {
            address: self.config.address.clone(),
            reason: e.to_string(),
        }
    }

    /// Fetch the history entry for one prompt, `None` while it is still pending
    pub async fn history(&self, prompt_id: &str) -> Result<Option<PromptHistory>, EngineError> {
        let url = self.url(&format!("/history/{}", prompt_id));
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(EngineError::Protocol(format!(
                "history request returned {}",
                response.status()
            )));
        }

        let mut entries: HashMap<String, PromptHistory> = response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("Failed to parse history: {}", e)))?;

        Ok(entries.remove(prompt_id))
    }

    async fn poll_history(&self, prompt_id: &str) -> Result<PromptHistory, EngineError> {
        loop {
            if let Some(history) = self.history(prompt_id).await? {
                if history.is_error() {
                    let messages = history.error_messages();
                    let message = if messages.is_empty() {
                        "engine reported an error without details".to_string()
                    } else {
                        messages.join("; ")
                    };
                    return Err(EngineError::ExecutionFailed(message));
                }
                if history.is_complete() {
                    return Ok(history);
                }
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Poll the health check until it passes
    pub async fn wait_until_ready(&self, deadline: Duration) -> Result<(), EngineError> {
        let started = Instant::now();
        loop {
            if self.health_check().await {
                tracing::info!(
                    "Engine at {} is ready after {}ms",
                    self.config.address,
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(EngineError::Timeout {
                    what: format!("engine at {}", self.config.address),
                    seconds: deadline.as_secs(),
                });
            }
            sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl Engine for ComfyClient {
    async fn queue_prompt(&self, workflow: &Workflow, client_id: &str) -> Result<String, EngineError> {
        let url = self.url("/prompt");
        let body = json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        tracing::info!("Queueing workflow ({} nodes)", workflow.len());

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| EngineError::Protocol(format!("Failed to read response: {}", e)))?;

        let parsed: Value = serde_json::from_str(&text).map_err(|_| {
            EngineError::Protocol(format!("prompt request returned {}: {}", status, text))
        })?;

        if let Some(message) = rejection_message(&parsed) {
            return Err(EngineError::Rejected(message));
        }

        if !status.is_success() {
            return Err(EngineError::Protocol(format!(
                "prompt request returned {}: {}",
                status, text
            )));
        }

        let prompt_id = parsed
            .get("prompt_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Protocol("response has no prompt_id".to_string()))?;

        tracing::info!("Workflow queued as prompt {}", prompt_id);
        Ok(prompt_id.to_string())
    }

    async fn wait_for_completion(
        &self,
        prompt_id: &str,
        events: &EventEmitter,
    ) -> Result<PromptHistory, EngineError> {
        let limit = self.config.execution_timeout;

        let history = timeout(limit, self.poll_history(prompt_id)).await.map_err(|_| EngineError::Timeout {
            what: format!("prompt {}", prompt_id),
            seconds: limit.as_secs(),
        })??;

        for node_id in history.outputs.keys() {
            events.emit(ProgressEvent::NodeExecuted {
                node_id: node_id.clone(),
            });
        }
        let cached = history.cached_nodes();
        if !cached.is_empty() {
            tracing::debug!("Prompt {} reused cached nodes: {}", prompt_id, cached.join(", "));
            events.info(format!("reused cached nodes: {}", cached.join(", ")));
        }

        tracing::info!("Prompt {} completed", prompt_id);
        Ok(history)
    }

    async fn clear_queue(&self) -> Result<(), EngineError> {
        let url = self.url("/queue");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "clear": true }))
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;

        if !response.status().is_success() {
            return Err(EngineError::Protocol(format!(
                "queue clear returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match self.client.get(self.url("/history/123")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

/// Extract the engine's validation errors from a `/prompt` response
fn rejection_message(response: &Value) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(error) = response.get("error") {
        match error {
            Value::String(s) => parts.push(s.clone()),
            Value::Object(obj) => {
                let message = obj.get("message").and_then(|v| v.as_str()).unwrap_or("error");
                match obj.get("details").and_then(|v| v.as_str()).filter(|d| !d.is_empty()) {
                    Some(details) => parts.push(format!("{}: {}", message, details)),
                    None => parts.push(message.to_string()),
                }
            }
            _ => {}
        }
    }

    if let Some(Value::Object(node_errors)) = response.get("node_errors") {
        for (node_id, node_error) in node_errors {
            let class_type = node_error
                .get("class_type")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let errors = node_error
                .get("errors")
                .and_then(|v| v.as_array())
                .map(|errs| {
                    errs.iter()
                        .map(|e| {
                            let message = e.get("message").and_then(|v| v.as_str()).unwrap_or("");
                            let details = e.get("details").and_then(|v| v.as_str()).unwrap_or("");
                            if details.is_empty() {
                                message.to_string()
                            } else {
                                format!("{} ({})", message, details)
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            parts.push(format!("node {} [{}]: {}", node_id, class_type, errors));
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
