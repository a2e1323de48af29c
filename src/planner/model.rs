use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::{ModelConfig, ModelProvider};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API error ({status}): {message}")]
    Api { status: StatusCode, message: String },
    #[error("no text in model response: {0}")]
    MissingText(String),
}

/// A chat model that answers one prompt with one text reply.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Build the client selected by the config.
pub fn from_config(config: &ModelConfig) -> Arc<dyn LanguageModel> {
    match config.provider {
        ModelProvider::Workspace => Arc::new(WorkspaceChatModel::new(config)),
        ModelProvider::OpenAi => Arc::new(OpenAiChatModel::new(config)),
    }
}

/// Workspace chat endpoint (`POST {base_url}/workspace/{slug}/chat`).
pub struct WorkspaceChatModel {
    client: Client,
    base_url: String,
    api_key: String,
    workspace_slug: String,
    session_id: String,
}

impl WorkspaceChatModel {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            workspace_slug: config.workspace_slug.clone(),
            session_id: format!("securefill-{:08x}", rand::random::<u32>()),
        }
    }

    fn url(&self) -> String {
        format!("{}/workspace/{}/chat", self.base_url, self.workspace_slug)
    }
}

#[async_trait]
impl LanguageModel for WorkspaceChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let response = self
            .client
            .post(self.url())
            .header("accept", "application/json")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "message": prompt,
                "mode": "chat",
                "sessionId": self.session_id,
                "attachments": [],
            }))
            .send()
            .await?;

        let json_resp = checked_json(response).await?;
        json_resp["textResponse"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ModelError::MissingText(json_resp.to_string()))
    }
}

/// OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": self.temperature,
            }))
            .send()
            .await?;

        let json_resp = checked_json(response).await?;
        json_resp["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ModelError::MissingText(json_resp.to_string()))
    }
}

async fn checked_json(response: reqwest::Response) -> Result<Value, ModelError> {
    let status = response.status();
    let body = response.text().await?;
    let json_resp: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    if !status.is_success() {
        let message = api_error_message(&json_resp).unwrap_or(body);
        tracing::error!(%status, %message, "model API error");
        return Err(ModelError::Api { status, message });
    }
    if json_resp.is_null() {
        return Err(ModelError::MissingText(body));
    }
    Ok(json_resp)
}

fn api_error_message(json_resp: &Value) -> Option<String> {
    match &json_resp["error"] {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
