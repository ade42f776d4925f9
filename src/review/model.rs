use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use super::prompt::ChatRequest;
use crate::config::ModelSettings;
use crate::http::{build_url, HttpClient, HttpError, HttpRequest};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Http(#[from] HttpError),

    #[error("Failed to encode model request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Model returned no choices")]
    NoChoices,
}

/// Chat-completion capability. Returns the raw text of the first choice.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Azure OpenAI deployment client.
pub struct AzureOpenAiClient {
    http: Arc<dyn HttpClient>,
    settings: ModelSettings,
}

impl AzureOpenAiClient {
    pub fn new(http: Arc<dyn HttpClient>, settings: ModelSettings) -> Self {
        Self { http, settings }
    }

    fn endpoint(&self, deployment: &str) -> Result<String, HttpError> {
        build_url(
            &self.settings.endpoint,
            &["openai", "deployments", deployment, "chat", "completions"],
            &[("api-version", &self.settings.api_version)],
        )
    }
}

#[async_trait]
impl ModelClient for AzureOpenAiClient {
    #[instrument(skip(self, request), fields(deployment = %request.deployment, messages = request.messages.len()))]
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let deployment = if request.deployment.is_empty() {
            &self.settings.deployment
        } else {
            &request.deployment
        };
        let body = serde_json::to_value(request)?;
        let http_request =
            HttpRequest::post_json(self.endpoint(deployment)?, body).header("api-key", &self.settings.api_key);

        let response: CompletionResponse = self.http.send(http_request).await?.error_for_status()?.json()?;
        let choice = response.choices.into_iter().next().ok_or(ModelError::NoChoices)?;
        let content = choice.message.content.unwrap_or_default();
        debug!(content_chars = content.len(), "received completion");
        Ok(content)
    }
}
