//! Model invocation through the Ollama HTTP API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CompletionError, TextCompletion};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Calls `POST <endpoint>/api/generate` with streaming disabled.
#[derive(Debug, Clone)]
pub struct OllamaCompletion {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaCompletion {
    /// Create a collaborator for `model` served at `endpoint`
    /// (e.g. `http://127.0.0.1:11434`).
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextCompletion for OllamaCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(self.generate_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Http(format!("{status}: {}", body.trim())));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Http(format!("invalid response body: {e}")))?;
        Ok(body.response.trim().to_string())
    }

    fn describe(&self) -> String {
        format!("ollama http {} ({})", self.endpoint, self.model)
    }
}
