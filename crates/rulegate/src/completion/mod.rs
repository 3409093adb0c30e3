//! Text-completion collaborators.
//!
//! The engine treats the language model as an opaque capability: a prompt
//! goes in, text comes out, and the call may fail or hang. Everything that
//! talks to a model goes through [`TextCompletion`] so extraction and
//! planning can be exercised with deterministic fakes.
//!
//! Calls are always bounded with [`complete_within`]; a collaborator that
//! does not answer in time is reported as [`CompletionError::Timeout`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod fixed;
mod ollama;
mod process;

pub use fixed::{FailingCompletion, SlowCompletion, StaticCompletion};
pub use ollama::OllamaCompletion;
pub use process::ProcessCompletion;

/// Errors from a text-completion collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The collaborator did not answer in time.
    #[error("model call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The caller abandoned the request.
    #[error("model call cancelled")]
    Cancelled,
    /// The model process exited unsuccessfully.
    #[error("model process failed ({status}): {stderr}")]
    Process {
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },
    /// The HTTP backend returned an error.
    #[error("model endpoint error: {0}")]
    Http(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CompletionError {
    fn from(e: std::io::Error) -> Self {
        CompletionError::Io(e.to_string())
    }
}

/// Prompt in, text out.
///
/// Implementations must be cancel-safe: dropping the returned future must
/// abandon the underlying call.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Complete the prompt.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Short label for logs, e.g. `ollama run llama3`.
    fn describe(&self) -> String {
        "text-completion".to_string()
    }
}

#[async_trait]
impl TextCompletion for Arc<dyn TextCompletion> {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        (**self).complete(prompt).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Run a completion with an upper bound on wall-clock time.
pub async fn complete_within(
    completion: &dyn TextCompletion,
    prompt: &str,
    timeout: Duration,
) -> Result<String, CompletionError> {
    let started = std::time::Instant::now();
    let result = match tokio::time::timeout(timeout, completion.complete(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(CompletionError::Timeout(timeout)),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(text) => tracing::debug!(
            backend = %completion.describe(),
            elapsed_ms,
            bytes = text.len(),
            "model call completed"
        ),
        Err(e) => tracing::warn!(
            backend = %completion.describe(),
            elapsed_ms,
            error = %e,
            "model call failed"
        ),
    }
    result
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NeverAnswers;

    #[async_trait]
    impl TextCompletion for NeverAnswers {
        async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_complete_within_passes_through() {
        let completion = StaticCompletion::new("hello");
        let text = complete_within(&completion, "hi", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_within_times_out() {
        let err = complete_within(&NeverAnswers, "hi", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, CompletionError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_complete_within_reports_failure() {
        let completion = FailingCompletion::new(CompletionError::Http("503".into()));
        let err = complete_within(&completion, "hi", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, CompletionError::Http("503".into()));
    }

    #[tokio::test]
    async fn test_arc_dyn_dispatch() {
        let completion: Arc<dyn TextCompletion> = Arc::new(StaticCompletion::new("ok"));
        assert_eq!(completion.complete("x").await.unwrap(), "ok");
    }
}
