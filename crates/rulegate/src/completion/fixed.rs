//! Deterministic collaborators for tests and offline replays.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionError, TextCompletion};

/// Answers every prompt with the same text and remembers the prompts.
///
/// Useful for replaying a captured model response through the engine.
#[derive(Debug, Default)]
pub struct StaticCompletion {
    response: String,
    prompts: Mutex<Vec<String>>,
}

impl StaticCompletion {
    /// Create a collaborator that always answers `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Number of calls made.
    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl TextCompletion for StaticCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(self.response.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// Fails every call with the same error.
#[derive(Debug)]
pub struct FailingCompletion {
    error: CompletionError,
}

impl FailingCompletion {
    /// Create a collaborator that always fails with `error`.
    pub fn new(error: CompletionError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl TextCompletion for FailingCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        Err(self.error.clone())
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}

/// Answers after a fixed delay. Dropping the future abandons the call.
#[derive(Debug)]
pub struct SlowCompletion {
    delay: Duration,
    response: String,
}

impl SlowCompletion {
    /// Create a collaborator that waits `delay` before answering `response`.
    pub fn new(delay: Duration, response: impl Into<String>) -> Self {
        Self {
            delay,
            response: response.into(),
        }
    }
}

#[async_trait]
impl TextCompletion for SlowCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.response.clone())
    }

    fn describe(&self) -> String {
        format!("slow ({}ms)", self.delay.as_millis())
    }
}
