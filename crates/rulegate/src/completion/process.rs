//! Model invocation through a local command such as `ollama run llama3`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{CompletionError, TextCompletion};

/// Runs a program per prompt, writing the prompt to stdin and reading the
/// answer from stdout.
///
/// The child is killed if the returned future is dropped, so timeouts and
/// cancellation never leave a model process behind.
#[derive(Debug, Clone)]
pub struct ProcessCompletion {
    program: String,
    args: Vec<String>,
}

impl ProcessCompletion {
    /// Create a collaborator running `program args...`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `ollama run <model>`.
    pub fn ollama(model: &str) -> Self {
        Self::new("ollama", vec!["run".to_string(), model.to_string()])
    }
}

#[async_trait]
impl TextCompletion for ProcessCompletion {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(CompletionError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn describe(&self) -> String {
        let mut label = self.program.clone();
        for arg in &self.args {
            label.push(' ');
            label.push_str(arg);
        }
        label
    }
}
