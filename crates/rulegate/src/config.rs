//! Engine configuration.
//!
//! Every field has a default, so an empty or partial YAML file is valid:
//!
//! ```yaml
//! rules_dir: rules
//! audit_dir: rules/raw
//! documents_dir: uploads
//! completion:
//!   backend: ollama
//!   model: llama3
//!   endpoint: http://127.0.0.1:11434
//!   timeout: 120000   # milliseconds
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::{OllamaCompletion, ProcessCompletion, TextCompletion};
use crate::documents::DirectoryDocuments;
use crate::extract::{DEFAULT_MAX_DOCUMENT_CHARS, RuleExtractor};
use crate::orchestrator::Orchestrator;
use crate::rules::{AuditLog, RuleStore};

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// The file that was requested.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid YAML for this structure.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// Unknown completion backend name.
    #[error("unknown completion backend {0:?} (expected process or ollama)")]
    UnknownBackend(String),
}

/// How the model is reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Spawn a local program per prompt.
    #[default]
    Process,
    /// Call the Ollama HTTP API.
    Ollama,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Process => f.write_str("process"),
            Backend::Ollama => f.write_str("ollama"),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(Backend::Process),
            "ollama" => Ok(Backend::Ollama),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Text-completion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Which collaborator to build.
    pub backend: Backend,
    /// Model name.
    pub model: String,
    /// Program run by the process backend.
    pub program: String,
    /// Arguments for the program. Empty means `run <model>`.
    pub args: Vec<String>,
    /// Base URL of the Ollama API.
    pub endpoint: String,
    /// Upper bound on a single model call.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Process,
            model: "llama3".to_string(),
            program: "ollama".to_string(),
            args: Vec::new(),
            endpoint: "http://127.0.0.1:11434".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl CompletionConfig {
    /// Build the configured collaborator.
    pub fn build(&self) -> Arc<dyn TextCompletion> {
        match self.backend {
            Backend::Process => {
                let args = if self.args.is_empty() {
                    vec!["run".to_string(), self.model.clone()]
                } else {
                    self.args.clone()
                };
                Arc::new(ProcessCompletion::new(self.program.clone(), args))
            }
            Backend::Ollama => Arc::new(OllamaCompletion::new(self.endpoint.clone(), self.model.clone())),
        }
    }
}

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of per-document rule files.
    pub rules_dir: PathBuf,
    /// Directory of raw extraction responses.
    pub audit_dir: PathBuf,
    /// Directory of plain-text source documents.
    pub documents_dir: PathBuf,
    /// Cap on document characters sent for extraction.
    pub max_document_chars: usize,
    /// Model settings.
    pub completion: CompletionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules_dir: PathBuf::from("rules"),
            audit_dir: PathBuf::from("rules/raw"),
            documents_dir: PathBuf::from("uploads"),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
            completion: CompletionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse from YAML text. Blank text yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// The rule store described by this configuration.
    pub fn rule_store(&self) -> RuleStore {
        RuleStore::new(&self.rules_dir)
    }

    /// The audit log described by this configuration.
    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(&self.audit_dir)
    }

    /// The document source described by this configuration.
    pub fn documents(&self) -> DirectoryDocuments {
        DirectoryDocuments::new(&self.documents_dir)
    }

    /// Build an orchestrator over `store`.
    pub fn orchestrator(&self, store: Arc<RuleStore>, completion: Arc<dyn TextCompletion>) -> Orchestrator {
        Orchestrator::new(store, completion, self.completion.timeout)
    }

    /// Build an extractor writing into `store`.
    pub fn extractor(&self, store: Arc<RuleStore>, completion: Arc<dyn TextCompletion>) -> RuleExtractor {
        RuleExtractor::new(completion, store, self.audit_log())
            .with_timeout(self.completion.timeout)
            .with_max_document_chars(self.max_document_chars)
    }
}

/// Helper for serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
