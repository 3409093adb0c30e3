//! Command-line flags shared by the rulegate binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::{Backend, ConfigError, EngineConfig};

/// Engine settings from flags or `RULEGATE_*` environment variables.
///
/// Flags override values from the `--config` file, which override defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct EngineArgs {
    /// YAML configuration file.
    #[arg(long, env = "RULEGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory of per-document rule files.
    #[arg(long, env = "RULEGATE_RULES_DIR")]
    pub rules_dir: Option<PathBuf>,

    /// Directory of raw extraction responses.
    #[arg(long, env = "RULEGATE_AUDIT_DIR")]
    pub audit_dir: Option<PathBuf>,

    /// Directory of plain-text source documents.
    #[arg(long, env = "RULEGATE_DOCUMENTS_DIR")]
    pub documents_dir: Option<PathBuf>,

    /// Completion backend: `process` or `ollama`.
    #[arg(long, env = "RULEGATE_BACKEND")]
    pub backend: Option<Backend>,

    /// Model name.
    #[arg(long, env = "RULEGATE_MODEL")]
    pub model: Option<String>,

    /// Ollama API base URL.
    #[arg(long, env = "RULEGATE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Upper bound on a single model call, in milliseconds.
    #[arg(long, env = "RULEGATE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
}

impl EngineArgs {
    /// Load the config file (if any) and apply the flags on top.
    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = EngineConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }

    /// Apply the flags that were given.
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(dir) = &self.rules_dir {
            config.rules_dir = dir.clone();
        }
        if let Some(dir) = &self.audit_dir {
            config.audit_dir = dir.clone();
        }
        if let Some(dir) = &self.documents_dir {
            config.documents_dir = dir.clone();
        }
        if let Some(backend) = self.backend {
            config.completion.backend = backend;
        }
        if let Some(model) = &self.model {
            config.completion.model = model.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.completion.endpoint = endpoint.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.completion.timeout = Duration::from_millis(ms);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        engine: EngineArgs,
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "rulegate",
            "--rules-dir",
            "/tmp/rules",
            "--backend",
            "ollama",
            "--model",
            "mistral",
            "--timeout-ms",
            "250",
        ])
        .unwrap();

        let mut config = EngineConfig::default();
        cli.engine.apply(&mut config);
        assert_eq!(config.rules_dir, PathBuf::from("/tmp/rules"));
        assert_eq!(config.audit_dir, PathBuf::from("rules/raw"));
        assert_eq!(config.completion.backend, Backend::Ollama);
        assert_eq!(config.completion.model, "mistral");
        assert_eq!(config.completion.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(TestCli::try_parse_from(["rulegate", "--backend", "grpc"]).is_err());
    }

    #[test]
    fn test_no_flags_keeps_config() {
        let mut config = EngineConfig::default();
        EngineArgs::default().apply(&mut config);
        assert_eq!(config, EngineConfig::default());
    }
}
