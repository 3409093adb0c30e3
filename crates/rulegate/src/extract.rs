//! Document text to stored rule set.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::completion::{CompletionError, TextCompletion, complete_within};
use crate::rules::{AuditArtifact, AuditLog, RuleSet, RuleStore, StoreError, parse_rule_output};

/// Default cap on the document text sent to the model.
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 48_000;

const EXTRACTION_PROMPT: &str = "\
Extract compliance rules for shell commands from the text below.
Respond ONLY with YAML using exactly these keys: allowed, forbidden, required.
Each key maps to a list. Use one command or command fragment per entry.
A required entry may be a plain string or a single-key mapping from a
trigger keyword to the requirement. Do not add explanations.

Example:
allowed:
  - ls
  - pwd
forbidden:
  - rm -rf
  - shutdown
required:
  - check_user
  - network_restart: admin approval required

Text:
";

/// Errors from rule extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The document text was blank; the model was not called.
    #[error("document text is empty")]
    EmptyDocument,
    /// The model could not be reached, failed, or timed out.
    #[error("LLM unavailable: {0}")]
    Unavailable(#[from] CompletionError),
    /// No raw output has been recorded for the document.
    #[error("no recorded model output for document {0:?}")]
    NoArtifact(String),
    /// Persisting the rules or the raw output failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Parsed rules; empty when the output could not be parsed.
    pub rules: RuleSet,
    /// The model's answer, verbatim.
    pub raw_output: String,
    /// Where the raw answer was recorded.
    pub artifact: AuditArtifact,
}

/// Build the extraction prompt for a document's text.
pub fn extraction_prompt(text: &str) -> String {
    let mut prompt = String::with_capacity(EXTRACTION_PROMPT.len() + text.len() + 1);
    prompt.push_str(EXTRACTION_PROMPT);
    prompt.push_str(text.trim());
    prompt.push('\n');
    prompt
}

/// Cut `text` to at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Runs the model over document text and keeps its answer for audit.
#[derive(Clone)]
pub struct RuleExtractor {
    completion: Arc<dyn TextCompletion>,
    store: Arc<RuleStore>,
    audit: AuditLog,
    timeout: Duration,
    max_document_chars: usize,
}

impl std::fmt::Debug for RuleExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleExtractor")
            .field("backend", &self.completion.describe())
            .field("store", &self.store.root())
            .field("audit", &self.audit.dir())
            .field("timeout", &self.timeout)
            .field("max_document_chars", &self.max_document_chars)
            .finish()
    }
}

impl RuleExtractor {
    /// Create an extractor writing rules to `store` and raw answers to `audit`.
    pub fn new(completion: Arc<dyn TextCompletion>, store: Arc<RuleStore>, audit: AuditLog) -> Self {
        Self {
            completion,
            store,
            audit,
            timeout: Duration::from_secs(120),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }

    /// Bound each model call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap the number of document characters sent to the model.
    pub fn with_max_document_chars(mut self, max_chars: usize) -> Self {
        self.max_document_chars = max_chars;
        self
    }

    /// The audit log receiving raw answers.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Ask the model for rules and record its answer. Does not touch the store.
    ///
    /// The raw answer is recorded before parsing, so a parse failure still
    /// leaves something to retry with [`RuleExtractor::reparse`]. When the
    /// model fails, the reason is recorded instead.
    pub async fn extract(&self, document_id: &str, text: &str) -> Result<Extraction, ExtractError> {
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyDocument);
        }

        let text = text.trim();
        let limited = truncate_chars(text, self.max_document_chars);
        if limited.len() < text.len() {
            tracing::info!(
                document_id = %document_id,
                max_chars = self.max_document_chars,
                "document text truncated for extraction"
            );
        }

        let raw_output = match complete_within(
            self.completion.as_ref(),
            &extraction_prompt(limited),
            self.timeout,
        )
        .await
        {
            Ok(raw_output) => raw_output,
            Err(e) => {
                tracing::warn!(document_id = %document_id, error = %e, "extraction failed");
                if let Err(audit_err) = self.audit.record_failure(document_id, &e.to_string()).await {
                    tracing::warn!(document_id = %document_id, error = %audit_err, "cannot record extraction failure");
                }
                return Err(e.into());
            }
        };

        let artifact = self.audit.record(document_id, &raw_output).await?;
        let rules = parse_rule_output(&raw_output);
        tracing::debug!(document_id = %document_id, rules = rules.len(), "rules extracted");

        Ok(Extraction {
            rules,
            raw_output,
            artifact,
        })
    }

    /// Extract rules and overwrite the document's record with them.
    pub async fn extract_and_store(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<Extraction, ExtractError> {
        let extraction = self.extract(document_id, text).await?;
        self.store.write(document_id, &extraction.rules).await?;
        Ok(extraction)
    }

    /// Re-parse the newest recorded answer and overwrite the record, without
    /// calling the model.
    pub async fn reparse(&self, document_id: &str) -> Result<Extraction, ExtractError> {
        let Some((artifact, raw_output)) = self.audit.latest(document_id).await? else {
            return Err(ExtractError::NoArtifact(document_id.to_string()));
        };

        let rules = parse_rule_output(&raw_output);
        self.store.write(document_id, &rules).await?;
        tracing::debug!(
            document_id = %document_id,
            artifact = %artifact.path.display(),
            rules = rules.len(),
            "rules re-parsed from recorded output"
        );

        Ok(Extraction {
            rules,
            raw_output,
            artifact,
        })
    }
}
