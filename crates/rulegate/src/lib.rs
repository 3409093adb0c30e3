//! Rulegate: compliance gate for LLM-planned shell commands
//!
//! Rulegate turns compliance documents into allow/forbid/require rules with a
//! language model, then uses those rules to filter the commands the same
//! model proposes for a natural-language request. Evaluation is plain
//! substring matching over the merged rules of every document, so the
//! outcome is deterministic and auditable even when the rules themselves
//! are imperfect.

#[cfg(feature = "cli")]
mod cli;
mod config;
mod documents;
mod evaluate;
mod extract;
mod orchestrator;
mod planner;

pub mod completion;
pub mod rules;

#[cfg(feature = "cli")]
pub use cli::EngineArgs;
pub use completion::{CompletionError, TextCompletion};
pub use config::{Backend, CompletionConfig, ConfigError, EngineConfig};
pub use documents::{DirectoryDocuments, DocumentError, DocumentSource, document_id_for};
pub use evaluate::{
    Evaluation, MISSING_REQUIRED, NOT_ALLOWED, Status, Verdict, Violation, check_command, evaluate,
};
pub use extract::{
    DEFAULT_MAX_DOCUMENT_CHARS, ExtractError, Extraction, RuleExtractor, extraction_prompt,
};
pub use orchestrator::{CANCELLED_RULE, ComplianceReport, Orchestrator};
pub use planner::{CommandPlanner, Plan, PlanError, parse_command_output, plan_prompt};
pub use rules::{RuleError, RuleItem, RuleKind, RuleSet, RuleStore, StoreError};
