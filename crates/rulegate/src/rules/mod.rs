//! Compliance rules: model, parsing, and persistence.
//!
//! A [`RuleSet`] holds three collections extracted from a compliance
//! document:
//!
//! - **allowed**: when non-empty, a command must contain one of these
//! - **forbidden**: a command containing any of these is rejected
//! - **required**: every command must mention each entry (a plain pattern or
//!   the key of a keyed condition)
//!
//! Rule sets are persisted one file per document by [`RuleStore`] and
//! merged at evaluation time. Raw model responses are kept by [`AuditLog`]
//! so parsing can be retried without asking the model again.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rulegate::rules::{RuleItem, RuleKind, RuleStore, parse_rule_output};
//!
//! let rules = parse_rule_output("```yaml\nforbidden:\n  - rm -rf\n```");
//! let store = RuleStore::new("rules");
//! store.write("ops-policy.md", &rules).await?;
//! store
//!     .add_rule("ops-policy.md", RuleKind::Required, RuleItem::pattern("ticket").unwrap())
//!     .await?;
//! let merged = store.merge_all().await;
//! ```

mod audit;
mod model;
mod parse;
mod store;

pub use audit::{AuditArtifact, AuditLog};
pub use model::{RuleError, RuleItem, RuleKind, RuleSet, normalize_pattern};
pub use parse::{parse_rule_output, strip_code_fence};
pub use store::{RuleStore, StoreError, validate_document_id};
