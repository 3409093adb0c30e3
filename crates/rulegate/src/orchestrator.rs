//! One request/response cycle: plan, merge rules, evaluate.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::completion::{CompletionError, TextCompletion};
use crate::evaluate::{Evaluation, Status, Violation, evaluate};
use crate::planner::{CommandPlanner, Plan, PlanError};
use crate::rules::RuleStore;

/// Rule text of the violation reported for a cancelled request.
pub const CANCELLED_RULE: &str = "request cancelled";

/// The evaluation response returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    /// The query as received.
    pub query: String,
    /// The planner's raw answer, for audit.
    pub planner_raw: String,
    /// Commands that passed every check, in planner order.
    pub safe_plan: Vec<String>,
    /// Rejected commands, in planner order.
    pub violations: Vec<Violation>,
    /// Overall outcome.
    pub status: Status,
}

impl ComplianceReport {
    fn evaluated(query: &str, planner_raw: String, evaluation: Evaluation) -> Self {
        let status = evaluation.status();
        Self {
            query: query.to_string(),
            planner_raw,
            safe_plan: evaluation.safe_plan,
            violations: evaluation.violations,
            status,
        }
    }

    fn failed(query: &str, rule: String) -> Self {
        Self {
            query: query.to_string(),
            planner_raw: String::new(),
            safe_plan: Vec::new(),
            violations: vec![Violation::new("", rule)],
            status: Status::Error,
        }
    }
}

/// Composes the planner, the rule store and the evaluator.
///
/// The rule store handle is owned here and can be swapped at runtime with
/// [`Orchestrator::replace_store`]; requests already in flight keep the
/// handle they started with.
pub struct Orchestrator {
    store: RwLock<Arc<RuleStore>>,
    planner: CommandPlanner,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store().root())
            .field("planner", &self.planner)
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator bounding each model call by `timeout`.
    pub fn new(store: Arc<RuleStore>, completion: Arc<dyn TextCompletion>, timeout: Duration) -> Self {
        Self {
            store: RwLock::new(store),
            planner: CommandPlanner::new(completion, timeout),
        }
    }

    /// The current rule store handle.
    pub fn store(&self) -> Arc<RuleStore> {
        self.store
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new rule store, returning the previous one.
    pub fn replace_store(&self, store: Arc<RuleStore>) -> Arc<RuleStore> {
        let mut guard = self
            .store
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::info!(rules_dir = %store.root().display(), "rule store replaced");
        std::mem::replace(&mut *guard, store)
    }

    /// Plan `query` and evaluate the result against the merged rules.
    pub async fn run(&self, query: &str) -> ComplianceReport {
        self.run_with_cancel(query, CancellationToken::new()).await
    }

    /// Like [`Orchestrator::run`], but gives up when `cancel` fires while
    /// the model call is pending.
    ///
    /// A cancelled request reports status `error` and leaves the rule store
    /// untouched.
    pub async fn run_with_cancel(&self, query: &str, cancel: CancellationToken) -> ComplianceReport {
        tracing::debug!(query = %query, phase = "received");

        if query.trim().is_empty() {
            tracing::debug!(phase = "completed", status = %Status::NoPlan, "blank query");
            return ComplianceReport::evaluated(query, String::new(), Evaluation::default());
        }

        tracing::debug!(phase = "planning");
        let planned = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PlanError::Unavailable(CompletionError::Cancelled)),
            plan = self.planner.plan(query) => plan,
        };

        let Plan { commands, raw } = match planned {
            Ok(plan) => plan,
            Err(PlanError::EmptyQuery) => Plan::default(),
            Err(PlanError::Unavailable(CompletionError::Cancelled)) => {
                tracing::debug!(phase = "plan_failed", "request cancelled");
                return ComplianceReport::failed(query, CANCELLED_RULE.to_string());
            }
            Err(PlanError::Unavailable(e)) => {
                tracing::debug!(phase = "plan_failed", error = %e);
                return ComplianceReport::failed(query, format!("LLM call failed: {e}"));
            }
        };
        tracing::debug!(phase = "planned", commands = commands.len());

        let report = self.evaluate_commands(query, raw, &commands).await;
        tracing::debug!(
            phase = "completed",
            status = %report.status,
            safe = report.safe_plan.len(),
            violations = report.violations.len()
        );
        report
    }

    /// Evaluate caller-supplied commands against the merged rules without
    /// planning.
    pub async fn check<S: AsRef<str>>(&self, commands: &[S]) -> ComplianceReport {
        self.evaluate_commands("", String::new(), commands).await
    }

    async fn evaluate_commands<S: AsRef<str>>(
        &self,
        query: &str,
        planner_raw: String,
        commands: &[S],
    ) -> ComplianceReport {
        tracing::debug!(phase = "evaluating");
        let merged = self.store().merge_all().await;
        ComplianceReport::evaluated(query, planner_raw, evaluate(commands, &merged))
    }
}
