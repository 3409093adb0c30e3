//! Command classification against a rule set.
//!
//! Matching is case-insensitive substring containment on the whole command
//! string. Each command is checked in a fixed order and stops at the first
//! disqualifying check:
//!
//! 1. any `forbidden` pattern contained in the command rejects it, reporting
//!    the pattern;
//! 2. every `required` item must be contained (a keyed condition by its
//!    key); the first missing one rejects it as `missing required: <item>`;
//! 3. if `allowed` is non-empty, at least one pattern must be contained,
//!    otherwise `not allowed`. An empty allow-list places no restriction.

use serde::{Deserialize, Serialize};

use crate::rules::RuleSet;

/// Rule text reported when a command matches no allow-list pattern.
pub const NOT_ALLOWED: &str = "not allowed";

/// Prefix of the rule text reported for an unmet requirement.
pub const MISSING_REQUIRED: &str = "missing required: ";

/// Outcome of checking one command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The command passed every applicable check.
    Safe,
    /// The command was rejected by the given rule.
    Violation(String),
}

impl Verdict {
    /// Returns true if the command may run.
    pub fn is_safe(&self) -> bool {
        matches!(self, Verdict::Safe)
    }

    /// Returns the rejecting rule, if any.
    pub fn rule(&self) -> Option<&str> {
        match self {
            Verdict::Safe => None,
            Verdict::Violation(rule) => Some(rule),
        }
    }
}

/// A rejected command paired with the rule that rejected it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// The command as produced by the planner.
    pub command: String,
    /// The pattern or reason it failed.
    pub rule: String,
}

impl Violation {
    /// Create a violation record.
    pub fn new(command: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            rule: rule.into(),
        }
    }
}

/// Overall outcome of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// At least one command is safe to run.
    Success,
    /// Commands were planned but every one was rejected.
    ViolationsFound,
    /// The planner produced nothing.
    NoPlan,
    /// Planning failed or was cancelled.
    Error,
}

impl Status {
    /// The wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::ViolationsFound => "violations_found",
            Status::NoPlan => "no_plan",
            Status::Error => "error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safe commands and violations from one evaluation pass, both in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Commands that passed every check.
    pub safe_plan: Vec<String>,
    /// Rejected commands.
    pub violations: Vec<Violation>,
}

impl Evaluation {
    /// Derive the status. A non-empty safe plan wins over violations.
    pub fn status(&self) -> Status {
        if !self.safe_plan.is_empty() {
            Status::Success
        } else if !self.violations.is_empty() {
            Status::ViolationsFound
        } else {
            Status::NoPlan
        }
    }
}

/// Classify a single command.
pub fn check_command(command: &str, rules: &RuleSet) -> Verdict {
    let haystack = command.to_lowercase();

    if let Some(pattern) = rules
        .forbidden
        .iter()
        .find(|p| haystack.contains(p.to_lowercase().as_str()))
    {
        return Verdict::Violation(pattern.clone());
    }

    for item in &rules.required {
        let trigger = item.trigger();
        if !haystack.contains(trigger.as_str()) {
            return Verdict::Violation(format!("{MISSING_REQUIRED}{trigger}"));
        }
    }

    if !rules.allowed.is_empty()
        && !rules
            .allowed
            .iter()
            .any(|p| haystack.contains(p.to_lowercase().as_str()))
    {
        return Verdict::Violation(NOT_ALLOWED.to_string());
    }

    Verdict::Safe
}

/// Classify every command, preserving order.
pub fn evaluate<S: AsRef<str>>(commands: &[S], rules: &RuleSet) -> Evaluation {
    let mut evaluation = Evaluation::default();
    for command in commands {
        let command = command.as_ref();
        match check_command(command, rules) {
            Verdict::Safe => evaluation.safe_plan.push(command.to_string()),
            Verdict::Violation(rule) => {
                tracing::debug!(command = %command, rule = %rule, "command rejected");
                evaluation.violations.push(Violation::new(command, rule));
            }
        }
    }
    evaluation
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rules::{RuleItem, RuleKind};

    fn rules(allowed: &[&str], forbidden: &[&str], required: Vec<RuleItem>) -> RuleSet {
        let mut set = RuleSet::new();
        for p in allowed {
            set.insert(RuleKind::Allowed, RuleItem::pattern(p).unwrap()).unwrap();
        }
        for p in forbidden {
            set.insert(RuleKind::Forbidden, RuleItem::pattern(p).unwrap()).unwrap();
        }
        for item in required {
            set.insert(RuleKind::Required, item).unwrap();
        }
        set
    }

    #[test]
    fn test_forbidden_with_safe_sibling_is_success() {
        let set = rules(&[], &["rm"], vec![]);
        let result = evaluate(&["rm -rf /", "ls -la"], &set);
        assert_eq!(result.violations, vec![Violation::new("rm -rf /", "rm")]);
        assert_eq!(result.safe_plan, vec!["ls -la"]);
        assert_eq!(result.status(), Status::Success);
    }

    #[test]
    fn test_keyed_requirement() {
        let set = rules(&[], &[], vec![RuleItem::condition("approval", "needed").unwrap()]);

        let ok = evaluate(&["deploy service approval granted"], &set);
        assert_eq!(ok.safe_plan, vec!["deploy service approval granted"]);
        assert!(ok.violations.is_empty());

        let bad = evaluate(&["deploy service now"], &set);
        assert_eq!(
            bad.violations,
            vec![Violation::new("deploy service now", "missing required: approval")]
        );
        assert_eq!(bad.status(), Status::ViolationsFound);
    }

    #[test]
    fn test_empty_input_is_no_plan() {
        let result = evaluate::<&str>(&[], &rules(&["ls"], &["rm"], vec![]));
        assert_eq!(result, Evaluation::default());
        assert_eq!(result.status(), Status::NoPlan);
    }

    #[test]
    fn test_forbidden_short_circuits_other_checks() {
        let set = rules(&["ls"], &["sudo"], vec![RuleItem::pattern("ticket").unwrap()]);
        assert_eq!(
            check_command("sudo ls", &set),
            Verdict::Violation("sudo".to_string())
        );
    }

    #[test]
    fn test_first_forbidden_pattern_is_reported() {
        let set = rules(&[], &["rm", "rf"], vec![]);
        assert_eq!(check_command("rm -rf /tmp/x", &set).rule(), Some("rm"));
    }

    #[test]
    fn test_first_unmet_requirement_is_reported() {
        let set = rules(
            &[],
            &[],
            vec![
                RuleItem::pattern("--dry-run").unwrap(),
                RuleItem::pattern("ticket").unwrap(),
                RuleItem::pattern("owner").unwrap(),
            ],
        );
        assert_eq!(
            check_command("apply --dry-run", &set),
            Verdict::Violation("missing required: ticket".to_string())
        );
    }

    #[test]
    fn test_allow_list() {
        let set = rules(&["ls", "cat"], &[], vec![]);
        assert!(check_command("cat /etc/hosts", &set).is_safe());
        assert_eq!(check_command("whoami", &set).rule(), Some(NOT_ALLOWED));
    }

    #[test]
    fn test_empty_allow_list_is_open() {
        assert!(check_command("anything at all", &RuleSet::new()).is_safe());
    }

    #[test]
    fn test_matching_ignores_case() {
        let set = rules(&["ls"], &["shutdown"], vec![]);
        assert_eq!(check_command("SHUTDOWN -h now", &set).rule(), Some("shutdown"));
        assert!(check_command("LS -LA", &set).is_safe());
    }

    #[test]
    fn test_condition_key_matched_case_insensitively() {
        let set = rules(&[], &[], vec![RuleItem::condition("Network_Restart", "admin").unwrap()]);
        assert!(check_command("systemctl network_restart", &set).is_safe());
        assert_eq!(
            check_command("systemctl restart", &set).rule(),
            Some("missing required: network_restart")
        );
    }

    #[test]
    fn test_safe_plan_preserves_order_and_duplicates() {
        let set = rules(&[], &["rm"], vec![]);
        let result = evaluate(&["b", "rm x", "a", "b"], &set);
        assert_eq!(result.safe_plan, vec!["b", "a", "b"]);
        assert_eq!(result.violations.len(), 1);
    }

    #[test]
    fn test_safe_plan_and_violations_partition_input() {
        let set = rules(&["ls", "git"], &["--force"], vec![RuleItem::pattern("-").unwrap()]);
        let commands = ["ls -la", "git push --force", "git status", "ls", "pwd -P"];
        let result = evaluate(&commands, &set);

        assert_eq!(result.safe_plan.len() + result.violations.len(), commands.len());
        for safe in &result.safe_plan {
            assert!(commands.contains(&safe.as_str()));
            assert!(!result.violations.iter().any(|v| &v.command == safe));
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let set = rules(&["ls"], &["rm"], vec![RuleItem::pattern("-").unwrap()]);
        for command in ["ls -la", "rm -rf", "ls", "cat -n"] {
            assert_eq!(check_command(command, &set), check_command(command, &set));
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Status::ViolationsFound).unwrap(),
            "\"violations_found\""
        );
        assert_eq!(Status::NoPlan.to_string(), "no_plan");
    }
}
