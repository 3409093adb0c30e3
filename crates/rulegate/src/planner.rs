//! Natural-language query to candidate command list.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::completion::{CompletionError, TextCompletion, complete_within};

/// Errors from planning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The query was blank; the model was not called.
    #[error("query is empty")]
    EmptyQuery,
    /// The model could not be reached, failed, or timed out.
    #[error("LLM unavailable: {0}")]
    Unavailable(#[from] CompletionError),
}

/// Commands proposed by the model, plus its raw answer for audit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Candidate commands in the order the model produced them.
    pub commands: Vec<String>,
    /// The model's unparsed answer.
    pub raw: String,
}

/// Build the planning prompt for a query.
pub fn plan_prompt(query: &str) -> String {
    format!(
        "Convert the natural language query into shell commands.\n\
         Respond ONLY in JSON with this exact format:\n\
         {{ \"Commands\": [\"cmd1\", \"cmd2\"] }}\n\
         Do not add explanations, markdown, or any other keys.\n\n\
         Query: {}\n",
        query.trim()
    )
}

/// Extract the command list from a model answer. Never fails.
///
/// The answer is parsed as JSON; if that fails, the span from the first `{`
/// to the last `}` is parsed instead. Anything else yields no commands. The
/// model text is only ever handed to a JSON parser.
pub fn parse_command_output(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();

    let parsed = serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
        .or_else(|| {
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str::<Value>(&trimmed[start..=end])
                .ok()
                .filter(Value::is_object)
        });

    let Some(object) = parsed else {
        if !trimmed.is_empty() {
            tracing::warn!(bytes = raw.len(), "planner output is not a JSON object");
            tracing::trace!(raw = %raw, "unparsed planner output");
        }
        return Vec::new();
    };

    let commands = object.get("Commands").or_else(|| {
        object.as_object().and_then(|map| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("commands"))
                .map(|(_, v)| v)
        })
    });

    match commands {
        Some(Value::Array(items)) => items.iter().filter_map(command_text).collect(),
        Some(single @ Value::String(_)) => command_text(single).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn command_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

/// Turns queries into command lists using a text-completion collaborator.
#[derive(Clone)]
pub struct CommandPlanner {
    completion: Arc<dyn TextCompletion>,
    timeout: Duration,
}

impl std::fmt::Debug for CommandPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPlanner")
            .field("backend", &self.completion.describe())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CommandPlanner {
    /// Create a planner with a bound on each model call.
    pub fn new(completion: Arc<dyn TextCompletion>, timeout: Duration) -> Self {
        Self {
            completion,
            timeout,
        }
    }

    /// Ask the model for commands answering `query`.
    ///
    /// Malformed answers yield an empty plan; only a blank query or an
    /// unreachable model are errors.
    pub async fn plan(&self, query: &str) -> Result<Plan, PlanError> {
        if query.trim().is_empty() {
            return Err(PlanError::EmptyQuery);
        }

        let raw = complete_within(self.completion.as_ref(), &plan_prompt(query), self.timeout).await?;
        let commands = parse_command_output(&raw);
        tracing::debug!(commands = commands.len(), "plan parsed");
        Ok(Plan { commands, raw })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::completion::{FailingCompletion, StaticCompletion};

    #[test]
    fn test_parse_clean_json() {
        let commands = parse_command_output(r#"{"Commands": ["ls -la", "df -h"]}"#);
        assert_eq!(commands, vec!["ls -la", "df -h"]);
    }

    #[test]
    fn test_parse_json_in_prose_and_fence() {
        let raw = "Here you go:\n```json\n{ \"Commands\": [\"uptime\"] }\n```\nAnything else?";
        assert_eq!(parse_command_output(raw), vec!["uptime"]);
    }

    #[test]
    fn test_parse_coerces_and_drops_blanks() {
        let raw = r#"{"Commands": ["ls", "", "   ", null, 42, true, ["nested"], {"x": 1}, "pwd"]}"#;
        assert_eq!(parse_command_output(raw), vec!["ls", "42", "true", "pwd"]);
    }

    #[test]
    fn test_parse_preserves_order_and_duplicates() {
        let raw = r#"{"Commands": ["b", "a", "b"]}"#;
        assert_eq!(parse_command_output(raw), vec!["b", "a", "b"]);
    }

    #[test]
    fn test_parse_lowercase_key() {
        assert_eq!(parse_command_output(r#"{"commands": ["whoami"]}"#), vec!["whoami"]);
    }

    #[test]
    fn test_parse_malformed_is_empty() {
        assert!(parse_command_output("rm -rf / # trust me").is_empty());
        assert!(parse_command_output("__import__('os').system('id')").is_empty());
        assert!(parse_command_output("{'Commands': ['ls']}").is_empty());
        assert!(parse_command_output("} backwards {").is_empty());
        assert!(parse_command_output("").is_empty());
        assert!(parse_command_output(r#"["ls"]"#).is_empty());
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_command_output(r#"{"Commands": []}"#).is_empty());
    }

    #[test]
    fn test_prompt_mentions_query_and_shape() {
        let prompt = plan_prompt("  list files  ");
        assert!(prompt.contains("Query: list files\n"));
        assert!(prompt.contains("\"Commands\""));
    }

    #[tokio::test]
    async fn test_plan_blank_query_skips_model() {
        let completion = Arc::new(StaticCompletion::new(r#"{"Commands": ["ls"]}"#));
        let planner = CommandPlanner::new(completion.clone(), Duration::from_secs(1));
        assert_eq!(planner.plan("   ").await, Err(PlanError::EmptyQuery));
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn test_plan_returns_raw_and_commands() {
        let raw = r#"{"Commands": ["ls"]}"#;
        let planner = CommandPlanner::new(Arc::new(StaticCompletion::new(raw)), Duration::from_secs(1));
        let plan = planner.plan("list files").await.unwrap();
        assert_eq!(plan.commands, vec!["ls"]);
        assert_eq!(plan.raw, raw);
    }

    #[tokio::test]
    async fn test_plan_unavailable() {
        let planner = CommandPlanner::new(
            Arc::new(FailingCompletion::new(CompletionError::Http("down".into()))),
            Duration::from_secs(1),
        );
        assert_eq!(
            planner.plan("list files").await,
            Err(PlanError::Unavailable(CompletionError::Http("down".into())))
        );
    }
}
