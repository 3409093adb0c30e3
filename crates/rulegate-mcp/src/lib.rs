//! Rulegate MCP Server
//!
//! An MCP server that lets an agent gate its own shell commands against the
//! rules extracted from compliance documents before running them.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::*,
    schemars::{self, JsonSchema},
    service::{RequestContext, RoleServer},
};
use rulegate::{ComplianceReport, Orchestrator};
use serde::{Deserialize, Serialize};

/// Parameters for the `check_commands` tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckParams {
    /// Shell commands to check, in the order they would run.
    pub commands: Vec<String>,
}

/// Parameters for the `plan_and_check` tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PlanParams {
    /// What the user wants done, in natural language.
    pub query: String,
}

/// MCP Server that checks commands against the stored compliance rules
#[derive(Clone)]
pub struct RulegateServer {
    orchestrator: Arc<Orchestrator>,
}

impl std::fmt::Debug for RulegateServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulegateServer").finish_non_exhaustive()
    }
}

impl RulegateServer {
    /// Create a server evaluating through `orchestrator`.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Check caller-supplied commands against the merged rules.
    pub async fn check_commands(&self, params: CheckParams) -> Result<CallToolResult, McpError> {
        let report = self.orchestrator.check(&params.commands).await;
        report_result(&report)
    }

    /// Plan a query with the model, then check the planned commands.
    pub async fn plan_and_check(&self, params: PlanParams) -> Result<CallToolResult, McpError> {
        let report = self.orchestrator.run(&params.query).await;
        report_result(&report)
    }

    fn check_tool(&self) -> Tool {
        Tool {
            name: "check_commands".into(),
            title: Some("Check Commands Against Compliance Rules".into()),
            description: Some(
                "Check shell commands against the allowed, forbidden and required rules \
                extracted from compliance documents. Returns the commands that are safe to run \
                (safe_plan) and, for each rejected command, the rule that rejected it."
                    .into(),
            ),
            input_schema: input_schema(schemars::schema_for!(CheckParams)),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }

    fn plan_tool(&self) -> Tool {
        Tool {
            name: "plan_and_check".into(),
            title: Some("Plan and Check Commands".into()),
            description: Some(
                "Turn a natural-language request into shell commands with the configured model, \
                then check them against the compliance rules. Returns the raw plan, the safe \
                commands and the violations."
                    .into(),
            ),
            input_schema: input_schema(schemars::schema_for!(PlanParams)),
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }
}

fn input_schema<S: Serialize>(schema: S) -> Arc<serde_json::Map<String, serde_json::Value>> {
    match serde_json::to_value(schema).unwrap_or_default() {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

fn report_result(report: &ComplianceReport) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(report)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn parse_params<T: serde::de::DeserializeOwned>(
    request: &CallToolRequestParam,
    missing: &str,
) -> Result<T, McpError> {
    match &request.arguments {
        Some(args) => serde_json::from_value(serde_json::Value::Object(args.clone()))
            .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {}", e), None)),
        None => Err(McpError::invalid_params(missing.to_string(), None)),
    }
}

impl ServerHandler for RulegateServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Rulegate checks shell commands against compliance rules before they run. \
                Call 'check_commands' with the commands you intend to execute and only run the \
                ones listed in safe_plan. Use 'plan_and_check' to have the configured model \
                propose commands for a request and check them in one step."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: vec![self.check_tool(), self.plan_tool()],
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        match request.name.as_ref() {
            "check_commands" => {
                let params: CheckParams = parse_params(&request, "Missing 'commands' parameter")?;
                self.check_commands(params).await
            }
            "plan_and_check" => {
                let params: PlanParams = parse_params(&request, "Missing 'query' parameter")?;
                self.plan_and_check(params).await
            }
            _ => Err(McpError::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use rulegate::completion::StaticCompletion;
    use rulegate::{RuleItem, RuleKind, RuleStore};
    use tempfile::TempDir;

    use super::*;

    fn report_of(result: &CallToolResult) -> serde_json::Value {
        let value = serde_json::to_value(result).expect("serialize result");
        let text = value["content"][0]["text"].as_str().expect("text content");
        serde_json::from_str(text).expect("report json")
    }

    async fn server(dir: &TempDir, planner_output: &str) -> RulegateServer {
        let store = Arc::new(RuleStore::new(dir.path()));
        store
            .add_rule("policy", RuleKind::Forbidden, RuleItem::pattern("rm").unwrap())
            .await
            .unwrap();
        let orchestrator = Orchestrator::new(
            store,
            Arc::new(StaticCompletion::new(planner_output)),
            Duration::from_secs(5),
        );
        RulegateServer::new(Arc::new(orchestrator))
    }

    #[test]
    fn test_check_params() {
        let params: CheckParams =
            serde_json::from_str(r#"{"commands": ["ls", "rm -rf /"]}"#).expect("parse failed");
        assert_eq!(params.commands, vec!["ls", "rm -rf /"]);
        assert!(serde_json::from_str::<CheckParams>(r#"{"command": "ls"}"#).is_err());
    }

    #[tokio::test]
    async fn test_check_commands_tool() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, "").await;
        let result = server
            .check_commands(CheckParams {
                commands: vec!["rm -rf /".into(), "ls".into()],
            })
            .await
            .unwrap();

        let report = report_of(&result);
        assert_eq!(report["safe_plan"], serde_json::json!(["ls"]));
        assert_eq!(report["violations"][0]["rule"], "rm");
        assert_eq!(report["status"], "success");
    }

    #[tokio::test]
    async fn test_plan_and_check_tool() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, r#"{"Commands": ["rm notes.txt"]}"#).await;
        let result = server
            .plan_and_check(PlanParams {
                query: "delete my notes".into(),
            })
            .await
            .unwrap();

        let report = report_of(&result);
        assert_eq!(report["query"], "delete my notes");
        assert_eq!(report["status"], "violations_found");
    }

    #[tokio::test]
    async fn test_tools_have_object_schemas() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir, "").await;
        for tool in [server.check_tool(), server.plan_tool()] {
            assert_eq!(
                tool.input_schema.get("type"),
                Some(&serde_json::Value::String("object".into()))
            );
        }
    }
}
