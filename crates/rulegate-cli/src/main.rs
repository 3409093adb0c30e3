//! Rulegate CLI - operator tool for compliance rules
//!
//! Usage:
//!   rulegate evaluate "restart the web tier"     Plan with the model and gate the plan
//!   rulegate check "rm -rf /tmp/x" "ls -la"      Gate the given commands
//!   rulegate extract [ops-policy] [--file f.txt] Extract rules from a document
//!   rulegate reparse ops-policy                  Re-parse the last raw model answer
//!   rulegate rules list|show|merged|add|remove|delete
//!
//! Results are printed as JSON on stdout. `evaluate` and `check` exit with 0
//! when something is safe to run (or nothing was planned), 2 when every
//! command was rejected and 1 when the model call failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rulegate::completion::StaticCompletion;
use rulegate::{
    ComplianceReport, DocumentSource, EngineArgs, EngineConfig, Extraction, RuleItem, RuleKind,
    RuleStore, Status, TextCompletion, document_id_for,
};

/// Rulegate - gate LLM-planned shell commands with document-derived rules
#[derive(Parser, Debug)]
#[command(name = "rulegate", version)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan a natural-language query with the model and gate the commands
    Evaluate {
        /// The request, e.g. "free up disk space"
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Use a captured planner answer from this file instead of calling the model
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Gate the given commands without planning
    Check {
        /// Commands to check, in order
        #[arg(required = true, num_args = 1..)]
        commands: Vec<String>,
    },
    /// Extract rules from a document and store them
    Extract {
        /// Document id (file name without extension in the documents directory).
        /// Defaults to the stem of --file.
        #[arg(required_unless_present = "file")]
        document_id: Option<String>,

        /// Read the document text from this file instead
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Re-parse the latest recorded model answer for a document
    Reparse {
        /// Document id
        document_id: String,
    },
    /// Inspect and edit stored rules
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Show the rules of every document
    List,
    /// Show one document's rules
    Show {
        /// Document id
        document_id: String,
    },
    /// Show the merged rules used for evaluation
    Merged,
    /// Add a rule to a document
    Add(RuleEditArgs),
    /// Remove a rule from a document
    Remove(RuleEditArgs),
    /// Delete a document's rule record
    Delete {
        /// Document id
        document_id: String,
    },
}

#[derive(clap::Args, Debug)]
struct RuleEditArgs {
    /// Document id
    document_id: String,

    /// allowed, forbidden or required
    rule_type: String,

    /// Pattern, or the trigger key when --detail is given
    value: String,

    /// Make a required keyed condition with this requirement text
    #[arg(long)]
    detail: Option<String>,
}

impl RuleEditArgs {
    fn to_rule(&self) -> anyhow::Result<(RuleKind, Option<RuleItem>)> {
        let kind: RuleKind = self.rule_type.parse()?;
        let item = match &self.detail {
            Some(detail) => RuleItem::condition(self.value.clone(), detail.clone()),
            None => RuleItem::pattern(&self.value),
        };
        Ok((kind, item))
    }
}

#[derive(Serialize)]
struct ExtractionOutput {
    document_id: String,
    rules: rulegate::RuleSet,
    raw_output: String,
    artifact: PathBuf,
}

impl ExtractionOutput {
    fn new(document_id: String, extraction: Extraction) -> Self {
        Self {
            document_id,
            rules: extraction.rules,
            raw_output: extraction.raw_output,
            artifact: extraction.artifact.path,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_exit(report: &ComplianceReport) -> anyhow::Result<ExitCode> {
    print_json(report)?;
    Ok(match report.status {
        Status::Success | Status::NoPlan => ExitCode::SUCCESS,
        Status::ViolationsFound => ExitCode::from(2),
        Status::Error => ExitCode::FAILURE,
    })
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config: EngineConfig = cli.engine.load()?;
    let store = Arc::new(config.rule_store());

    match cli.command {
        Command::Evaluate { query, replay } => {
            let completion: Arc<dyn TextCompletion> = match replay {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    Arc::new(StaticCompletion::new(raw))
                }
                None => config.completion.build(),
            };
            let orchestrator = config.orchestrator(store, completion);
            let report = orchestrator.run(&query.join(" ")).await;
            report_exit(&report)
        }
        Command::Check { commands } => {
            let orchestrator = config.orchestrator(store, config.completion.build());
            let report = orchestrator.check(&commands).await;
            report_exit(&report)
        }
        Command::Extract { document_id, file } => {
            let document_id = extract_target(document_id, file.as_deref())?;
            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => config.documents().text(&document_id).await?,
            };
            let extractor = config.extractor(store, config.completion.build());
            let extraction = extractor.extract_and_store(&document_id, &text).await?;
            print_json(&ExtractionOutput::new(document_id, extraction))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Reparse { document_id } => {
            let extractor = config.extractor(store, config.completion.build());
            let extraction = extractor.reparse(&document_id).await?;
            print_json(&ExtractionOutput::new(document_id, extraction))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Rules { action } => {
            run_rules(&store, action).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// The document id to extract into: the explicit one, or the file's stem.
fn extract_target(document_id: Option<String>, file: Option<&Path>) -> anyhow::Result<String> {
    if let Some(id) = document_id {
        return Ok(id);
    }
    file.and_then(document_id_for)
        .context("cannot derive a document id from the file name; pass one explicitly")
}

async fn run_rules(store: &RuleStore, action: RulesCommand) -> anyhow::Result<()> {
    match action {
        RulesCommand::List => print_json(&store.read_all().await),
        RulesCommand::Show { document_id } => print_json(&store.read(&document_id).await),
        RulesCommand::Merged => print_json(&store.merge_all().await),
        RulesCommand::Add(edit) => {
            let (kind, item) = edit.to_rule()?;
            if let Some(item) = item {
                store.add_rule(&edit.document_id, kind, item).await?;
            }
            print_json(&store.read(&edit.document_id).await)
        }
        RulesCommand::Remove(edit) => {
            let (kind, item) = edit.to_rule()?;
            if let Some(item) = item {
                store.delete_rule(&edit.document_id, kind, &item).await?;
            }
            print_json(&store.read(&edit.document_id).await)
        }
        RulesCommand::Delete { document_id } => {
            store.delete_document(&document_id).await?;
            print_json(&serde_json::json!({ "deleted": document_id }))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    run(Cli::parse()).await
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rules_add_condition() {
        let cli = Cli::try_parse_from([
            "rulegate",
            "--rules-dir",
            "/tmp/rules",
            "rules",
            "add",
            "ops",
            "required",
            "network_restart",
            "--detail",
            "admin approval required",
        ])
        .unwrap();

        let Command::Rules {
            action: RulesCommand::Add(edit),
        } = cli.command
        else {
            panic!("expected rules add");
        };
        let (kind, item) = edit.to_rule().unwrap();
        assert_eq!(kind, RuleKind::Required);
        assert_eq!(
            item,
            RuleItem::condition("network_restart", "admin approval required")
        );
    }

    #[test]
    fn test_parse_rejects_bad_rule_type() {
        let cli = Cli::try_parse_from(["rulegate", "rules", "add", "ops", "denied", "rm"]).unwrap();
        let Command::Rules {
            action: RulesCommand::Add(edit),
        } = cli.command
        else {
            panic!("expected rules add");
        };
        assert!(edit.to_rule().is_err());
    }

    #[test]
    fn test_extract_id_defaults_to_file_stem() {
        let cli =
            Cli::try_parse_from(["rulegate", "extract", "--file", "/tmp/ops-policy.txt"]).unwrap();
        let Command::Extract { document_id, file } = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(
            extract_target(document_id, file.as_deref()).unwrap(),
            "ops-policy"
        );

        assert_eq!(
            extract_target(Some("ops".into()), Some(Path::new("/tmp/x.txt"))).unwrap(),
            "ops"
        );
        assert!(extract_target(None, Some(Path::new("/tmp/.env"))).is_err());
        assert!(Cli::try_parse_from(["rulegate", "extract"]).is_err());
    }

    #[test]
    fn test_check_requires_commands() {
        assert!(Cli::try_parse_from(["rulegate", "check"]).is_err());
    }

    #[tokio::test]
    async fn test_replay_evaluation() {
        let dir = tempfile::TempDir::new().unwrap();
        let replay = dir.path().join("plan.json");
        std::fs::write(&replay, r#"{"Commands": ["ls -la"]}"#).unwrap();

        let cli = Cli::try_parse_from([
            "rulegate",
            "--rules-dir",
            dir.path().join("rules").to_str().unwrap(),
            "evaluate",
            "list",
            "files",
            "--replay",
            replay.to_str().unwrap(),
        ])
        .unwrap();
        assert!(run(cli).await.is_ok());
    }

    #[tokio::test]
    async fn test_rules_edit_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RuleStore::new(dir.path());
        let add = Cli::try_parse_from(["rulegate", "rules", "add", "ops", "forbidden", "Reboot"]).unwrap();
        let Command::Rules { action } = add.command else {
            panic!("expected rules command");
        };
        run_rules(&store, action).await.unwrap();
        assert_eq!(store.read("ops").await.forbidden, vec!["reboot"]);

        let remove =
            Cli::try_parse_from(["rulegate", "rules", "remove", "ops", "forbidden", "reboot"]).unwrap();
        let Command::Rules { action } = remove.command else {
            panic!("expected rules command");
        };
        run_rules(&store, action).await.unwrap();
        assert!(store.read("ops").await.is_empty());
    }
}
