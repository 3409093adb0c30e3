//! End-to-end tests for the compliance engine.
//!
//! These tests run the full pipeline with deterministic model fakes:
//! - Document text to stored rules
//! - Rule edits through the store
//! - Planning and evaluation against the merged rules

use std::sync::Arc;
use std::time::Duration;

use rulegate::completion::StaticCompletion;
use rulegate::rules::AuditLog;
use rulegate::{
    DirectoryDocuments, DocumentSource, Orchestrator, RuleExtractor, RuleItem, RuleKind, RuleSet,
    RuleStore, Status, Violation,
};
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    store: Arc<RuleStore>,
    audit: AuditLog,
    documents: DirectoryDocuments,
}

fn workspace() -> Workspace {
    let dir = TempDir::new().expect("tempdir");
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).expect("create uploads");
    Workspace {
        store: Arc::new(RuleStore::new(dir.path().join("rules"))),
        audit: AuditLog::new(dir.path().join("rules/raw")),
        documents: DirectoryDocuments::new(uploads),
        _dir: dir,
    }
}

fn write_document(ws: &Workspace, name: &str, text: &str) {
    std::fs::write(ws.documents.dir().join(name), text).expect("write document");
}

// =============================================================================
// Extraction
// =============================================================================

mod extraction {
    use super::*;

    #[tokio::test]
    async fn test_document_to_rules() {
        let ws = workspace();
        write_document(&ws, "ops-policy.txt", "Operators must never run rm -rf.");

        let model = Arc::new(StaticCompletion::new(
            "Here are the rules:\n```yaml\nallowed: []\nforbidden:\n  - rm -rf\n  - RM -RF \nrequired: []\n```",
        ));
        let extractor = RuleExtractor::new(model, ws.store.clone(), ws.audit.clone());

        let text = ws.documents.text("ops-policy").await.expect("document text");
        let extraction = extractor
            .extract_and_store("ops-policy", &text)
            .await
            .expect("extract");

        assert_eq!(extraction.rules.forbidden, vec!["rm -rf"]);
        assert_eq!(ws.store.read("ops-policy").await, extraction.rules);
        assert_eq!(ws.audit.list("ops-policy").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_re_extraction_overwrites_record() {
        let ws = workspace();
        let first = RuleExtractor::new(
            Arc::new(StaticCompletion::new("forbidden: [sudo]")),
            ws.store.clone(),
            ws.audit.clone(),
        );
        first.extract_and_store("policy", "v1").await.expect("first");

        let second = RuleExtractor::new(
            Arc::new(StaticCompletion::new("forbidden: [shutdown]")),
            ws.store.clone(),
            ws.audit.clone(),
        );
        second.extract_and_store("policy", "v2").await.expect("second");

        assert_eq!(ws.store.read("policy").await.forbidden, vec!["shutdown"]);
        assert_eq!(ws.audit.list("policy").await.expect("list").len(), 2);
    }
}

// =============================================================================
// Rule edits
// =============================================================================

mod rule_edits {
    use super::*;

    #[tokio::test]
    async fn test_add_then_delete_restores_record() {
        let ws = workspace();
        let mut initial = RuleSet::new();
        initial
            .insert(RuleKind::Allowed, RuleItem::pattern("ls").expect("pattern"))
            .expect("insert");
        ws.store.write("policy", &initial).await.expect("write");

        let item = RuleItem::condition("approval", "manager sign-off").expect("condition");
        assert!(ws.store.add_rule("policy", RuleKind::Required, item.clone()).await.expect("add"));
        assert!(!ws.store.add_rule("policy", RuleKind::Required, item.clone()).await.expect("re-add"));
        assert_eq!(ws.store.read("policy").await.required.len(), 1);

        assert!(ws.store.delete_rule("policy", RuleKind::Required, &item).await.expect("delete"));
        assert_eq!(ws.store.read("policy").await, initial);
    }

    #[tokio::test]
    async fn test_merge_across_documents() {
        let ws = workspace();
        ws.store
            .add_rule("a", RuleKind::Forbidden, RuleItem::pattern("rm").expect("pattern"))
            .await
            .expect("add a");
        ws.store
            .add_rule("b", RuleKind::Forbidden, RuleItem::pattern("rm").expect("pattern"))
            .await
            .expect("add b");
        ws.store
            .add_rule("b", RuleKind::Allowed, RuleItem::pattern("ls").expect("pattern"))
            .await
            .expect("add b allowed");

        let merged = ws.store.merge_all().await;
        assert_eq!(merged.forbidden, vec!["rm"]);
        assert_eq!(merged.allowed, vec!["ls"]);
    }
}

// =============================================================================
// Evaluation
// =============================================================================

mod evaluation {
    use super::*;

    #[tokio::test]
    async fn test_extracted_rules_gate_planned_commands() {
        let ws = workspace();
        let extractor = RuleExtractor::new(
            Arc::new(StaticCompletion::new(
                "allowed:\n  - ls\n  - systemctl\nforbidden:\n  - rm\nrequired:\n  - network_restart: admin approval required\n",
            )),
            ws.store.clone(),
            ws.audit.clone(),
        );
        extractor
            .extract_and_store("network", "Restarting the network needs approval.")
            .await
            .expect("extract");

        let planner = Arc::new(StaticCompletion::new(
            r#"{"Commands": ["systemctl network_restart", "rm -rf /var/log", "ls network_restart", "whoami network_restart", "ls -la"]}"#,
        ));
        let orch = Orchestrator::new(ws.store.clone(), planner, Duration::from_secs(5));
        let report = orch.run("restart networking and tidy up").await;

        assert_eq!(
            report.safe_plan,
            vec!["systemctl network_restart", "ls network_restart"]
        );
        assert_eq!(
            report.violations,
            vec![
                Violation::new("rm -rf /var/log", "rm"),
                Violation::new("whoami network_restart", "not allowed"),
                Violation::new("ls -la", "missing required: network_restart"),
            ]
        );
        assert_eq!(report.status, Status::Success);
    }

    #[tokio::test]
    async fn test_everything_rejected() {
        let ws = workspace();
        ws.store
            .add_rule("policy", RuleKind::Forbidden, RuleItem::pattern("rm").expect("pattern"))
            .await
            .expect("add");

        let orch = Orchestrator::new(
            ws.store.clone(),
            Arc::new(StaticCompletion::new(r#"{"Commands": ["rm -rf /"]}"#)),
            Duration::from_secs(5),
        );
        let report = orch.run("wipe the disk").await;
        assert!(report.safe_plan.is_empty());
        assert_eq!(report.status, Status::ViolationsFound);
    }
}
