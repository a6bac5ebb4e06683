//! End-to-end workflow tests with the real role steps and a scripted model.
//!
//! Each test scripts the model's replies in invocation order and runs the
//! standard crew against a temporary workspace whose toolchain commands are
//! all `ls`.

use crew::core::types::{FailureReason, ProjectType, Role};
use crew::test_support::{ScriptedLlm, test_config};
use crew::workflow::{COMPLETE_PHASE, execute_workflow};

const PLAN: &str = "Inspected the layout.\nTASK: Add /health endpoint\nFILES_TO_EXAMINE: main.go\n";
const IMPLEMENT: &str =
    "ACTION: WRITE_FILE\nPATH: main.go\nCONTENT:\npackage main\n\nfunc health() string { return \"ok\" }\n";
const TEST: &str = "ACTION: WRITE_FILE\nPATH: main_test.go\nCONTENT:\npackage main\n";
const APPROVE: &str = "Handler is small and tested.\nDECISION: approved";

/// Full pass: plan → implement → test → review → knowledge update.
#[test]
fn standard_crew_completes_a_task() {
    let temp = tempfile::tempdir().expect("tempdir");
    let llm = ScriptedLlm::new()
        .reply(PLAN)
        .reply(IMPLEMENT)
        .reply(TEST)
        .reply(APPROVE)
        .reply("# Agent Knowledge Base\n\n- /health lives in main.go\n");

    let result = execute_workflow(
        "add a health endpoint",
        ProjectType::Go,
        temp.path(),
        &test_config(),
        &llm,
    )
    .expect("workflow");

    assert!(result.success, "{result:#?}");
    assert_eq!(result.completed_phases.last().map(String::as_str), Some(COMPLETE_PHASE));
    assert_eq!(
        result.files_modified,
        vec!["agents/AGENTS.md", "main.go", "main_test.go"]
    );
    assert_eq!(result.tests_added, vec!["main_test.go"]);
    assert_eq!(result.quality_checks, vec!["ls"]);
    assert_eq!(result.transitions.len(), 3);

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 5);
    assert!(prompts[0].contains("add a health endpoint"));
    assert!(prompts[1].contains("Add /health endpoint"));
    assert!(prompts[3].contains("main.go"));

    let knowledge =
        std::fs::read_to_string(temp.path().join("agents/AGENTS.md")).expect("knowledge file");
    assert!(knowledge.contains("/health lives in main.go"));
    assert!(temp.path().join("main_test.go").exists());
}

/// A structured rejection sends the work back to planning with the issues attached.
#[test]
fn review_rejection_replans_and_then_completes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let llm = ScriptedLlm::new()
        .reply(PLAN)
        .reply(IMPLEMENT)
        .reply(TEST)
        .reply(
            "REJECTION_REASON: security_concerns\nSPECIFIC_ISSUES:\n- handler leaks the build token\nROUTE_TO: engineering_manager",
        )
        .reply("TASK: Remove the token from the /health response\n")
        .reply(IMPLEMENT)
        .reply(TEST)
        .reply(APPROVE)
        .reply("# Agent Knowledge Base\n");
    let mut cfg = test_config();
    cfg.workflow.max_total_iterations = 20;

    let result =
        execute_workflow("add a health endpoint", ProjectType::Go, temp.path(), &cfg, &llm)
            .expect("workflow");

    assert!(result.success, "{result:#?}");
    let back = &result.transitions[3];
    assert_eq!((back.from, back.to), (Role::TechLead, Role::Manager));
    assert_eq!(result.agent_summaries[&Role::Manager].invocations, 2);
    assert_eq!(result.agent_summaries[&Role::TechLead].invocations, 2);

    let prompts = llm.prompts();
    assert!(prompts[4].contains("handler leaks the build token"));
    assert!(prompts[5].contains("Remove the token from the /health response"));
}

/// Untestable changes skip the test run and still reach review.
#[test]
fn non_testable_change_goes_straight_to_review() {
    let temp = tempfile::tempdir().expect("tempdir");
    let llm = ScriptedLlm::new()
        .reply(PLAN)
        .reply(IMPLEMENT)
        .reply("Only wiring changed.\nNON_TESTABLE: configuration only\n")
        .reply(APPROVE)
        .reply("# Agent Knowledge Base\n");

    let result = execute_workflow(
        "add a health endpoint",
        ProjectType::Go,
        temp.path(),
        &test_config(),
        &llm,
    )
    .expect("workflow");

    assert!(result.success, "{result:#?}");
    assert!(result.tests_added.is_empty());
    let qa = &result.agent_summaries[&Role::Qa];
    assert!(!qa.success);
    assert_eq!(qa.task_completed, "non-testable code: configuration only");
    let review = &result.transitions[2];
    assert_eq!((review.from, review.to), (Role::Qa, Role::TechLead));
}

/// A model that cannot be reached is retried, then the run fails.
#[test]
fn unreachable_model_fails_after_recoveries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut llm = ScriptedLlm::new();
    for _ in 0..3 {
        llm = llm.error("llm connection failed: connection refused");
    }
    let mut cfg = test_config();
    cfg.workflow.max_error_recoveries = 2;

    let result = execute_workflow("add a health endpoint", ProjectType::Go, temp.path(), &cfg, &llm)
        .expect("workflow");

    assert!(!result.success);
    assert_eq!(result.failure_reason, Some(FailureReason::ConnectionFailed));
    assert_eq!(llm.prompts().len(), 3);
    assert!(result.agent_summaries.is_empty());
}
