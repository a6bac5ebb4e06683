//! Senior QA step: writes tests, then always runs the project's test command.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::actions::parse_actions;
use crate::core::classifier::is_test_file;
use crate::core::types::{Role, StepOutcome};
use crate::io::prompt::QaPrompt;

use super::executor::command_failure;
use super::{ExecutionPolicy, RoleStep, StepContext};

const NON_TESTABLE_MARKER: &str = "NON_TESTABLE:";

#[derive(Debug, Clone, Copy, Default)]
pub struct QaStep;

/// Reason from a `NON_TESTABLE:` line, if the reply has one.
fn non_testable_reason(reply: &str) -> Option<String> {
    reply.lines().find_map(|line| {
        line.trim().strip_prefix(NON_TESTABLE_MARKER).map(|reason| {
            let reason = reason.trim();
            if reason.is_empty() {
                "no reason given".to_string()
            } else {
                reason.to_string()
            }
        })
    })
}

fn fail(outcome: &mut StepOutcome, message: &str, error: String) {
    outcome.success = false;
    outcome.message = message.to_string();
    outcome.error = error;
}

impl RoleStep for QaStep {
    fn role(&self) -> Role {
        Role::Qa
    }

    #[instrument(skip_all, fields(role = %Role::Qa))]
    fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let test_command = ctx.config.test_command(ctx.project_type);
        let changed = ctx.changed_files();
        let prompt = ctx.prompts.qa(&QaPrompt {
            project_type: ctx.project_type.as_str(),
            test_command: &test_command,
            task: ctx.task,
            changed_files: &changed,
        })?;
        let reply = ctx.ask(Role::Qa, prompt)?;

        if let Some(reason) = non_testable_reason(&reply) {
            info!(%reason, "code reported as non-testable");
            let message = format!("non-testable code: {reason}");
            return Ok(StepOutcome::failed(message.clone(), message));
        }

        let executor = ctx.executor();
        let exec = executor.execute(&parse_actions(&reply), ExecutionPolicy::QA);
        if exec.failed() {
            return Ok(exec.into_outcome("QA failed"));
        }
        let wrote_tests = exec.files_modified.iter().any(|f| is_test_file(f));
        let mut outcome = exec.into_outcome("Tests implemented and passing");

        match executor.run_if_allowed(&test_command) {
            None => fail(
                &mut outcome,
                "Tests could not run",
                format!("test command rejected by policy: {test_command}"),
            ),
            Some(Err(e)) => fail(&mut outcome, "Tests failed", format!("test failed: {e:#}")),
            Some(Ok(run)) => {
                outcome.commands_executed.push(run.command.clone());
                outcome.output.push_str(&format!("\nTest Output:\n{}", run.output));
                if !run.succeeded() {
                    fail(
                        &mut outcome,
                        "Tests failed",
                        format!("test failed: {}", command_failure(&run)),
                    );
                }
            }
        }
        if outcome.success && !wrote_tests {
            fail(
                &mut outcome,
                "QA wrote no tests",
                "no test files written".to_string(),
            );
        }
        if outcome.success {
            info!(files = outcome.files_modified.len(), "tests passing");
        } else {
            warn!(error = %outcome.error, "qa step failed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routing::{Next, Router};
    use crate::test_support::{ScriptedLlm, StepHarness};

    fn route(outcome: &StepOutcome) -> Next {
        Router::builtin()
            .expect("router")
            .route(Role::Qa, outcome)
            .expect("route")
            .next
    }

    #[test]
    fn passing_tests_route_to_tech_lead() {
        let harness = StepHarness::new(ScriptedLlm::new().reply(
            "ACTION: WRITE_FILE\nPATH: handler_test.go\nCONTENT:\npackage main\n",
        ));
        let outcome = QaStep.run(&harness.ctx("task", "")).expect("run");
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.files_modified, vec!["handler_test.go"]);
        assert_eq!(outcome.commands_executed, vec!["ls"]);
        assert_eq!(route(&outcome), Next::Role(Role::TechLead));
    }

    #[test]
    fn failing_tests_route_to_engineer() {
        let mut harness = StepHarness::new(ScriptedLlm::new().reply(
            "ACTION: WRITE_FILE\nPATH: test_results.txt\nCONTENT:\nFAIL\n",
        ));
        harness.config.project.test_command = Some("grep -q PASS test_results.txt".to_string());
        let outcome = QaStep.run(&harness.ctx("task", "")).expect("run");
        assert!(!outcome.success);
        assert!(outcome.error.starts_with("test failed: command execution failed: grep"));
        assert_eq!(route(&outcome), Next::Role(Role::Engineer));
    }

    #[test]
    fn no_test_files_stays_in_qa() {
        let harness = StepHarness::new(
            ScriptedLlm::new().reply("ACTION: WRITE_FILE\nPATH: NOTES.md\nCONTENT:\nnothing\n"),
        );
        let outcome = QaStep.run(&harness.ctx("task", "")).expect("run");
        assert_eq!(outcome.error, "no test files written");
        assert_eq!(route(&outcome), Next::Role(Role::Qa));
    }

    #[test]
    fn non_testable_skips_tests_and_routes_to_tech_lead() {
        let harness = StepHarness::new(
            ScriptedLlm::new().reply("Only a config change.\nNON_TESTABLE: configuration only\n"),
        );
        let outcome = QaStep.run(&harness.ctx("task", "")).expect("run");
        assert_eq!(outcome.message, "non-testable code: configuration only");
        assert!(outcome.commands_executed.is_empty());
        assert_eq!(route(&outcome), Next::Role(Role::TechLead));
    }

    #[test]
    fn failed_write_fails_the_step() {
        let harness = StepHarness::new(
            ScriptedLlm::new().reply("ACTION: WRITE_FILE\nPATH: ../outside_test.go\nCONTENT:\nx\n"),
        );
        let outcome = QaStep.run(&harness.ctx("task", "")).expect("run");
        assert!(!outcome.success);
        assert!(outcome.error.contains("access denied"));
        assert!(outcome.commands_executed.is_empty());
    }

    #[test]
    fn marker_without_reason_still_counts() {
        assert_eq!(
            non_testable_reason("  NON_TESTABLE:   "),
            Some("no reason given".to_string())
        );
        assert_eq!(non_testable_reason("all good"), None);
    }
}
