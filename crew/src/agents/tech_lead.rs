//! Senior tech lead step: final review before the workflow completes.
//!
//! The review applies the project's auto-fix commands, then runs the
//! registered [`ReviewCheck`]s. A check (or the model itself) can send the
//! work back to planning with a structured [`Rejection`].

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::actions::parse_actions;
use crate::core::brief::Brief;
use crate::core::classifier::is_test_file;
use crate::core::rejection::{Rejection, RejectionReason};
use crate::core::types::{Role, StepOutcome};
use crate::io::prompt::TechLeadPrompt;

use super::executor::command_failure;
use super::{ExecutionPolicy, RoleStep, StepContext};

const APPROVED_MESSAGE: &str = "Code review passed";

/// What a review check gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ReviewInput<'a> {
    pub task: &'a str,
    pub changed_files: &'a [String],
    pub diff: &'a str,
}

/// A policy check run after the model's review. `Some` sends the work back to planning.
pub trait ReviewCheck {
    fn name(&self) -> &'static str;

    fn check(&self, input: &ReviewInput<'_>) -> Option<Rejection>;
}

/// Rejects a brief with a `TASK:` when nothing but tests (or notes) changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementsCheck;

impl ReviewCheck for RequirementsCheck {
    fn name(&self) -> &'static str {
        "requirements"
    }

    fn check(&self, input: &ReviewInput<'_>) -> Option<Rejection> {
        let brief = Brief::parse(input.task);
        if !brief.has_task() {
            return None;
        }
        let implemented = input
            .changed_files
            .iter()
            .any(|f| !is_test_file(f) && !f.ends_with("AGENTS.md"));
        if implemented {
            return None;
        }
        Some(Rejection::new(
            RejectionReason::RequirementsNotMet,
            vec![format!("Core task not completed: {}", brief.task)],
        ))
    }
}

pub struct TechLeadStep {
    checks: Vec<Box<dyn ReviewCheck>>,
}

impl TechLeadStep {
    pub fn new(checks: Vec<Box<dyn ReviewCheck>>) -> Self {
        Self { checks }
    }
}

/// True when the reply carries `DECISION: needs_revision`.
fn needs_revision(reply: &str) -> bool {
    reply.lines().any(|line| {
        let line = line.trim().to_ascii_lowercase();
        line.strip_prefix("decision:")
            .is_some_and(|value| value.trim() == "needs_revision")
    })
}

/// Bullet points of a review reply, outside any rejection block.
fn review_issues(reply: &str) -> String {
    let issues: Vec<&str> = reply
        .lines()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .map(str::trim)
        .filter(|issue| !issue.is_empty())
        .collect();
    if issues.is_empty() {
        "review requested revisions".to_string()
    } else {
        format!("review requested revisions: {}", issues.join("; "))
    }
}

impl RoleStep for TechLeadStep {
    fn role(&self) -> Role {
        Role::TechLead
    }

    #[instrument(skip_all, fields(role = %Role::TechLead, checks = self.checks.len()))]
    fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let changed = ctx.changed_files();
        let diff = ctx.workspace.git_diff().unwrap_or_else(|e| {
            debug!(err = %e, "no diff for review");
            String::new()
        });
        let prompt = ctx.prompts.tech_lead(&TechLeadPrompt {
            project_type: ctx.project_type.as_str(),
            task: ctx.task,
            changed_files: &changed,
            diff: &diff,
        })?;
        let reply = ctx.ask(Role::TechLead, prompt)?;

        let executor = ctx.executor();
        let exec = executor.execute(&parse_actions(&reply), ExecutionPolicy::TECH_LEAD);
        if exec.failed() {
            return Ok(exec.into_outcome("Review abandoned"));
        }
        let mut outcome = exec.into_outcome(APPROVED_MESSAGE);

        for command in ctx.config.auto_fix_commands(ctx.project_type) {
            match executor.run_if_allowed(&command) {
                None => {}
                Some(Ok(run)) => {
                    outcome.commands_executed.push(run.command.clone());
                    outcome
                        .output
                        .push_str(&format!("\n=== Auto-fix: {command} ===\n{}", run.output));
                    if !run.succeeded() {
                        outcome
                            .output
                            .push_str(&format!("\nauto-fix warning: {}\n", command_failure(&run)));
                    }
                }
                Some(Err(e)) => {
                    warn!(%command, err = %format!("{e:#}"), "auto-fix command failed");
                    outcome
                        .output
                        .push_str(&format!("\nauto-fix warning: {command}: {e:#}\n"));
                }
            }
        }

        let input = ReviewInput {
            task: ctx.task,
            changed_files: &changed,
            diff: &diff,
        };
        let rejection = self
            .checks
            .iter()
            .find_map(|check| {
                let found = check.check(&input);
                if found.is_some() {
                    info!(check = check.name(), "review check rejected the change");
                }
                found
            })
            .or_else(|| Rejection::parse(&reply));
        if let Some(rejection) = rejection {
            warn!(reason = %rejection.reason, "review rejected");
            outcome.success = false;
            outcome.message = format!("Review rejected: {}", rejection.reason);
            outcome.error = rejection.render();
            return Ok(outcome);
        }

        if needs_revision(&reply) {
            outcome.success = false;
            outcome.message = "Review requested revisions".to_string();
            outcome.error = review_issues(&reply);
            warn!(error = %outcome.error, "review requested revisions");
            return Ok(outcome);
        }

        info!(files = changed.len(), "review approved");
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
            .route(Role::TechLead, outcome)
            .expect("route")
            .next
    }

    fn standard() -> TechLeadStep {
        TechLeadStep::new(vec![Box::new(RequirementsCheck)])
    }

    #[test]
    fn approval_completes_the_workflow() {
        let mut harness = StepHarness::new(ScriptedLlm::new().reply("Looks good.\nDECISION: approved"));
        harness.changed = vec!["main.go".to_string(), "main_test.go".to_string()];
        let outcome = standard()
            .run(&harness.ctx("TASK: add /health", ""))
            .expect("run");

        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.message, APPROVED_MESSAGE);
        assert_eq!(outcome.commands_executed, vec!["ls"]);
        assert!(outcome.output.contains("=== Auto-fix: ls ==="));
        assert!(harness.llm.prompts()[0].contains("- main.go"));
        assert_eq!(route(&outcome), Next::Complete);
    }

    #[test]
    fn requirements_check_rejects_test_only_changes() {
        let mut harness = StepHarness::new(ScriptedLlm::new().reply("DECISION: approved"));
        harness.changed = vec!["main_test.go".to_string()];
        let outcome = standard()
            .run(&harness.ctx("TASK: add /health", ""))
            .expect("run");

        assert!(!outcome.success);
        assert!(outcome.error.starts_with("REJECTION_REASON: requirements_not_met"));
        assert!(outcome.error.contains("- Core task not completed: add /health"));
        assert_eq!(route(&outcome), Next::Role(Role::Manager));
    }

    #[test]
    fn reply_rejection_is_rendered_as_error() {
        let mut harness = StepHarness::new(ScriptedLlm::new().reply(
            "REJECTION_REASON: security_concerns\nSPECIFIC_ISSUES:\n- token in config.go\nROUTE_TO: engineering_manager",
        ));
        harness.changed = vec!["config.go".to_string()];
        let outcome = standard()
            .run(&harness.ctx("TASK: wire config", ""))
            .expect("run");

        assert_eq!(outcome.message, "Review rejected: security_concerns");
        assert!(outcome.error.contains("- token in config.go"));
        assert!(outcome.error.ends_with("ROUTE_TO: engineering_manager"));
        assert_eq!(route(&outcome), Next::Role(Role::Manager));
    }

    #[test]
    fn needs_revision_collects_issues() {
        let mut harness = StepHarness::new(ScriptedLlm::new().reply(
            "- lint errors in handler.go\n- unused import\nDECISION: needs_revision",
        ));
        harness.changed = vec!["handler.go".to_string()];
        let outcome = standard().run(&harness.ctx("task", "")).expect("run");

        assert!(!outcome.success);
        assert_eq!(
            outcome.error,
            "review requested revisions: lint errors in handler.go; unused import"
        );
        assert_eq!(route(&outcome), Next::Role(Role::Engineer));
    }

    #[test]
    fn without_checks_an_empty_change_set_passes() {
        let harness = StepHarness::new(ScriptedLlm::new().reply("DECISION: approved"));
        let outcome = TechLeadStep::new(Vec::new())
            .run(&harness.ctx("TASK: add /health", ""))
            .expect("run");
        assert!(outcome.success);
    }

    #[test]
    fn failing_auto_fix_is_only_noted() {
        let mut harness = StepHarness::new(ScriptedLlm::new().reply("DECISION: approved"));
        harness.config.project.auto_fix_commands = Some(vec!["ls no-such-dir".to_string()]);
        harness.changed = vec!["main.go".to_string()];
        let outcome = standard().run(&harness.ctx("task", "")).expect("run");
        assert!(outcome.success);
        assert!(outcome.output.contains("auto-fix warning: command execution failed: ls no-such-dir"));
    }

    #[test]
    fn requirements_check_ignores_briefs_without_task() {
        let input = ReviewInput {
            task: "fix the flaky test",
            changed_files: &[],
            diff: "",
        };
        assert!(RequirementsCheck.check(&input).is_none());
    }

    #[test]
    fn decision_parsing_is_case_insensitive() {
        assert!(needs_revision("Decision: NEEDS_REVISION"));
        assert!(!needs_revision("DECISION: approved"));
    }
}
