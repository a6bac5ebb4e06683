//! Senior engineer step: implements the brief with its own retry loop.
//!
//! Each attempt asks the model for actions, executes them strictly and then
//! builds the project. Failures are classified and fed into the next attempt.
//! The loop stops early when the same error category keeps coming back.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::actions::parse_actions;
use crate::core::budget::remaining_budget;
use crate::core::classifier::{Classification, ErrorCategory, ErrorClassifier};
use crate::core::types::{Role, StepOutcome};
use crate::io::prompt::EngineerPrompt;

use super::executor::command_failure;
use super::{ExecutionPolicy, RoleStep, StepContext};

const SUCCESS_MESSAGE: &str = "Feature implemented successfully";

pub struct EngineerStep {
    max_attempts: u32,
    max_same_category: u32,
    classifier: ErrorClassifier,
}

impl EngineerStep {
    pub fn new(max_attempts: u32, max_same_category: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_same_category: max_same_category.max(1),
            classifier: ErrorClassifier::new(),
        }
    }

    /// One attempt: actions, then the build.
    /// Run one reply's actions and the build. The flag is set when the
    /// engineer gave up, which ends the step without another attempt.
    fn attempt(&self, ctx: &StepContext<'_>, reply: &str) -> (StepOutcome, bool) {
        let executor = ctx.executor();
        let exec = executor.execute(&parse_actions(reply), ExecutionPolicy::ENGINEER);
        if exec.failed() {
            let gave_up = exec.gave_up;
            return (exec.into_outcome("Implementation attempt failed"), gave_up);
        }
        let mut outcome = exec.into_outcome(SUCCESS_MESSAGE);

        let build = ctx.config.build_command(ctx.project_type);
        match executor.run_if_allowed(&build) {
            None => {}
            Some(Ok(run)) => {
                outcome.commands_executed.push(run.command.clone());
                outcome.output.push_str(&format!("\nBuild Output:\n{}", run.output));
                if !run.succeeded() {
                    outcome.success = false;
                    outcome.message = "Build failed".to_string();
                    outcome.error = format!("build failed: {}", command_failure(&run));
                }
            }
            Some(Err(e)) => {
                outcome.success = false;
                outcome.message = "Build failed".to_string();
                outcome.error = format!("build failed: {e:#}");
            }
        }
        (outcome, false)
    }
}

/// Consecutive failures in one category.
#[derive(Debug, Default)]
struct Streak {
    category: Option<ErrorCategory>,
    count: u32,
}

impl Streak {
    fn record(&mut self, category: ErrorCategory) -> u32 {
        if self.category == Some(category) {
            self.count += 1;
        } else {
            self.category = Some(category);
            self.count = 1;
        }
        self.count
    }
}

impl RoleStep for EngineerStep {
    fn role(&self) -> Role {
        Role::Engineer
    }

    #[instrument(skip_all, fields(role = %Role::Engineer, max_attempts = self.max_attempts))]
    fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let build_command = ctx.config.build_command(ctx.project_type);
        let mut last_error = ctx.feedback.to_string();
        let mut last_class: Option<Classification> = None;
        let mut streak = Streak::default();
        let mut last_outcome = StepOutcome::default();

        for attempt in 1..=self.max_attempts {
            remaining_budget(ctx.deadline)?;
            let hints = last_class.as_ref().map_or(&[][..], |c| c.hints.as_slice());
            let category = last_class.as_ref().map_or("", |c| c.category.as_str());
            let prompt = ctx.prompts.engineer(&EngineerPrompt {
                project_type: ctx.project_type.as_str(),
                build_command: &build_command,
                task: ctx.task,
                attempt,
                max_attempts: self.max_attempts,
                last_error: &last_error,
                category,
                hints,
            })?;
            let reply = ctx.ask(Role::Engineer, prompt)?;

            let (outcome, gave_up) = self.attempt(ctx, &reply);
            if outcome.success {
                info!(attempt, files = outcome.files_modified.len(), "implementation succeeded");
                return Ok(outcome);
            }
            if gave_up {
                info!(attempt, "engineer gave up");
                return Ok(outcome);
            }

            let class = self.classifier.classify_outcome(&outcome);
            let same = streak.record(class.category);
            warn!(
                attempt,
                category = class.category.as_str(),
                same_category = same,
                "implementation attempt failed"
            );
            if same >= self.max_same_category {
                let mut stuck = outcome;
                stuck.error = format!(
                    "stuck on '{}' error after {same} attempts (total attempts: {attempt}): {}",
                    class.category.as_str(),
                    stuck.error
                );
                return Ok(stuck);
            }
            debug!(hints = ?class.hints, "retrying with classifier hints");
            last_error = outcome.error.clone();
            last_class = Some(class);
            last_outcome = outcome;
        }

        last_outcome.error = format!(
            "failed after {} attempts. Last error: {}",
            self.max_attempts, last_outcome.error
        );
        Ok(last_outcome)
    }
}
