//! Shared action executor for the role steps.
//!
//! Each role tolerates different failures: the engineer stops at the first
//! problem, the tech lead mostly takes notes. [`ExecutionPolicy`] captures that.

use std::fmt::Write as _;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::actions::Action;
use crate::core::types::StepOutcome;
use crate::io::workspace::{Capabilities, CommandRun};

pub const GIVE_UP_ERROR: &str = "agent gave up on the task";

/// What to do when an action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop and fail the step.
    Fail,
    /// Record the failure in the step output and continue.
    Note,
    /// Continue silently.
    Ignore,
}

/// Per-action failure handling for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    pub read: OnFailure,
    pub write: OnFailure,
    pub list: OnFailure,
    pub find: OnFailure,
    pub rejected_command: OnFailure,
    pub failed_command: OnFailure,
}

impl ExecutionPolicy {
    pub const ENGINEER: Self = Self {
        read: OnFailure::Fail,
        write: OnFailure::Fail,
        list: OnFailure::Fail,
        find: OnFailure::Fail,
        rejected_command: OnFailure::Fail,
        failed_command: OnFailure::Fail,
    };

    pub const MANAGER: Self = Self {
        read: OnFailure::Note,
        write: OnFailure::Fail,
        list: OnFailure::Note,
        find: OnFailure::Note,
        rejected_command: OnFailure::Fail,
        failed_command: OnFailure::Note,
    };

    pub const QA: Self = Self {
        read: OnFailure::Ignore,
        write: OnFailure::Fail,
        list: OnFailure::Note,
        find: OnFailure::Note,
        rejected_command: OnFailure::Fail,
        failed_command: OnFailure::Note,
    };

    pub const TECH_LEAD: Self = Self {
        read: OnFailure::Ignore,
        write: OnFailure::Note,
        list: OnFailure::Ignore,
        find: OnFailure::Ignore,
        rejected_command: OnFailure::Ignore,
        failed_command: OnFailure::Note,
    };
}

/// What a batch of actions did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub files_modified: Vec<String>,
    pub commands_executed: Vec<String>,
    pub output: String,
    /// Set when a failure stopped execution.
    pub failure: Option<String>,
    /// The failure is an explicit `GIVE_UP`.
    pub gave_up: bool,
}

impl Execution {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Fold into an outcome: failed when execution stopped, otherwise `message` succeeds.
    pub fn into_outcome(self, message: &str) -> StepOutcome {
        let (success, error) = match self.failure {
            Some(error) => (false, error),
            None => (true, String::new()),
        };
        StepOutcome {
            success,
            message: message.to_string(),
            error,
            files_modified: self.files_modified,
            commands_executed: self.commands_executed,
            output: self.output,
            next_steps: String::new(),
        }
    }

    fn note(&mut self, text: &str) {
        self.output.push_str(text);
        if !text.ends_with('\n') {
            self.output.push('\n');
        }
    }

    fn record_command(&mut self, run: &CommandRun) {
        self.commands_executed.push(run.command.clone());
        let _ = write!(self.output, "$ {}\n{}", run.command, run.output);
        if !run.output.is_empty() && !run.output.ends_with('\n') {
            self.output.push('\n');
        }
    }

    /// Apply `policy`; returns true when execution must stop.
    fn handle(&mut self, policy: OnFailure, error: String) -> bool {
        match policy {
            OnFailure::Fail => {
                self.failure = Some(error);
                true
            }
            OnFailure::Note => {
                self.note(&format!("warning: {error}"));
                false
            }
            OnFailure::Ignore => {
                debug!(%error, "ignored action failure");
                false
            }
        }
    }
}

/// Runs parsed actions against the workspace.
#[derive(Clone, Copy)]
pub struct StepExecutor<'a> {
    workspace: &'a dyn Capabilities,
    deadline: Instant,
}

impl<'a> StepExecutor<'a> {
    pub fn new(workspace: &'a dyn Capabilities, deadline: Instant) -> Self {
        Self {
            workspace,
            deadline,
        }
    }

    /// Execute `actions` in order. Stops at `GIVE_UP` or the first failure the policy marks fatal.
    pub fn execute(&self, actions: &[Action], policy: ExecutionPolicy) -> Execution {
        let mut exec = Execution::default();
        for action in actions {
            debug!(action = %action.label(), "executing action");
            let stop = match action {
                Action::GiveUp => {
                    info!("agent gave up");
                    exec.gave_up = true;
                    exec.failure = Some(GIVE_UP_ERROR.to_string());
                    true
                }
                Action::ReadFile { path } => match self.workspace.read_file(path) {
                    Ok(content) => {
                        exec.note(&format!("read {path} ({} bytes)", content.len()));
                        false
                    }
                    Err(e) => exec.handle(policy.read, format!("failed to read file {path}: {e:#}")),
                },
                Action::WriteFile { path, content } => {
                    match self.workspace.write_file(path, content) {
                        Ok(()) => {
                            exec.files_modified.push(path.clone());
                            false
                        }
                        Err(e) => exec
                            .handle(policy.write, format!("failed to write file {path}: {e:#}")),
                    }
                }
                Action::ListFiles { path } => match self.workspace.list_files(path) {
                    Ok(files) => {
                        exec.note(&listing(&format!("Files in {path}:"), &files));
                        false
                    }
                    Err(e) => {
                        exec.handle(policy.list, format!("failed to list files in {path}: {e:#}"))
                    }
                },
                Action::FindFiles {
                    pattern,
                    search_path,
                } => match self.workspace.find_files(pattern, search_path) {
                    Ok(files) => {
                        let header = format!("Files matching '{pattern}' in {search_path}:");
                        exec.note(&listing(&header, &files));
                        false
                    }
                    Err(e) => exec.handle(
                        policy.find,
                        format!("failed to find files matching '{pattern}' in {search_path}: {e:#}"),
                    ),
                },
                Action::ExecuteCommand { command } => {
                    self.execute_command(&mut exec, command, policy)
                }
            };
            if stop {
                break;
            }
        }
        exec
    }

    fn execute_command(&self, exec: &mut Execution, command: &str, policy: ExecutionPolicy) -> bool {
        if let Err(e) = self.workspace.validate_command(command) {
            return exec.handle(
                policy.rejected_command,
                format!("command validation failed: {e:#}"),
            );
        }
        match self.run(command) {
            Ok(run) => {
                exec.record_command(&run);
                if run.succeeded() {
                    false
                } else {
                    exec.handle(policy.failed_command, command_failure(&run))
                }
            }
            Err(e) => exec.handle(
                policy.failed_command,
                format!("command execution failed: {e:#}"),
            ),
        }
    }

    /// Run one command directly, outside any action batch.
    pub fn run(&self, command: &str) -> Result<CommandRun> {
        let run = self.workspace.execute_command(command, self.deadline)?;
        if !run.succeeded() {
            warn!(command, exit_code = ?run.exit_code, "command failed");
        }
        Ok(run)
    }

    /// Run `command` only when the policy allows it; `None` when it was rejected.
    pub fn run_if_allowed(&self, command: &str) -> Option<Result<CommandRun>> {
        match self.workspace.validate_command(command) {
            Ok(()) => Some(self.run(command)),
            Err(e) => {
                debug!(command, err = %e, "skipping command rejected by policy");
                None
            }
        }
    }
}

/// Error text for a command that exited non-zero.
pub fn command_failure(run: &CommandRun) -> String {
    match run.exit_code {
        Some(code) => format!("command execution failed: {} exited with status {code}", run.command),
        None => format!("command execution failed: {} was terminated", run.command),
    }
}

fn listing(header: &str, files: &[String]) -> String {
    let mut out = header.to_string();
    for file in files {
        out.push_str("\n  ");
        out.push_str(file);
    }
    out
}
