//! Workflow controller: runs role steps until the tech lead approves or the
//! workflow fails.
//!
//! Each iteration checks the time and iteration budgets, invokes the current
//! role, merges its outcome, checks health and routes to the next role.
//! Invocation errors go through the recovery table instead of the router.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::{Crew, StepContext};
use crate::core::budget::remaining_budget;
use crate::core::health::check_health;
use crate::core::recovery::{Recovery, categorize_failure, recover};
use crate::core::routing::{Next, Router};
use crate::core::types::{FailureReason, ProjectType, Role, StepOutcome, Transition};
use crate::io::config::CrewConfig;
use crate::io::llm::LlmClient;
use crate::io::prompt::PromptBuilder;
use crate::io::transcript::{RecordingLlm, TranscriptWriter};
use crate::io::workspace::{Capabilities, Workspace};

pub const COMPLETE_PHASE: &str = "workflow_complete";

/// Per-role summary in the final result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    pub task_completed: String,
    pub files_changed: Vec<String>,
    /// Times the step ran.
    pub invocations: u32,
    /// Controller iterations counted against the role.
    pub iterations: u32,
    pub success: bool,
}

/// Aggregate result of one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowResult {
    pub run_id: String,
    pub success: bool,
    pub completed_phases: Vec<String>,
    pub files_modified: Vec<String>,
    pub tests_added: Vec<String>,
    pub quality_checks: Vec<String>,
    pub output: String,
    pub agent_summaries: BTreeMap<Role, AgentSummary>,
    pub transitions: Vec<Transition>,
    pub next_steps: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl WorkflowResult {
    fn fail(&mut self, reason: FailureReason, error: String) {
        warn!(reason = %reason, %error, "workflow failed");
        self.success = false;
        self.failure_reason = Some(reason);
        self.error = error;
    }

    /// Fold one step outcome into the aggregate.
    fn merge(&mut self, role: Role, outcome: &StepOutcome) {
        let summary = self.agent_summaries.entry(role).or_default();
        summary.task_completed = outcome.message.clone();
        summary.files_changed = outcome.files_modified.clone();
        summary.invocations += 1;
        summary.success = outcome.success;

        self.files_modified
            .extend(outcome.files_modified.iter().cloned());
        if !outcome.output.is_empty() {
            self.output
                .push_str(&format!("\n=== {role} Output ===\n{}", outcome.output));
        }
        self.completed_phases.push(role.as_str().to_string());
        match role {
            Role::Qa => self
                .tests_added
                .extend(outcome.files_modified.iter().cloned()),
            Role::TechLead => self
                .quality_checks
                .extend(outcome.commands_executed.iter().cloned()),
            Role::Manager | Role::Engineer => {}
        }
    }
}

/// Project instructions appended to every task description.
#[derive(Debug, Clone, Default)]
struct ProjectContext {
    claude_md: Option<String>,
    agents_md: Option<String>,
}

impl ProjectContext {
    fn gather(workspace: &dyn Capabilities) -> Self {
        let read = |path: &str| match workspace.read_file(path) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!(path, err = %e, "project instructions not loaded");
                None
            }
        };
        Self {
            claude_md: read("CLAUDE.md"),
            agents_md: read("AGENTS.md"),
        }
    }

    fn decorate(&self, task: &str) -> String {
        let mut out = task.to_string();
        if let Some(text) = &self.claude_md {
            out.push_str("\n\nProject Instructions (CLAUDE.md):\n");
            out.push_str(text);
        }
        if let Some(text) = &self.agents_md {
            out.push_str("\n\nAgent Instructions (AGENTS.md):\n");
            out.push_str(text);
        }
        out
    }
}

/// Mutable state owned by one run.
#[derive(Debug)]
struct WorkflowState {
    current: Role,
    iterations: BTreeMap<Role, u32>,
    history: Vec<Transition>,
    task: String,
    /// Error text of the previous step when it failed.
    feedback: String,
    recoveries: u32,
}

impl WorkflowState {
    fn new(description: &str) -> Self {
        Self {
            current: Role::Manager,
            iterations: BTreeMap::new(),
            history: Vec::new(),
            task: description.to_string(),
            feedback: String::new(),
            recoveries: 0,
        }
    }

    fn iterations_for(&self, role: Role) -> u32 {
        self.iterations.get(&role).copied().unwrap_or(0)
    }

    fn transition(&mut self, to: Role, reason: String) {
        info!(from = %self.current, to = %to, %reason, "transition");
        self.history.push(Transition::now(self.current, to, reason));
        self.current = to;
    }
}

/// Everything a run needs, borrowed from the caller.
pub struct Workflow<'a> {
    crew: &'a Crew,
    router: &'a Router,
    llm: &'a dyn LlmClient,
    workspace: &'a dyn Capabilities,
    config: &'a CrewConfig,
    prompts: PromptBuilder,
}

impl<'a> Workflow<'a> {
    pub fn new(
        crew: &'a Crew,
        router: &'a Router,
        llm: &'a dyn LlmClient,
        workspace: &'a dyn Capabilities,
        config: &'a CrewConfig,
    ) -> Self {
        Self {
            crew,
            router,
            llm,
            workspace,
            config,
            prompts: PromptBuilder::new(config.llm.prompt_budget_bytes),
        }
    }

    /// Run the workflow for `description`. Failures are reported in the result.
    #[instrument(skip_all, fields(project_type = %project_type))]
    pub fn run(&self, description: &str, project_type: ProjectType) -> WorkflowResult {
        let started = Instant::now();
        let deadline = started + self.config.workflow_timeout();
        let context = ProjectContext::gather(self.workspace);
        let mut state = WorkflowState::new(description);
        let mut result = WorkflowResult {
            run_id: new_run_id(),
            success: true,
            ..WorkflowResult::default()
        };
        let transcripts = self.config.transcripts.enabled.then(|| {
            TranscriptWriter::new(
                self.workspace.workdir(),
                &self.config.transcripts.dir,
                &result.run_id,
            )
        });
        info!(run_id = %result.run_id, "workflow started");

        let mut seq = 0u32;
        loop {
            if remaining_budget(deadline).is_err() {
                result.fail(FailureReason::Timeout, "Workflow timeout exceeded".to_string());
                break;
            }
            if let Err(e) = self.check_iteration_limits(&state) {
                result.fail(FailureReason::IterationLimitExceeded, e.to_string());
                break;
            }

            let role = state.current;
            seq += 1;
            let task = context.decorate(&state.task);
            let inv = Invocation {
                role,
                seq,
                task: &task,
                feedback: &state.feedback,
                project_type,
                deadline,
            };
            let outcome = match self.invoke(&inv, &result.files_modified, transcripts.as_ref()) {
                Ok(outcome) => outcome,
                Err(err) => {
                    let text = format!("{err:#}");
                    warn!(%role, error = %text, "step invocation failed");
                    match recover(&text, role) {
                        Recovery::Resume { next, reason }
                            if state.recoveries < self.config.workflow.max_error_recoveries =>
                        {
                            state.recoveries += 1;
                            state.transition(next, format!("Error recovery: {reason}"));
                            state.feedback = text;
                            continue;
                        }
                        Recovery::Resume { .. } => {
                            result.fail(
                                categorize_failure(&text),
                                format!("Agent execution failed: {text}"),
                            );
                        }
                        Recovery::Fail(reason) => {
                            result.fail(reason, format!("Agent execution failed: {text}"));
                        }
                    }
                    break;
                }
            };

            result.merge(role, &outcome);

            if let Err(e) = check_health(&state.history) {
                result.fail(
                    FailureReason::WorkflowHealthFailed,
                    format!("Workflow health check failed: {e}"),
                );
                break;
            }
            if role == Role::TechLead && outcome.success {
                result.completed_phases.push(COMPLETE_PHASE.to_string());
                break;
            }

            let decision = match self.router.route(role, &outcome) {
                Ok(decision) => decision,
                Err(e) => {
                    result.fail(FailureReason::RoutingFailed, format!("Routing failed: {e}"));
                    break;
                }
            };
            let Next::Role(next) = decision.next else {
                result.completed_phases.push(COMPLETE_PHASE.to_string());
                break;
            };
            *state.iterations.entry(role).or_default() += 1;
            state.transition(next, decision.reason);
            state.feedback = if outcome.success {
                String::new()
            } else {
                outcome.error.clone()
            };
            if !outcome.next_steps.is_empty() {
                state.task = outcome.next_steps;
            }
        }

        finalize(&mut result, &state, started);
        if result.success {
            self.document(&result, &context.decorate(description), project_type, deadline);
        }
        info!(
            success = result.success,
            transitions = result.transitions.len(),
            "workflow finished"
        );
        result
    }

    fn check_iteration_limits(&self, state: &WorkflowState) -> Result<()> {
        let total: u32 = state.iterations.values().sum();
        let max_total = self.config.workflow.max_total_iterations;
        if total >= max_total {
            return Err(anyhow!("maximum total iterations ({max_total}) exceeded"));
        }
        let max_role = self.config.max_iterations_for(state.current);
        if state.iterations_for(state.current) >= max_role {
            return Err(anyhow!(
                "maximum iterations for agent {} ({max_role}) exceeded",
                state.current
            ));
        }
        Ok(())
    }

    fn invoke(
        &self,
        inv: &Invocation<'_>,
        changed: &[String],
        transcripts: Option<&TranscriptWriter>,
    ) -> Result<StepOutcome> {
        let recorder = RecordingLlm::new(self.llm);
        let llm: &dyn LlmClient = if transcripts.is_some() {
            &recorder
        } else {
            self.llm
        };
        let ctx = StepContext {
            task: inv.task,
            feedback: inv.feedback,
            changed,
            project_type: inv.project_type,
            deadline: inv.deadline,
            workspace: self.workspace,
            llm,
            prompts: &self.prompts,
            config: self.config,
        };
        debug!(role = %inv.role, seq = inv.seq, "invoking step");
        let result = match self.crew.step(inv.role) {
            Some(step) => step.run(&ctx),
            None => Err(anyhow!("agent {} not registered", inv.role)),
        };
        if let Some(writer) = transcripts {
            match writer.write_step(inv.seq, inv.role, &recorder.take(), &result) {
                Ok(path) => debug!(path = %path.display(), "transcript written"),
                Err(e) => warn!(err = %format!("{e:#}"), "could not write transcript"),
            }
        }
        result
    }

    /// Best-effort knowledge update after a completed run.
    fn document(
        &self,
        result: &WorkflowResult,
        task: &str,
        project_type: ProjectType,
        deadline: Instant,
    ) {
        let Some(manager) = self.crew.step(Role::Manager) else {
            return;
        };
        let ctx = StepContext {
            task,
            feedback: "",
            changed: &result.files_modified,
            project_type,
            deadline,
            workspace: self.workspace,
            llm: self.llm,
            prompts: &self.prompts,
            config: self.config,
        };
        if let Err(e) = manager.document_outcome(result, &ctx) {
            warn!(err = %format!("{e:#}"), "manager failed to document the task");
        }
    }
}

/// Per-invocation inputs.
struct Invocation<'a> {
    role: Role,
    seq: u32,
    task: &'a str,
    feedback: &'a str,
    project_type: ProjectType,
    deadline: Instant,
}

fn finalize(result: &mut WorkflowResult, state: &WorkflowState, started: Instant) {
    result.transitions = state.history.clone();
    result.next_steps = if result.success {
        "Workflow completed successfully".to_string()
    } else {
        format!(
            "Workflow stopped: {}",
            result.failure_reason.unwrap_or(FailureReason::UnknownError)
        )
    };
    if let Some(last) = state.history.last() {
        result.next_steps.push_str(&format!(
            " Last transition: {} -> {} ({})",
            last.from, last.to, last.reason
        ));
    }

    result.output.push_str("\n\n=== Workflow Diagnostics ===\n");
    result
        .output
        .push_str(&format!("Total duration: {:?}\n", started.elapsed()));
    result
        .output
        .push_str(&format!("Total transitions: {}\n", state.history.len()));
    for (role, count) in &state.iterations {
        result.output.push_str(&format!("{role} iterations: {count}\n"));
    }
    for (role, summary) in &mut result.agent_summaries {
        summary.iterations = state.iterations_for(*role);
    }
}

fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%3fZ"))
}

/// Run the standard crew against `workdir` with `llm` as the model backend.
pub fn execute_workflow(
    description: &str,
    project_type: ProjectType,
    workdir: &Path,
    config: &CrewConfig,
    llm: &dyn LlmClient,
) -> Result<WorkflowResult> {
    let workspace = Workspace::from_config(workdir, config)?;
    let router = Router::builtin().context("build routing table")?;
    let crew = Crew::standard(config);
    Ok(Workflow::new(&crew, &router, llm, &workspace, config).run(description, project_type))
}
