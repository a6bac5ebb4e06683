//! Engineering manager step: turns a request (or feedback) into a brief for
//! the engineer, and keeps the project knowledge file up to date.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::actions::parse_actions;
use crate::core::brief::{Brief, extract_task};
use crate::core::rejection::Rejection;
use crate::core::types::{Role, StepOutcome};
use crate::io::project::{KNOWLEDGE_PATH, KNOWLEDGE_SEED, read_knowledge};
use crate::io::prompt::{DocumentPrompt, ManagerPrompt};
use crate::workflow::WorkflowResult;

use super::{ExecutionPolicy, RoleStep, StepContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerStep;

fn prepend(outcome: &mut StepOutcome, seeded: Option<String>) {
    if let Some(path) = seeded {
        outcome.files_modified.insert(0, path);
    }
}

impl RoleStep for ManagerStep {
    fn role(&self) -> Role {
        Role::Manager
    }

    #[instrument(skip_all, fields(role = %Role::Manager))]
    fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        let knowledge = read_knowledge(ctx.workspace);
        let status = ctx.workspace.git_status().unwrap_or_else(|e| {
            debug!(err = %e, "no git status for planning");
            "No git repository detected".to_string()
        });
        let rejection = Rejection::parse(ctx.feedback)
            .or_else(|| Rejection::parse(ctx.task))
            .map(|r| r.render())
            .unwrap_or_default();
        let failure = if rejection.is_empty() { ctx.feedback } else { "" };

        let prompt = ctx.prompts.manager(&ManagerPrompt {
            project_type: ctx.project_type.as_str(),
            task: ctx.task,
            rejection: &rejection,
            failure,
            status: &status,
            knowledge: knowledge.as_ref().map_or("", |(_, text)| text.as_str()),
        })?;
        let reply = ctx.ask(Role::Manager, prompt)?;

        let mut seeded = None;
        if knowledge.is_none() {
            match ctx.workspace.write_file(KNOWLEDGE_PATH, KNOWLEDGE_SEED) {
                Ok(()) => seeded = Some(KNOWLEDGE_PATH.to_string()),
                Err(e) => warn!(err = %format!("{e:#}"), "could not seed knowledge file"),
            }
        }

        let exec = ctx
            .executor()
            .execute(&parse_actions(&reply), ExecutionPolicy::MANAGER);
        if exec.failed() {
            let mut outcome = exec.into_outcome("Planning failed");
            prepend(&mut outcome, seeded);
            return Ok(outcome);
        }

        let task = extract_task(&reply);
        let brief = Brief::parse(&reply);
        let mut outcome = exec.into_outcome(&format!("Plan: {task}"));
        prepend(&mut outcome, seeded);
        outcome.next_steps = if brief.has_task() {
            brief.render()
        } else {
            task
        };
        info!(brief_bytes = outcome.next_steps.len(), "brief ready");
        Ok(outcome)
    }

    #[instrument(skip_all, fields(role = %Role::Manager))]
    fn document_outcome(&self, result: &WorkflowResult, ctx: &StepContext<'_>) -> Result<()> {
        let (path, current) = read_knowledge(ctx.workspace)
            .unwrap_or((KNOWLEDGE_PATH, KNOWLEDGE_SEED.to_string()));
        let prompt = ctx.prompts.document(&DocumentPrompt {
            task: ctx.task,
            files: &result.files_modified,
            knowledge: &current,
        })?;
        let updated = ctx
            .ask(Role::Manager, prompt)
            .context("generate knowledge update")?;
        ctx.workspace.write_file(path, &updated)?;
        info!(path, "knowledge file updated");
        Ok(())
    }
}
