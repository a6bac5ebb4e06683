//! Role steps: Manager, Engineer, QA and TechLead behind one [`RoleStep`] trait.
//!
//! Steps are stateless; everything they touch arrives through [`StepContext`].
//! `Err` from [`RoleStep::run`] is an invocation-level error handled by the
//! controller's recovery table. `Ok` with `success == false` is a step that ran
//! and failed, and goes to the router.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use crate::core::budget::clamp_to_deadline;
use crate::core::types::{ProjectType, Role, StepOutcome};
use crate::io::config::CrewConfig;
use crate::io::llm::{LlmClient, LlmRequest};
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::Capabilities;
use crate::workflow::WorkflowResult;

pub mod engineer;
pub mod executor;
pub mod manager;
pub mod qa;
pub mod tech_lead;

pub use engineer::EngineerStep;
pub use executor::{ExecutionPolicy, OnFailure, StepExecutor};
pub use manager::ManagerStep;
pub use qa::QaStep;
pub use tech_lead::{RequirementsCheck, ReviewCheck, TechLeadStep};

/// Everything a step may use while it runs.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    /// Task description for this step, project instructions included.
    pub task: &'a str,
    /// Error text of the previous step when it failed, otherwise empty.
    pub feedback: &'a str,
    /// Files written by earlier steps of this run.
    pub changed: &'a [String],
    pub project_type: ProjectType,
    pub deadline: Instant,
    pub workspace: &'a dyn Capabilities,
    pub llm: &'a dyn LlmClient,
    pub prompts: &'a PromptBuilder,
    pub config: &'a CrewConfig,
}

impl<'a> StepContext<'a> {
    /// Send `prompt` to the model configured for `role`.
    pub fn ask(&self, role: Role, prompt: String) -> Result<String> {
        let settings = self.config.agent(role);
        let timeout = clamp_to_deadline(Duration::from_secs(settings.timeout_secs), self.deadline)?;
        debug!(%role, model = %settings.model, timeout_secs = timeout.as_secs(), "asking model");
        self.llm.generate(&LlmRequest {
            role,
            model: settings.model,
            prompt,
            timeout,
        })
    }

    /// Files changed in the working tree plus those written earlier in the run.
    pub fn changed_files(&self) -> Vec<String> {
        let mut files = self.workspace.changed_files();
        files.extend(self.changed.iter().cloned());
        files.sort();
        files.dedup();
        files
    }

    pub fn executor(&self) -> StepExecutor<'a> {
        StepExecutor::new(self.workspace, self.deadline)
    }
}

/// One stage of the pipeline.
pub trait RoleStep {
    fn role(&self) -> Role;

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutcome>;

    /// Called once after a completed workflow. Failures are logged, never fatal.
    fn document_outcome(&self, _result: &WorkflowResult, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Registry of role steps, at most one per role.
#[derive(Default)]
pub struct Crew {
    steps: BTreeMap<Role, Box<dyn RoleStep>>,
}

impl Crew {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The four built-in steps configured from `cfg`.
    pub fn standard(cfg: &CrewConfig) -> Self {
        let mut checks: Vec<Box<dyn ReviewCheck>> = Vec::new();
        if cfg.review.require_implementation {
            checks.push(Box::new(RequirementsCheck));
        }
        Self::empty()
            .with(ManagerStep)
            .with(EngineerStep::new(cfg.step.max_attempts, cfg.step.max_same_category))
            .with(QaStep)
            .with(TechLeadStep::new(checks))
    }

    /// Register `step`, replacing any step already registered for its role.
    pub fn with(mut self, step: impl RoleStep + 'static) -> Self {
        self.steps.insert(step.role(), Box::new(step));
        self
    }

    pub fn step(&self, role: Role) -> Option<&dyn RoleStep> {
        self.steps.get(&role).map(|step| step.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedStep;

    #[test]
    fn standard_crew_covers_every_role() {
        let crew = Crew::standard(&CrewConfig::default());
        for role in Role::ALL {
            assert_eq!(crew.step(role).map(|step| step.role()), Some(role));
        }
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let crew = Crew::standard(&CrewConfig::default())
            .with(ScriptedStep::new(Role::Qa).succeed("scripted"));
        let step = crew.step(Role::Qa).expect("qa registered");
        assert_eq!(step.role(), Role::Qa);
        assert!(Crew::empty().step(Role::Qa).is_none());
    }
}
