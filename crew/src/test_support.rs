//! Test-only helpers: scripted models, scripted steps and temporary workspaces.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::agents::{RoleStep, StepContext};
use crate::core::types::{ProjectType, Role, StepOutcome};
use crate::io::config::CrewConfig;
use crate::io::llm::{LlmClient, LlmRequest};
use crate::io::prompt::PromptBuilder;
use crate::io::workspace::{CommandPolicy, Workspace};
use crate::workflow::WorkflowResult;

/// Model that answers from a queue and remembers every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: RefCell<VecDeque<Result<String, String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.borrow_mut().push_back(Ok(text.to_string()));
        self
    }

    pub fn error(self, message: &str) -> Self {
        self.replies.borrow_mut().push_back(Err(message.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, request: &LlmRequest) -> Result<String> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted llm exhausted")),
        }
    }
}

/// What a [`ScriptedStep`] saw while it ran.
#[derive(Debug, Default)]
pub struct StepLog {
    pub tasks: RefCell<Vec<String>>,
    pub feedback: RefCell<Vec<String>>,
    pub documented: RefCell<Option<WorkflowResult>>,
}

impl StepLog {
    pub fn calls(&self) -> usize {
        self.tasks.borrow().len()
    }
}

/// Role step that plays back queued results. The last entry repeats.
pub struct ScriptedStep {
    role: Role,
    script: RefCell<VecDeque<Result<StepOutcome, String>>>,
    log: Rc<StepLog>,
}

impl ScriptedStep {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            script: RefCell::new(VecDeque::new()),
            log: Rc::new(StepLog::default()),
        }
    }

    pub fn succeed(self, message: &str) -> Self {
        self.outcome(StepOutcome::succeeded(message))
    }

    pub fn outcome(self, outcome: StepOutcome) -> Self {
        self.script.borrow_mut().push_back(Ok(outcome));
        self
    }

    /// Queue an invocation-level error.
    pub fn error(self, message: &str) -> Self {
        self.script.borrow_mut().push_back(Err(message.to_string()));
        self
    }

    /// Shared handle for inspecting calls after the step moved into a crew.
    pub fn log(&self) -> Rc<StepLog> {
        Rc::clone(&self.log)
    }
}

impl RoleStep for ScriptedStep {
    fn role(&self) -> Role {
        self.role
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepOutcome> {
        self.log.tasks.borrow_mut().push(ctx.task.to_string());
        self.log.feedback.borrow_mut().push(ctx.feedback.to_string());
        let mut script = self.script.borrow_mut();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted step for {} has no script", self.role)),
        }
    }

    fn document_outcome(&self, result: &WorkflowResult, _ctx: &StepContext<'_>) -> Result<()> {
        *self.log.documented.borrow_mut() = Some(result.clone());
        Ok(())
    }
}

/// Successful outcome that wrote `files`.
pub fn wrote(message: &str, files: &[&str]) -> StepOutcome {
    StepOutcome {
        files_modified: files.iter().map(|f| f.to_string()).collect(),
        ..StepOutcome::succeeded(message)
    }
}

/// Failed outcome with `error`.
pub fn failed(error: &str) -> StepOutcome {
    StepOutcome::failed("step failed", error)
}

/// Command policy used by test workspaces.
pub fn test_policy() -> CommandPolicy {
    let cfg = CrewConfig::default();
    CommandPolicy::new(cfg.commands.allowed, cfg.restrictions.blocked_patterns)
}

/// Workspace over a fresh temporary directory with the default command policy.
pub fn temp_workspace() -> (TempDir, Workspace) {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace =
        Workspace::new(temp.path(), test_policy(), Duration::from_secs(30), 64 * 1024)
            .expect("workspace");
    (temp, workspace)
}

/// Config whose toolchain commands all run `ls`.
pub fn test_config() -> CrewConfig {
    let mut cfg = CrewConfig::default();
    cfg.project.build_command = Some("ls".to_string());
    cfg.project.test_command = Some("ls".to_string());
    cfg.project.auto_fix_commands = Some(vec!["ls".to_string()]);
    cfg
}

/// Everything needed to run one role step in isolation.
pub struct StepHarness {
    pub temp: TempDir,
    pub workspace: Workspace,
    pub config: CrewConfig,
    pub prompts: PromptBuilder,
    pub llm: ScriptedLlm,
    /// Files reported as written by earlier steps.
    pub changed: Vec<String>,
}

impl StepHarness {
    pub fn new(llm: ScriptedLlm) -> Self {
        let (temp, workspace) = temp_workspace();
        let config = test_config();
        Self {
            temp,
            workspace,
            prompts: PromptBuilder::new(config.llm.prompt_budget_bytes),
            config,
            llm,
            changed: Vec::new(),
        }
    }

    pub fn ctx<'a>(&'a self, task: &'a str, feedback: &'a str) -> StepContext<'a> {
        StepContext {
            task,
            feedback,
            changed: &self.changed,
            project_type: ProjectType::Go,
            deadline: Instant::now() + Duration::from_secs(60),
            workspace: &self.workspace,
            llm: &self.llm,
            prompts: &self.prompts,
            config: &self.config,
        }
    }
}
