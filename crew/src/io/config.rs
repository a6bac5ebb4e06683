//! Workflow configuration stored under `.crew/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{ProjectType, Role};

/// Config path relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".crew/config.toml";

const DEFAULT_MODEL: &str = "qwen3:14b-q4_K_M";
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 5 * 60;

/// Crew configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values
/// below, so a partial file is always valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrewConfig {
    pub workflow: WorkflowSection,
    /// Per-role settings keyed by role tag (e.g. `senior_engineer`).
    pub agents: BTreeMap<String, AgentSettings>,
    pub step: StepSection,
    pub llm: LlmSection,
    pub commands: CommandsSection,
    pub restrictions: RestrictionsSection,
    pub project: ProjectSection,
    pub review: ReviewSection,
    pub transcripts: TranscriptSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowSection {
    /// Aggregate cap on controller iterations across all roles.
    pub max_total_iterations: u32,
    /// Wall-clock budget for the whole workflow.
    pub timeout_secs: u64,
    /// Invocation errors the controller may recover from before giving up.
    pub max_error_recoveries: u32,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_total_iterations: 7,
            timeout_secs: 15 * 60,
            max_error_recoveries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    pub model: String,
    pub max_iterations: u32,
    /// Per LLM call; clamped to the remaining workflow budget.
    pub timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: 2,
            timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StepSection {
    /// Engineer self-correction attempts per controller iteration.
    pub max_attempts: u32,
    /// Consecutive failures in one error category before the engineer stops early.
    pub max_same_category: u32,
}

impl Default for StepSection {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            max_same_category: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmSection {
    /// Command that reads a prompt on stdin and prints the reply. `{model}` is substituted.
    pub command: Vec<String>,
    pub output_limit_bytes: usize,
    /// Rendered prompts are cut down to this size, dropping optional sections first.
    pub prompt_budget_bytes: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            command: vec!["ollama".to_string(), "run".to_string(), "{model}".to_string()],
            output_limit_bytes: 200_000,
            prompt_budget_bytes: 48_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandsSection {
    /// Prefix allow-list applied to the trimmed command.
    pub allowed: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for CommandsSection {
    fn default() -> Self {
        let allowed = [
            "go build", "go test", "go fmt", "go vet", "go mod tidy", "go run", "go mod download",
            "go mod init", "npm install", "npm run build", "npm test", "npm run dev", "npm ci",
            "npm run lint", "npm audit", "yarn install", "yarn build", "yarn test",
            "python -m pytest", "python -m pip install", "python -m py_compile", "python -m venv",
            "python -m flake8", "python -m black", "pip install", "pytest", "make", "git add",
            "git status", "git diff", "git log --oneline", "git show", "git branch", "ls", "cat",
            "head", "tail", "find", "grep", "mkdir", "touch", "cp", "mv",
        ];
        Self {
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestrictionsSection {
    /// Substring veto, checked before the allow-list.
    pub blocked_patterns: Vec<String>,
}

impl Default for RestrictionsSection {
    fn default() -> Self {
        let blocked = [
            "sudo", "rm -rf", "chmod +x", "systemctl", "iptables", "mount", "cd /", "cat /etc/",
            "passwd", "usermod", "userdel", "groupmod", "crontab", "wget", "curl http",
            "curl https", "ssh", "scp", "rsync", "dd if=", "fdisk", "mkfs", "chown", "chgrp",
            "kill -9",
        ];
        Self {
            blocked_patterns: blocked.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Overrides for the per-project-type toolchain commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_fix_commands: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewSection {
    /// Reject reviews where the brief names a task but no implementation file changed.
    pub require_implementation: bool,
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            require_implementation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TranscriptSection {
    pub enabled: bool,
    /// Relative paths resolve against the working directory.
    pub dir: PathBuf,
}

impl Default for TranscriptSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from(".crew/runs"),
        }
    }
}

impl Default for CrewConfig {
    fn default() -> Self {
        let agents = Role::ALL
            .into_iter()
            .map(|role| {
                let max_iterations = if role == Role::Engineer { 3 } else { 2 };
                (
                    role.as_str().to_string(),
                    AgentSettings {
                        max_iterations,
                        ..AgentSettings::default()
                    },
                )
            })
            .collect();
        Self {
            workflow: WorkflowSection::default(),
            agents,
            step: StepSection::default(),
            llm: LlmSection::default(),
            commands: CommandsSection::default(),
            restrictions: RestrictionsSection::default(),
            project: ProjectSection::default(),
            review: ReviewSection::default(),
            transcripts: TranscriptSection::default(),
        }
    }
}

impl CrewConfig {
    /// Settings for `role`, falling back to the defaults when the table is absent.
    pub fn agent(&self, role: Role) -> AgentSettings {
        self.agents.get(role.as_str()).cloned().unwrap_or_default()
    }

    pub fn build_command(&self, project_type: ProjectType) -> String {
        self.project
            .build_command
            .clone()
            .unwrap_or_else(|| project_type.build_command().to_string())
    }

    pub fn test_command(&self, project_type: ProjectType) -> String {
        self.project
            .test_command
            .clone()
            .unwrap_or_else(|| project_type.test_command().to_string())
    }

    pub fn auto_fix_commands(&self, project_type: ProjectType) -> Vec<String> {
        match &self.project.auto_fix_commands {
            Some(commands) => commands.clone(),
            None => project_type
                .auto_fix_commands()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }

    pub fn max_iterations_for(&self, role: Role) -> u32 {
        self.agent(role).max_iterations
    }

    pub fn workflow_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_total_iterations == 0 {
            return Err(anyhow!("workflow.max_total_iterations must be > 0"));
        }
        if self.workflow.timeout_secs == 0 {
            return Err(anyhow!("workflow.timeout_secs must be > 0"));
        }
        for (role, agent) in &self.agents {
            role.parse::<Role>()
                .with_context(|| format!("agents.{role} is not a known role"))?;
            if agent.model.trim().is_empty() {
                return Err(anyhow!("agents.{role}.model must be non-empty"));
            }
            if agent.max_iterations == 0 {
                return Err(anyhow!("agents.{role}.max_iterations must be > 0"));
            }
            if agent.timeout_secs == 0 {
                return Err(anyhow!("agents.{role}.timeout_secs must be > 0"));
            }
        }
        if self.step.max_attempts == 0 {
            return Err(anyhow!("step.max_attempts must be > 0"));
        }
        if self.step.max_same_category == 0 || self.step.max_same_category > self.step.max_attempts
        {
            return Err(anyhow!(
                "step.max_same_category must be between 1 and step.max_attempts"
            ));
        }
        if self.llm.command.is_empty() || self.llm.command[0].trim().is_empty() {
            return Err(anyhow!("llm.command must be a non-empty array"));
        }
        if self.llm.output_limit_bytes == 0 {
            return Err(anyhow!("llm.output_limit_bytes must be > 0"));
        }
        if self.llm.prompt_budget_bytes == 0 {
            return Err(anyhow!("llm.prompt_budget_bytes must be > 0"));
        }
        if self.commands.allowed.is_empty() {
            return Err(anyhow!("commands.allowed must list at least one command"));
        }
        if self.commands.timeout_secs == 0 {
            return Err(anyhow!("commands.timeout_secs must be > 0"));
        }
        if self.commands.output_limit_bytes == 0 {
            return Err(anyhow!("commands.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CrewConfig::default()`.
pub fn load_config(path: &Path) -> Result<CrewConfig> {
    if !path.exists() {
        let cfg = CrewConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CrewConfig =
        toml::from_str(&contents).with_context(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CrewConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
