//! Capability layer: file, command and git access bound to one working directory.
//!
//! Every role step touches the outside world only through [`Capabilities`].
//! [`Workspace`] is the real implementation; paths are confined to the
//! working directory and commands must pass the allow/block policy.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::budget::clamp_to_deadline;
use crate::io::config::CrewConfig;
use crate::io::git::{Repo, parse_changes};
use crate::io::process::{Limits, run_bounded};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    #[error("access denied: path outside working directory: {0}")]
    OutsideWorkdir(String),
    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),
    #[error("command timed out after {secs}s: {command}")]
    CommandTimedOut { command: String, secs: u64 },
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRun {
    pub command: String,
    /// Combined stdout and stderr.
    pub output: String,
    pub exit_code: Option<i32>,
}

impl CommandRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Operations a role step may perform.
pub trait Capabilities {
    fn workdir(&self) -> &Path;
    fn read_file(&self, path: &str) -> Result<String>;
    fn write_file(&self, path: &str, content: &str) -> Result<()>;
    fn validate_command(&self, command: &str) -> Result<()>;
    /// Run a validated command. A non-zero exit is reported in [`CommandRun`], not as `Err`.
    fn execute_command(&self, command: &str, deadline: Instant) -> Result<CommandRun>;
    fn list_files(&self, dir: &str) -> Result<Vec<String>>;
    fn find_files(&self, pattern: &str, dir: &str) -> Result<Vec<String>>;
    fn git_status(&self) -> Result<String>;
    fn git_diff(&self) -> Result<String>;

    /// Paths reported by `git status`, or nothing outside a repository.
    fn changed_files(&self) -> Vec<String> {
        self.git_status()
            .map(|text| parse_changes(&text).into_iter().map(|c| c.path).collect())
            .unwrap_or_default()
    }
}

/// Allow-list prefixes plus blocked substrings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl CommandPolicy {
    pub fn new(allowed: Vec<String>, blocked: Vec<String>) -> Self {
        Self { allowed, blocked }
    }

    pub fn check(&self, command: &str) -> Result<(), WorkspaceError> {
        let command = command.trim();
        if let Some(pattern) = self.blocked.iter().find(|p| command.contains(p.as_str())) {
            debug!(command, pattern = %pattern, "command blocked");
            return Err(WorkspaceError::CommandNotAllowed(command.to_string()));
        }
        if self.allowed.iter().any(|a| command.starts_with(a.as_str())) {
            return Ok(());
        }
        Err(WorkspaceError::CommandNotAllowed(command.to_string()))
    }
}

/// Capabilities confined to one working directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    policy: CommandPolicy,
    command_timeout: Duration,
    output_limit_bytes: usize,
    repo: Repo,
}

impl Workspace {
    pub fn new(
        workdir: &Path,
        policy: CommandPolicy,
        command_timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        let root = workdir
            .canonicalize()
            .with_context(|| format!("resolve working directory {}", workdir.display()))?;
        Ok(Self {
            repo: Repo::new(&root),
            root,
            policy,
            command_timeout,
            output_limit_bytes,
        })
    }

    pub fn from_config(workdir: &Path, cfg: &CrewConfig) -> Result<Self> {
        Self::new(
            workdir,
            CommandPolicy::new(
                cfg.commands.allowed.clone(),
                cfg.restrictions.blocked_patterns.clone(),
            ),
            Duration::from_secs(cfg.commands.timeout_secs),
            cfg.commands.output_limit_bytes,
        )
    }

    /// Resolve `path` lexically inside the working directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let candidate = Path::new(path.trim());
        let relative = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| WorkspaceError::OutsideWorkdir(path.to_string()))?
        } else {
            candidate
        };
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(WorkspaceError::OutsideWorkdir(path.to_string()));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::OutsideWorkdir(path.to_string()));
                }
            }
        }
        Ok(resolved)
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Capabilities for Workspace {
    fn workdir(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        fs::read_to_string(&full).with_context(|| format!("read file {path}"))
    }

    #[instrument(skip_all, fields(path))]
    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory for {path}"))?;
        }
        fs::write(&full, content).with_context(|| format!("write file {path}"))?;
        debug!(bytes = content.len(), "file written");
        Ok(())
    }

    fn validate_command(&self, command: &str) -> Result<()> {
        self.policy.check(command)?;
        Ok(())
    }

    #[instrument(skip_all, fields(command))]
    fn execute_command(&self, command: &str, deadline: Instant) -> Result<CommandRun> {
        self.validate_command(command)?;
        let timeout = clamp_to_deadline(self.command_timeout, deadline)?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command.trim()).current_dir(&self.root);
        let limits = Limits {
            timeout,
            output_bytes: self.output_limit_bytes,
        };
        let out = run_bounded(cmd, None, limits).with_context(|| format!("run command {command}"))?;
        if out.killed {
            warn!(timeout_secs = timeout.as_secs(), "command timed out");
            return Err(WorkspaceError::CommandTimedOut {
                command: command.trim().to_string(),
                secs: timeout.as_secs(),
            }
            .into());
        }
        let run = CommandRun {
            command: command.trim().to_string(),
            output: out.transcript(),
            exit_code: out.status.code(),
        };
        debug!(exit_code = ?run.exit_code, "command finished");
        Ok(run)
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let full = self.resolve(dir)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).with_context(|| format!("list directory {dir}"))? {
            let entry = entry.with_context(|| format!("list directory {dir}"))?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn find_files(&self, pattern: &str, dir: &str) -> Result<Vec<String>> {
        let full = self.resolve(dir)?;
        let needle = pattern.to_lowercase();
        let mut found = Vec::new();
        let walker = WalkDir::new(&full)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.with_context(|| format!("walk directory {dir}"))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.contains(&needle) {
                found.push(self.relative_display(entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }

    fn git_status(&self) -> Result<String> {
        self.repo.status()
    }

    fn git_diff(&self) -> Result<String> {
        self.repo.diff()
    }
}
