//! Shared deterministic types for the workflow core.
//!
//! These types define the contracts between the parser, classifier, router and
//! controller. They carry no I/O and serialize to stable tags.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "engineering_manager")]
    Manager,
    #[serde(rename = "senior_engineer")]
    Engineer,
    #[serde(rename = "senior_qa")]
    Qa,
    #[serde(rename = "senior_tech_lead")]
    TechLead,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Manager, Role::Engineer, Role::Qa, Role::TechLead];

    /// Stable tag used in config keys, logs and serialized output.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Manager => "engineering_manager",
            Role::Engineer => "senior_engineer",
            Role::Qa => "senior_qa",
            Role::TechLead => "senior_tech_lead",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| anyhow!("unknown role '{s}'"))
    }
}

/// Structured result of one role step.
///
/// `success == false` is an outcome-level failure: the step ran to completion
/// and the router decides where to go next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    pub message: String,
    pub error: String,
    pub files_modified: Vec<String>,
    pub commands_executed: Vec<String>,
    /// Build, test and command output captured during the step.
    pub output: String,
    /// Free text handed to the next role as its task description.
    pub next_steps: String,
}

impl StepOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: error.into(),
            ..Self::default()
        }
    }
}

/// A recorded hand-off between two roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Role,
    pub to: Role,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Transition {
    pub fn now(from: Role, to: Role, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Machine-readable tag attached to every failed workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    IterationLimitExceeded,
    WorkflowHealthFailed,
    RoutingFailed,
    AgentUnavailable,
    CommandRestriction,
    FilesystemError,
    ConfigurationError,
    GitError,
    ConnectionFailed,
    UnknownError,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::IterationLimitExceeded => "iteration_limit_exceeded",
            FailureReason::WorkflowHealthFailed => "workflow_health_failed",
            FailureReason::RoutingFailed => "routing_failed",
            FailureReason::AgentUnavailable => "agent_unavailable",
            FailureReason::CommandRestriction => "command_restriction",
            FailureReason::FilesystemError => "filesystem_error",
            FailureReason::ConfigurationError => "configuration_error",
            FailureReason::GitError => "git_error",
            FailureReason::ConnectionFailed => "connection_failed",
            FailureReason::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Toolchain family of the target project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Go,
    TypeScript,
    Python,
}

impl ProjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectType::Go => "go",
            ProjectType::TypeScript => "typescript",
            ProjectType::Python => "python",
        }
    }

    pub fn build_command(self) -> &'static str {
        match self {
            ProjectType::Go => "go build .",
            ProjectType::TypeScript => "npm run build",
            ProjectType::Python => "python -m py_compile *.py",
        }
    }

    pub fn test_command(self) -> &'static str {
        match self {
            ProjectType::Go => "go test ./...",
            ProjectType::TypeScript => "npm test",
            ProjectType::Python => "python -m pytest",
        }
    }

    /// Formatter and tidy commands the tech lead applies before review.
    pub fn auto_fix_commands(self) -> &'static [&'static str] {
        match self {
            ProjectType::Go => &["go fmt ./...", "go mod tidy"],
            ProjectType::TypeScript => &["npm run lint --fix"],
            ProjectType::Python => &["python -m black ."],
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Ok(ProjectType::Go),
            "typescript" | "ts" | "javascript" | "js" => Ok(ProjectType::TypeScript),
            "python" | "py" => Ok(ProjectType::Python),
            other => Err(anyhow!("unsupported project type '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_round_trip_through_from_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().expect("parse"), role);
        }
        assert!("qa".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_as_tag() {
        let json = serde_json::to_string(&Role::TechLead).expect("serialize");
        assert_eq!(json, "\"senior_tech_lead\"");
    }

    #[test]
    fn failure_reason_display_matches_serde_tag() {
        let reason = FailureReason::IterationLimitExceeded;
        let json = serde_json::to_string(&reason).expect("serialize");
        assert_eq!(json, format!("\"{reason}\""));
    }

    #[test]
    fn project_type_accepts_aliases() {
        assert_eq!("TS".parse::<ProjectType>().expect("ts"), ProjectType::TypeScript);
        assert_eq!("py".parse::<ProjectType>().expect("py"), ProjectType::Python);
        assert!("cobol".parse::<ProjectType>().is_err());
    }
}
