//! Recovery policy for invocation-level errors.
//!
//! These are failures to run a step at all (the model was unreachable, a tool
//! call blew up), as opposed to steps that ran and reported failure.

use crate::core::types::{FailureReason, Role};

/// What the controller should do after an invocation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Hand control to `next` and keep going.
    Resume { next: Role, reason: &'static str },
    /// Stop the workflow.
    Fail(FailureReason),
}

/// Consult the recovery table for an error raised while running `current`.
pub fn recover(error: &str, current: Role) -> Recovery {
    let lower = error.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["connection", "timeout"]) {
        return Recovery::Resume {
            next: current,
            reason: "Connection error, retrying",
        };
    }
    if has(&["not registered"]) {
        return Recovery::Resume {
            next: Role::Manager,
            reason: "Agent not available, falling back to planning",
        };
    }
    if has(&["command", "restricted"]) {
        return Recovery::Resume {
            next: Role::Manager,
            reason: "Command restriction, need planning guidance",
        };
    }
    if has(&["file", "directory"]) {
        return Recovery::Resume {
            next: Role::Manager,
            reason: "Filesystem error, need planning guidance",
        };
    }
    if has(&["deadline", "context"]) {
        return Recovery::Resume {
            next: Role::Manager,
            reason: "Execution timeout, need planning guidance",
        };
    }
    Recovery::Fail(categorize_failure(error))
}

/// Tag an unrecoverable invocation error.
pub fn categorize_failure(error: &str) -> FailureReason {
    let lower = error.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["timeout", "deadline"]) {
        FailureReason::Timeout
    } else if has(&["connection"]) {
        FailureReason::ConnectionFailed
    } else if has(&["not registered"]) {
        FailureReason::AgentUnavailable
    } else if has(&["command", "restricted"]) {
        FailureReason::CommandRestriction
    } else if has(&["file", "directory"]) {
        FailureReason::FilesystemError
    } else if has(&["config"]) {
        FailureReason::ConfigurationError
    } else if has(&["git"]) {
        FailureReason::GitError
    } else {
        FailureReason::UnknownError
    }
}
