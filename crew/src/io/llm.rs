//! LLM abstraction for role steps.
//!
//! The [`LlmClient`] trait decouples the steps from the model backend. The
//! default backend is [`CommandLlm`], which pipes the prompt through a local
//! command such as `ollama run <model>`. Tests use scripted clients.

use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Role;
use crate::io::config::LlmSection;
use crate::io::process::{Limits, run_bounded};

/// Placeholder in the configured command replaced by the model name.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Parameters for one generation.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub role: Role,
    pub model: String,
    pub prompt: String,
    /// Already clamped to the workflow deadline.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("llm command is empty")]
    EmptyCommand,
    #[error("llm connection failed: could not start {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("llm request timeout after {secs}s")]
    Timeout { secs: u64 },
    #[error("llm connection failed: exit status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("llm connection returned an empty reply")]
    EmptyReply,
}

/// Abstraction over model backends.
pub trait LlmClient {
    fn generate(&self, request: &LlmRequest) -> Result<String>;
}

/// Backend that runs a local command and reads the reply from stdout.
#[derive(Debug, Clone)]
pub struct CommandLlm {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandLlm {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }

    pub fn from_config(section: &LlmSection) -> Self {
        Self::new(section.command.clone(), section.output_limit_bytes)
    }

    fn build(&self, model: &str) -> Result<Command, LlmError> {
        let (program, args) = self.command.split_first().ok_or(LlmError::EmptyCommand)?;
        let mut cmd = Command::new(program.replace(MODEL_PLACEHOLDER, model));
        cmd.args(args.iter().map(|a| a.replace(MODEL_PLACEHOLDER, model)));
        Ok(cmd)
    }
}

impl LlmClient for CommandLlm {
    #[instrument(skip_all, fields(role = %request.role, model = %request.model))]
    fn generate(&self, request: &LlmRequest) -> Result<String> {
        let cmd = self.build(&request.model)?;
        info!(prompt_bytes = request.prompt.len(), "requesting completion");

        let limits = Limits {
            timeout: request.timeout,
            output_bytes: self.output_limit_bytes,
        };
        let output = run_bounded(cmd, Some(request.prompt.as_bytes()), limits)
            .map_err(|e| LlmError::Spawn {
                program: self.command[0].clone(),
                reason: format!("{e:#}"),
            })?;

        if output.killed {
            warn!(timeout_secs = request.timeout.as_secs(), "llm timed out");
            return Err(LlmError::Timeout {
                secs: request.timeout.as_secs(),
            }
            .into());
        }
        if !output.status.success() {
            let stderr = output.stderr.text().trim().to_string();
            warn!(exit_code = ?output.status.code(), "llm command failed");
            return Err(LlmError::Failed {
                code: output.status.code(),
                stderr,
            }
            .into());
        }

        let reply = output.stdout.text().trim().to_string();
        if reply.is_empty() {
            return Err(LlmError::EmptyReply.into());
        }
        debug!(reply_bytes = reply.len(), "completion received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recovery::{Recovery, recover};

    fn request(timeout: Duration) -> LlmRequest {
        LlmRequest {
            role: Role::Engineer,
            model: "tiny".to_string(),
            prompt: "write the handler".to_string(),
            timeout,
        }
    }

    fn sh(script: &str) -> CommandLlm {
        CommandLlm::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            10_000,
        )
    }

    #[test]
    fn reply_is_trimmed_stdout() {
        let llm = sh("cat; echo");
        let reply = llm.generate(&request(Duration::from_secs(10))).expect("generate");
        assert_eq!(reply, "write the handler");
    }

    #[test]
    fn model_placeholder_is_substituted() {
        let llm = sh("echo model={model}");
        let reply = llm.generate(&request(Duration::from_secs(10))).expect("generate");
        assert_eq!(reply, "model=tiny");
    }

    #[test]
    fn failures_route_to_retry_or_manager() {
        let err = sh("echo refused >&2; exit 3")
            .generate(&request(Duration::from_secs(10)))
            .expect_err("non-zero exit");
        assert!(matches!(
            err.downcast_ref::<LlmError>(),
            Some(LlmError::Failed { code: Some(3), .. })
        ));
        assert!(matches!(
            recover(&err.to_string(), Role::Engineer),
            Recovery::Resume {
                next: Role::Engineer,
                ..
            }
        ));

        let err = sh("sleep 5")
            .generate(&request(Duration::from_millis(100)))
            .expect_err("timeout");
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn backend_ignoring_a_large_prompt_still_times_out() {
        let mut req = request(Duration::from_millis(300));
        req.prompt = "x".repeat(256 * 1024);
        let started = std::time::Instant::now();
        let err = sh("exec sleep 5").generate(&req).expect_err("timeout");
        assert!(matches!(
            err.downcast_ref::<LlmError>(),
            Some(LlmError::Timeout { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_program_and_empty_reply_are_errors() {
        let missing = CommandLlm::new(vec!["crew-no-such-llm".to_string()], 100);
        let err = missing
            .generate(&request(Duration::from_secs(5)))
            .expect_err("spawn");
        assert!(err.to_string().contains("connection"));

        let err = sh("true")
            .generate(&request(Duration::from_secs(5)))
            .expect_err("empty");
        assert_eq!(err.downcast_ref::<LlmError>(), Some(&LlmError::EmptyReply));

        let err = CommandLlm::new(Vec::new(), 100)
            .generate(&request(Duration::from_secs(5)))
            .expect_err("empty command");
        assert_eq!(err.downcast_ref::<LlmError>(), Some(&LlmError::EmptyCommand));
    }
}
