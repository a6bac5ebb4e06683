//! Optional per-step transcripts under `<dir>/<run_id>/`.
//!
//! [`RecordingLlm`] captures every prompt/reply pair a step makes so the
//! controller can write them out next to the step outcome.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::{Role, StepOutcome};
use crate::io::llm::{LlmClient, LlmRequest};

/// One generation made during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub prompt: String,
    /// Reply text, or the rendered error.
    pub reply: Result<String, String>,
}

/// Client wrapper that remembers every exchange until drained.
pub struct RecordingLlm<'a> {
    inner: &'a dyn LlmClient,
    exchanges: RefCell<Vec<Exchange>>,
}

impl<'a> RecordingLlm<'a> {
    pub fn new(inner: &'a dyn LlmClient) -> Self {
        Self {
            inner,
            exchanges: RefCell::new(Vec::new()),
        }
    }

    /// Remove and return the exchanges recorded so far.
    pub fn take(&self) -> Vec<Exchange> {
        self.exchanges.take()
    }
}

impl LlmClient for RecordingLlm<'_> {
    fn generate(&self, request: &LlmRequest) -> Result<String> {
        let result = self.inner.generate(request);
        self.exchanges.borrow_mut().push(Exchange {
            prompt: request.prompt.clone(),
            reply: match &result {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(format!("{e:#}")),
            },
        });
        result
    }
}

/// Writes `<nn>-<role>.md` files for one workflow run.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    dir: PathBuf,
}

impl TranscriptWriter {
    /// `dir` is resolved against `workdir` when relative.
    pub fn new(workdir: &Path, dir: &Path, run_id: &str) -> Self {
        Self {
            dir: workdir.join(dir).join(run_id),
        }
    }

    pub fn step_path(&self, seq: u32, role: Role) -> PathBuf {
        self.dir.join(format!("{seq:02}-{role}.md"))
    }

    pub fn write_step(
        &self,
        seq: u32,
        role: Role,
        exchanges: &[Exchange],
        result: &Result<StepOutcome>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create transcript dir {}", self.dir.display()))?;
        let path = self.step_path(seq, role);
        let body = render_step(seq, role, exchanges, result)?;
        fs::write(&path, body).with_context(|| format!("write transcript {}", path.display()))?;
        Ok(path)
    }
}

fn render_step(
    seq: u32,
    role: Role,
    exchanges: &[Exchange],
    result: &Result<StepOutcome>,
) -> Result<String> {
    let mut buf = String::new();
    writeln!(buf, "# Step {seq}: {role}")?;
    for (i, exchange) in exchanges.iter().enumerate() {
        writeln!(buf, "\n## Exchange {}\n\n### Prompt\n", i + 1)?;
        writeln!(buf, "````\n{}\n````", exchange.prompt.trim_end())?;
        match &exchange.reply {
            Ok(reply) => writeln!(buf, "\n### Reply\n\n````\n{}\n````", reply.trim_end())?,
            Err(err) => writeln!(buf, "\n### Error\n\n{err}")?,
        }
    }
    match result {
        Ok(outcome) => {
            let json = serde_json::to_string_pretty(outcome).context("serialize outcome")?;
            writeln!(buf, "\n## Outcome\n\n```json\n{json}\n```")?;
        }
        Err(err) => writeln!(buf, "\n## Invocation Error\n\n{err:#}")?,
    }
    Ok(buf)
}
