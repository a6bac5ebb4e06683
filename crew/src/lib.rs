//! Role-based workflow engine for LLM coding agents.
//!
//! A workflow passes a task through four roles (engineering manager, senior
//! engineer, senior QA and senior tech lead). After each step a prioritized
//! rule table decides which role runs next. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (action parsing, error
//!   classification, routing, health checks). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, workspace, git, processes,
//!   the LLM backend, prompts and transcripts).
//! - **[`agents`]**: The role steps, built on `io` capabilities.
//!
//! [`workflow`] drives the roles until the tech lead approves or a budget,
//! health check or routing failure stops the run.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
