//! Side-effecting adapters: configuration, processes, git, the workspace
//! capability layer, the LLM backend, prompts, transcripts and the project
//! knowledge files.

pub mod config;
pub mod git;
pub mod llm;
pub mod process;
pub mod project;
pub mod prompt;
pub mod transcript;
pub mod workspace;
