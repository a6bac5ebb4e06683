//! Role-based LLM coding workflow.
//!
//! `crew run` passes a task through the engineering manager, engineer, QA and
//! tech lead roles and prints the aggregate result as JSON.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crew::core::classifier::ErrorClassifier;
use crew::core::routing::RuleTable;
use crew::core::types::ProjectType;
use crew::exit_codes;
use crew::io::config::{CrewConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use crew::io::llm::CommandLlm;
use crew::io::project;
use crew::io::workspace::Workspace;
use crew::logging;
use crew::workflow::execute_workflow;

#[derive(Parser)]
#[command(
    name = "crew",
    version,
    about = "Role-based workflow engine for LLM coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the manager, engineer, QA and tech lead workflow for a task.
    Run {
        /// Task description handed to the engineering manager.
        #[arg(short, long)]
        description: String,
        /// Toolchain of the target project (go, typescript, python).
        #[arg(short, long, default_value = "go")]
        project_type: ProjectType,
        /// Working directory the agents may touch.
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
        /// Config file; defaults to `.crew/config.toml` in the working directory.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the built-in routing table and print its rules.
    CheckRules,
    /// Classify error text and print the category as JSON.
    Classify {
        /// Error or build output to classify.
        text: String,
    },
    /// Write the default config file.
    InitConfig {
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Detect the project's stack and code patterns and record them for the agents.
    InitProject {
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
        /// Config file; defaults to `.crew/config.toml` in the working directory.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            description,
            project_type,
            workdir,
            config,
        } => cmd_run(&description, project_type, &workdir, config.as_deref()),
        Command::CheckRules => cmd_check_rules(),
        Command::Classify { text } => cmd_classify(&text),
        Command::InitConfig { workdir, force } => cmd_init_config(&workdir, force),
        Command::InitProject { workdir, config } => cmd_init_project(&workdir, config.as_deref()),
    }
}

fn config_for(workdir: &Path, config: Option<&Path>) -> Result<CrewConfig> {
    let config_path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_PATH));
    load_config(&config_path)
}

fn cmd_run(
    description: &str,
    project_type: ProjectType,
    workdir: &Path,
    config: Option<&Path>,
) -> Result<i32> {
    if description.trim().is_empty() {
        bail!("--description must not be empty");
    }
    let cfg = config_for(workdir, config)?;
    let llm = CommandLlm::from_config(&cfg.llm);
    let result = execute_workflow(description, project_type, workdir, &cfg, &llm)?;
    print_json(&result)?;
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_check_rules() -> Result<i32> {
    let table = RuleTable::builtin().context("built-in routing table is invalid")?;
    for line in rule_lines(&table) {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn rule_lines(table: &RuleTable) -> Vec<String> {
    table
        .rules()
        .iter()
        .map(|rule| {
            format!(
                "{:<20} {:>3}  {:<40} -> {:<20} {}",
                rule.from.as_str(),
                rule.priority,
                rule.condition,
                rule.to.to_string(),
                rule.reason
            )
        })
        .collect()
}

fn cmd_classify(text: &str) -> Result<i32> {
    let classification = ErrorClassifier::new().classify(text);
    print_json(&classification)?;
    Ok(exit_codes::OK)
}

fn cmd_init_config(workdir: &Path, force: bool) -> Result<i32> {
    let path = workdir.join(DEFAULT_CONFIG_PATH);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    write_config(&path, &CrewConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_init_project(workdir: &Path, config: Option<&Path>) -> Result<i32> {
    let cfg = config_for(workdir, config)?;
    let workspace = Workspace::from_config(workdir, &cfg)?;
    let initialized = project::initialize(&workspace)?;
    print_json(&initialized)?;
    Ok(exit_codes::OK)
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
