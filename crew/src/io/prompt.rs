//! Prompt rendering for the role steps.
//!
//! Templates carry `<!-- section:KEY required|droppable -->` markers. After
//! rendering, droppable sections are removed (least useful first) until the
//! prompt fits the byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const ACTIONS_TEMPLATE: &str = include_str!("prompts/actions.md");
const MANAGER_TEMPLATE: &str = include_str!("prompts/manager.md");
const ENGINEER_TEMPLATE: &str = include_str!("prompts/engineer.md");
const QA_TEMPLATE: &str = include_str!("prompts/qa.md");
const TECH_LEAD_TEMPLATE: &str = include_str!("prompts/tech_lead.md");
const DOCUMENT_TEMPLATE: &str = include_str!("prompts/document.md");

/// Drop order when over budget.
const DROP_ORDER: [&str; 4] = ["knowledge", "status", "diff", "changes"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should be valid")
});

#[derive(Debug, Clone, Serialize)]
pub struct ManagerPrompt<'a> {
    pub project_type: &'a str,
    pub task: &'a str,
    /// Rendered structured rejection from the previous review, if any.
    pub rejection: &'a str,
    pub failure: &'a str,
    pub status: &'a str,
    pub knowledge: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineerPrompt<'a> {
    pub project_type: &'a str,
    pub build_command: &'a str,
    pub task: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: &'a str,
    pub category: &'a str,
    pub hints: &'a [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct QaPrompt<'a> {
    pub project_type: &'a str,
    pub test_command: &'a str,
    pub task: &'a str,
    pub changed_files: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct TechLeadPrompt<'a> {
    pub project_type: &'a str,
    pub task: &'a str,
    pub changed_files: &'a [String],
    pub diff: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentPrompt<'a> {
    pub task: &'a str,
    pub files: &'a [String],
    pub knowledge: &'a str,
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Renders role prompts within a byte budget.
#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        for (name, source) in [
            ("actions", ACTIONS_TEMPLATE),
            ("manager", MANAGER_TEMPLATE),
            ("engineer", ENGINEER_TEMPLATE),
            ("qa", QA_TEMPLATE),
            ("tech_lead", TECH_LEAD_TEMPLATE),
            ("document", DOCUMENT_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("built-in prompt templates should be valid");
        }
        Self { env, budget_bytes }
    }

    pub fn manager(&self, input: &ManagerPrompt<'_>) -> Result<String> {
        self.render("manager", input)
    }

    pub fn engineer(&self, input: &EngineerPrompt<'_>) -> Result<String> {
        self.render("engineer", input)
    }

    pub fn qa(&self, input: &QaPrompt<'_>) -> Result<String> {
        self.render("qa", input)
    }

    pub fn tech_lead(&self, input: &TechLeadPrompt<'_>) -> Result<String> {
        self.render("tech_lead", input)
    }

    pub fn document(&self, input: &DocumentPrompt<'_>) -> Result<String> {
        self.render("document", input)
    }

    fn render<S: Serialize>(&self, name: &str, input: &S) -> Result<String> {
        let rendered = self
            .env
            .get_template(name)
            .and_then(|template| template.render(input))
            .with_context(|| format!("render {name} prompt"))?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(join_sections(&sections))
    }
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    let total = |secs: &[Section]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section"
            );
            sections.remove(idx);
        }
    }

    let size = total(sections);
    if size <= budget {
        return;
    }
    // Still too large: cut the biggest section.
    if let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) {
        let keep = largest.content.len().saturating_sub(size - budget);
        let mut cut = keep;
        while cut > 0 && !largest.content.is_char_boundary(cut) {
            cut -= 1;
        }
        debug!(
            section = %largest.key,
            before = largest.content.len(),
            after = cut,
            "truncated prompt section"
        );
        largest.content.truncate(cut);
        largest.content.push_str("\n[truncated]");
    }
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_input<'a>(knowledge: &'a str, rejection: &'a str) -> ManagerPrompt<'a> {
        ManagerPrompt {
            project_type: "go",
            task: "Add a /health endpoint",
            rejection,
            failure: "build failed",
            status: "?? main.go",
            knowledge,
        }
    }

    #[test]
    fn manager_prompt_orders_sections() {
        let prompt = PromptBuilder::new(100_000)
            .manager(&manager_input("Use net/http.", ""))
            .expect("render");
        let role = prompt.find("### Engineering Manager").expect("role");
        let task = prompt.find("### Task").expect("task");
        let failure = prompt.find("### Previous Failure").expect("failure");
        let status = prompt.find("### Git Status").expect("status");
        let knowledge = prompt.find("### Project Knowledge").expect("knowledge");
        let actions = prompt.find("### Actions").expect("actions");
        assert!(role < task && task < failure && failure < status);
        assert!(status < knowledge && knowledge < actions);
        assert!(!prompt.contains("<!--"), "markers are stripped");
    }

    #[test]
    fn rejection_replaces_failure_section() {
        let prompt = PromptBuilder::new(100_000)
            .manager(&manager_input("", "REJECTION_REASON: security_concerns"))
            .expect("render");
        assert!(prompt.contains("### Tech Lead Rejection"));
        assert!(prompt.contains("REJECTION_REASON: security_concerns"));
        assert!(!prompt.contains("### Previous Failure"));
        assert!(!prompt.contains("### Project Knowledge"));
    }

    #[test]
    fn budget_drops_knowledge_before_status() {
        let knowledge = "guidance ".repeat(400);
        let builder = PromptBuilder::new(1_800);
        let prompt = builder
            .manager(&manager_input(&knowledge, ""))
            .expect("render");
        assert!(!prompt.contains("### Project Knowledge"));
        assert!(prompt.contains("### Git Status"));
        assert!(prompt.contains("### Task"));
    }

    #[test]
    fn required_sections_are_truncated_when_nothing_can_be_dropped() {
        let task = "x".repeat(5_000);
        let input = QaPrompt {
            project_type: "python",
            test_command: "python -m pytest",
            task: &task,
            changed_files: &[],
        };
        let prompt = PromptBuilder::new(2_000).qa(&input).expect("render");
        assert!(prompt.contains("[truncated]"));
        assert!(prompt.contains("### Actions"));
        assert!(prompt.len() < 2_200);
    }

    #[test]
    fn engineer_prompt_lists_previous_error_and_hints() {
        let hints = ["Check variable declarations", "Verify imports"];
        let input = EngineerPrompt {
            project_type: "go",
            build_command: "go build ./...",
            task: "Add handler",
            attempt: 2,
            max_attempts: 8,
            last_error: "undefined: handler",
            category: "undefined_symbol",
            hints: &hints,
        };
        let prompt = PromptBuilder::new(100_000).engineer(&input).expect("render");
        assert!(prompt.contains("Attempt 2 of 8."));
        assert!(prompt.contains("failed (undefined_symbol)"));
        assert!(prompt.contains("- Verify imports"));
        assert!(prompt.contains("`go build ./...`"));
    }

    #[test]
    fn first_engineer_attempt_has_no_previous_section() {
        let input = EngineerPrompt {
            project_type: "go",
            build_command: "go build ./...",
            task: "Add handler",
            attempt: 1,
            max_attempts: 8,
            last_error: "",
            category: "",
            hints: &[],
        };
        let prompt = PromptBuilder::new(100_000).engineer(&input).expect("render");
        assert!(!prompt.contains("### Previous Attempt"));
    }
}
