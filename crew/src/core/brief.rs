//! Manager brief parsing.

/// Structured fields of a manager brief. Every field is optional in practice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Brief {
    pub task: String,
    pub context: String,
    pub files_to_examine: Vec<String>,
    pub implementation_approach: String,
    pub potential_issues: Vec<String>,
    pub success_criteria: Vec<String>,
}

impl Brief {
    /// Parse the `KEY: value` lines of a brief; unknown lines are ignored.
    pub fn parse(text: &str) -> Self {
        let mut brief = Brief::default();
        for line in text.lines() {
            let line = line.trim();
            if let Some(v) = line.strip_prefix("TASK:") {
                brief.task = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("CONTEXT:") {
                brief.context = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("FILES_TO_EXAMINE:") {
                brief.files_to_examine = split_list(v);
            } else if let Some(v) = line.strip_prefix("IMPLEMENTATION_APPROACH:") {
                brief.implementation_approach = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("POTENTIAL_ISSUES:") {
                brief.potential_issues = split_list(v);
            } else if let Some(v) = line.strip_prefix("SUCCESS_CRITERIA:") {
                brief.success_criteria = split_list(v);
            }
        }
        brief
    }

    pub fn has_task(&self) -> bool {
        !self.task.is_empty()
    }

    /// Render the non-empty fields back into `KEY: value` lines.
    pub fn render(&self) -> String {
        let fields = [
            ("TASK", self.task.clone()),
            ("CONTEXT", self.context.clone()),
            ("FILES_TO_EXAMINE", self.files_to_examine.join(", ")),
            ("IMPLEMENTATION_APPROACH", self.implementation_approach.clone()),
            ("POTENTIAL_ISSUES", self.potential_issues.join(", ")),
            ("SUCCESS_CRITERIA", self.success_criteria.join(", ")),
        ];
        fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The first `TASK:` line of a reply, or the whole trimmed reply.
pub fn extract_task(reply: &str) -> String {
    reply
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("TASK:"))
        .map(|task| task.trim().to_string())
        .unwrap_or_else(|| reply.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_brief_fields() {
        let text = "\
TASK: Add a /health endpoint
CONTEXT: HTTP server in main.go
FILES_TO_EXAMINE: main.go, server/routes.go
SUCCESS_CRITERIA: endpoint returns 200, tests pass
";
        let brief = Brief::parse(text);
        assert_eq!(brief.task, "Add a /health endpoint");
        assert_eq!(brief.files_to_examine, vec!["main.go", "server/routes.go"]);
        assert_eq!(brief.success_criteria.len(), 2);
        assert!(brief.potential_issues.is_empty());
    }

    #[test]
    fn extract_task_falls_back_to_whole_reply() {
        assert_eq!(extract_task("intro\n  TASK: do it  \nTASK: later"), "do it");
        assert_eq!(extract_task("  just do the thing \n"), "just do the thing");
    }

    #[test]
    fn render_skips_empty_fields() {
        let brief = Brief::parse(
            "ACTION: LIST_FILES\nTASK: Add /health\nPOTENTIAL_ISSUES: port clash,  \n",
        );
        assert_eq!(brief.render(), "TASK: Add /health\nPOTENTIAL_ISSUES: port clash");
        assert_eq!(Brief::default().render(), "");
    }
}
