//! Line-oriented parser for `ACTION:` blocks in model replies.
//!
//! The reply text is produced by an LLM and is unreliable, so parsing never
//! fails: malformed or unknown blocks are dropped and everything else is kept
//! in order of appearance.

use serde::Serialize;
use tracing::debug;

/// A typed side effect requested by a role step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    ExecuteCommand { command: String },
    ListFiles { path: String },
    FindFiles { pattern: String, search_path: String },
    GiveUp,
}

impl Action {
    /// Short label for logs and transcripts.
    pub fn label(&self) -> String {
        match self {
            Action::ReadFile { path } => format!("READ_FILE {path}"),
            Action::WriteFile { path, .. } => format!("WRITE_FILE {path}"),
            Action::ExecuteCommand { command } => format!("EXECUTE_COMMAND {command}"),
            Action::ListFiles { path } => format!("LIST_FILES {path}"),
            Action::FindFiles {
                pattern,
                search_path,
            } => format!("FIND_FILES {pattern} in {search_path}"),
            Action::GiveUp => "GIVE_UP".to_string(),
        }
    }
}

/// In-progress action while its lines are being read.
#[derive(Debug, Default)]
struct Draft {
    kind: String,
    path: Option<String>,
    command: Option<String>,
    pattern: Option<String>,
    search_path: Option<String>,
    content: Option<Vec<String>>,
}

impl Draft {
    fn open(kind: &str) -> Self {
        Self {
            kind: kind.trim().to_ascii_uppercase(),
            ..Self::default()
        }
    }

    fn in_content(&self) -> bool {
        self.content.is_some()
    }

    fn finish(self) -> Option<Action> {
        let content = self.content.map(|lines| join_content(&lines));
        let action = match self.kind.as_str() {
            "READ_FILE" => Action::ReadFile { path: self.path? },
            "WRITE_FILE" => Action::WriteFile {
                path: self.path?,
                content: content.unwrap_or_default(),
            },
            "EXECUTE_COMMAND" => Action::ExecuteCommand {
                command: self.command?,
            },
            "LIST_FILES" => Action::ListFiles {
                path: self.path.unwrap_or_else(|| ".".to_string()),
            },
            "FIND_FILES" => Action::FindFiles {
                pattern: self.pattern?,
                search_path: self.search_path.unwrap_or_else(|| ".".to_string()),
            },
            "GIVE_UP" => Action::GiveUp,
            other => {
                debug!(kind = other, "ignoring unknown action type");
                return None;
            }
        };
        Some(action)
    }
}

/// Parse every `ACTION:` block in `text`.
pub fn parse_actions(text: &str) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut current: Option<Draft> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(kind) = trimmed.strip_prefix("ACTION:") {
            flush(&mut current, &mut actions);
            current = Some(Draft::open(kind));
            continue;
        }
        let Some(draft) = current.as_mut() else {
            continue;
        };
        if draft.in_content() {
            if trimmed.starts_with("```") {
                continue;
            }
            if let Some(lines) = draft.content.as_mut() {
                lines.push(line.to_string());
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("CONTENT:") {
            let mut lines = Vec::new();
            if !rest.trim().is_empty() {
                lines.push(rest.trim_start().to_string());
            }
            draft.content = Some(lines);
        } else if let Some(value) = trimmed.strip_prefix("SEARCH_PATH:") {
            draft.search_path = Some(value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix("PATH:") {
            draft.path = Some(value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix("COMMAND:") {
            draft.command = Some(value.trim().to_string());
        } else if let Some(value) = trimmed.strip_prefix("PATTERN:") {
            draft.pattern = Some(value.trim().to_string());
        }
    }
    flush(&mut current, &mut actions);

    debug!(count = actions.len(), "parsed actions");
    actions
}

fn flush(current: &mut Option<Draft>, actions: &mut Vec<Action>) {
    if let Some(action) = current.take().and_then(Draft::finish) {
        actions.push(action);
    }
}

/// Join content lines, dropping blank lines at either edge.
fn join_content(lines: &[String]) -> String {
    let start = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |i| i + 1);
    lines[start..end].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_block_collects_multiline_content() {
        let actions = parse_actions("ACTION: WRITE_FILE\nPATH: a.go\nCONTENT:\nhello\nworld\n");
        assert_eq!(
            actions,
            vec![Action::WriteFile {
                path: "a.go".to_string(),
                content: "hello\nworld".to_string(),
            }]
        );
    }

    #[test]
    fn code_fences_are_skipped_and_indentation_kept() {
        let text = "ACTION: WRITE_FILE\nPATH: main.go\nCONTENT:\n```go\nfunc main() {\n\tprintln(1)\n}\n```\n";
        let actions = parse_actions(text);
        assert_eq!(
            actions,
            vec![Action::WriteFile {
                path: "main.go".to_string(),
                content: "func main() {\n\tprintln(1)\n}".to_string(),
            }]
        );
    }

    #[test]
    fn order_is_preserved_and_content_ends_at_next_action() {
        let text = "\
Let me start.
ACTION: READ_FILE
PATH: go.mod
ACTION: WRITE_FILE
PATH: x.txt
CONTENT:
PATH: not-a-field
ACTION: EXECUTE_COMMAND
COMMAND: go build .
";
        let actions = parse_actions(text);
        assert_eq!(
            actions,
            vec![
                Action::ReadFile {
                    path: "go.mod".to_string()
                },
                Action::WriteFile {
                    path: "x.txt".to_string(),
                    content: "PATH: not-a-field".to_string(),
                },
                Action::ExecuteCommand {
                    command: "go build .".to_string()
                },
            ]
        );
    }

    #[test]
    fn last_field_occurrence_wins() {
        let actions = parse_actions("ACTION: READ_FILE\nPATH: a\nPATH: b\n");
        assert_eq!(
            actions,
            vec![Action::ReadFile {
                path: "b".to_string()
            }]
        );
    }

    #[test]
    fn find_files_reads_pattern_and_search_path() {
        let actions = parse_actions("ACTION: FIND_FILES\nPATTERN: handler\nSEARCH_PATH: internal\n");
        assert_eq!(
            actions,
            vec![Action::FindFiles {
                pattern: "handler".to_string(),
                search_path: "internal".to_string(),
            }]
        );
    }

    #[test]
    fn malformed_and_unknown_blocks_are_ignored() {
        let text = "CONTENT:\norphan\nACTION: DANCE\nPATH: x\nACTION: READ_FILE\nACTION: GIVE_UP\n";
        assert_eq!(parse_actions(text), vec![Action::GiveUp]);
    }

    #[test]
    fn empty_input_yields_no_actions() {
        assert!(parse_actions("").is_empty());
        assert!(parse_actions("just prose, no markers").is_empty());
    }
}
