//! Read-only view of the git repository around the working directory.
//!
//! Planning shows the raw status to the model, review shows the diff, and QA
//! and review both need the list of changed paths.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

/// How a path changed, from the porcelain XY code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Untracked,
    Added,
    Modified,
    Deleted,
    Renamed,
    Other,
}

impl ChangeKind {
    fn from_code(code: &str) -> Self {
        if code == "??" {
            return ChangeKind::Untracked;
        }
        // Index column wins over worktree column when both are set.
        let mut kinds = code.chars().filter(|c| *c != ' ').map(|c| match c {
            'A' => ChangeKind::Added,
            'M' => ChangeKind::Modified,
            'D' => ChangeKind::Deleted,
            'R' => ChangeKind::Renamed,
            _ => ChangeKind::Other,
        });
        kinds.next().unwrap_or(ChangeKind::Other)
    }
}

/// One line of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    /// Current path; the new name for renames.
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Repo {
    root: PathBuf,
}

impl Repo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Porcelain status with untracked files listed individually.
    #[instrument(skip_all)]
    pub fn status(&self) -> Result<String> {
        self.capture(&["status", "--porcelain", "-uall"])
    }

    /// Unstaged diff of tracked files.
    #[instrument(skip_all)]
    pub fn diff(&self) -> Result<String> {
        let diff = self.capture(&["diff"])?;
        debug!(bytes = diff.len(), "diff captured");
        Ok(diff)
    }

    #[cfg(test)]
    fn init(&self) -> Result<()> {
        self.capture(&["init", "--quiet"]).map(drop)
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse porcelain status text. Lines too short to carry a path are skipped.
pub fn parse_changes(status: &str) -> Vec<Change> {
    status
        .lines()
        .filter_map(|line| {
            let (code, rest) = (line.get(..2)?, line.get(3..)?);
            let path = match rest.split_once(" -> ") {
                Some((_, renamed)) => renamed,
                None => rest,
            }
            .trim();
            (!path.is_empty()).then(|| Change {
                kind: ChangeKind::from_code(code),
                path: path.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_and_modified() {
        let changes = parse_changes(" M main.go\n?? handler_test.go\n");
        assert_eq!(
            changes,
            vec![
                Change {
                    kind: ChangeKind::Modified,
                    path: "main.go".to_string()
                },
                Change {
                    kind: ChangeKind::Untracked,
                    path: "handler_test.go".to_string()
                },
            ]
        );
    }

    #[test]
    fn rename_reports_the_new_path() {
        let changes = parse_changes("R  old.go -> new.go\n");
        assert_eq!(changes[0].kind, ChangeKind::Renamed);
        assert_eq!(changes[0].path, "new.go");
    }

    #[test]
    fn blank_and_short_lines_are_skipped() {
        let changes = parse_changes("\n M\n D gone.go\n");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn status_lists_untracked_files_in_fresh_repo() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = Repo::new(temp.path());
        repo.init().expect("git init");
        std::fs::write(temp.path().join("main.go"), "package main\n").expect("write");

        let changes = parse_changes(&repo.status().expect("status"));
        assert_eq!(
            changes,
            vec![Change {
                kind: ChangeKind::Untracked,
                path: "main.go".to_string()
            }]
        );
    }

    #[test]
    fn status_outside_repo_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Repo::new(temp.path()).status().expect_err("not a repo");
        assert!(err.to_string().contains("git status"));
    }
}
