//! Structured rejection format emitted by the tech lead.
//!
//! ```text
//! REJECTION_REASON: security_concerns
//! SPECIFIC_ISSUES:
//! - hardcoded credential in config.go
//! REQUIRED_ACTIONS:
//! - Move secrets to environment configuration
//! ROUTE_TO: engineering_manager
//! ```

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

const ROUTE_TO_MANAGER: &str = "route_to: engineering_manager";

/// Why the tech lead sent the work back to planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RequirementsNotMet,
    SecurityConcerns,
    UnnecessaryDuplication,
    PatternDeviation,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 4] = [
        RejectionReason::RequirementsNotMet,
        RejectionReason::SecurityConcerns,
        RejectionReason::UnnecessaryDuplication,
        RejectionReason::PatternDeviation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectionReason::RequirementsNotMet => "requirements_not_met",
            RejectionReason::SecurityConcerns => "security_concerns",
            RejectionReason::UnnecessaryDuplication => "unnecessary_duplication",
            RejectionReason::PatternDeviation => "pattern_deviation",
        }
    }

    fn default_actions(self) -> &'static [&'static str] {
        match self {
            RejectionReason::RequirementsNotMet => &[
                "Re-read the task brief and success criteria",
                "Implement the missing functionality before resubmitting",
            ],
            RejectionReason::SecurityConcerns => &[
                "Remove hardcoded secrets and unsafe input handling",
                "Follow the project's existing security practices",
            ],
            RejectionReason::UnnecessaryDuplication => &[
                "Reuse the existing implementation instead of duplicating it",
                "Extract shared logic where duplication is unavoidable",
            ],
            RejectionReason::PatternDeviation => &[
                "Align the change with the established project patterns",
                "Document any intentional deviation in the brief",
            ],
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectionReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_ascii_lowercase();
        RejectionReason::ALL
            .into_iter()
            .find(|r| r.as_str() == needle)
            .ok_or_else(|| anyhow!("unknown rejection reason '{s}'"))
    }
}

/// A parsed or to-be-rendered rejection block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub issues: Vec<String>,
    pub existing_patterns: Vec<String>,
    pub required_actions: Vec<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Issues,
    Patterns,
    Actions,
}

impl Rejection {
    pub fn new(reason: RejectionReason, issues: Vec<String>) -> Self {
        Self {
            reason,
            issues,
            existing_patterns: Vec::new(),
            required_actions: Vec::new(),
        }
    }

    /// Render the wire format. Empty required actions fall back to per-reason defaults.
    pub fn render(&self) -> String {
        let mut out = format!("REJECTION_REASON: {}\nSPECIFIC_ISSUES:\n", self.reason);
        for issue in &self.issues {
            out.push_str(&format!("- {issue}\n"));
        }
        if !self.existing_patterns.is_empty() {
            out.push_str("EXISTING_PATTERNS:\n");
            for pattern in &self.existing_patterns {
                out.push_str(&format!("- {pattern}\n"));
            }
        }
        out.push_str("REQUIRED_ACTIONS:\n");
        if self.required_actions.is_empty() {
            for action in self.reason.default_actions() {
                out.push_str(&format!("- {action}\n"));
            }
        } else {
            for action in &self.required_actions {
                out.push_str(&format!("- {action}\n"));
            }
        }
        out.push_str("ROUTE_TO: engineering_manager");
        out
    }

    /// Find a rejection block anywhere in `text`. Markers are case-insensitive.
    pub fn parse(text: &str) -> Option<Self> {
        let mut rejection: Option<Rejection> = None;
        let mut section: Option<Section> = None;
        for line in text.lines() {
            let trimmed = line.trim();
            let upper = trimmed.to_ascii_uppercase();
            if let Some(value) = upper.strip_prefix("REJECTION_REASON:") {
                rejection = value
                    .parse()
                    .ok()
                    .map(|reason| Rejection::new(reason, Vec::new()));
                section = None;
                continue;
            }
            let Some(current) = rejection.as_mut() else {
                continue;
            };
            if upper.starts_with("SPECIFIC_ISSUES:") {
                section = Some(Section::Issues);
            } else if upper.starts_with("EXISTING_PATTERNS:") {
                section = Some(Section::Patterns);
            } else if upper.starts_with("REQUIRED_ACTIONS:") {
                section = Some(Section::Actions);
            } else if upper.starts_with("ROUTE_TO:") {
                section = None;
            } else if let Some(item) = trimmed.strip_prefix('-') {
                let item = item.trim().to_string();
                match section {
                    Some(Section::Issues) => current.issues.push(item),
                    Some(Section::Patterns) => current.existing_patterns.push(item),
                    Some(Section::Actions) => current.required_actions.push(item),
                    None => {}
                }
            }
        }
        rejection
    }
}

/// True if any structured rejection token appears in `text`.
pub fn detect(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rejection_reason:")
        || lower.contains(ROUTE_TO_MANAGER)
        || RejectionReason::ALL
            .iter()
            .any(|r| lower.contains(r.as_str()))
}
