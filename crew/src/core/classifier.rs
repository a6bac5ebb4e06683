//! Error classification and outcome assessment.
//!
//! All free-text sniffing of step outcomes happens here. The router only ever
//! sees the typed [`Assessment`] produced by [`ErrorClassifier::assess`].

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::rejection;
use crate::core::types::StepOutcome;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UndefinedSymbol,
    SyntaxError,
    ImportCycle,
    MissingDependency,
    PermissionError,
    TestFailure,
    NoTests,
    RuntimeError,
    TypeError,
    NetworkError,
    GitError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::UndefinedSymbol => "undefined_symbol",
            ErrorCategory::SyntaxError => "syntax_error",
            ErrorCategory::ImportCycle => "import_cycle",
            ErrorCategory::MissingDependency => "missing_dependency",
            ErrorCategory::PermissionError => "permission_error",
            ErrorCategory::TestFailure => "test_failure",
            ErrorCategory::NoTests => "no_tests",
            ErrorCategory::RuntimeError => "runtime_error",
            ErrorCategory::TypeError => "type_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::GitError => "git_error",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Build-breaking categories the engineer is expected to fix in place.
    pub fn is_critical_build_error(self) -> bool {
        matches!(
            self,
            ErrorCategory::UndefinedSymbol
                | ErrorCategory::SyntaxError
                | ErrorCategory::TypeError
                | ErrorCategory::ImportCycle
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying an outcome's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: ErrorCategory,
    /// 1 (benign) to 4 (fatal).
    pub severity: u8,
    pub hints: Vec<&'static str>,
}

impl Classification {
    fn unknown() -> Self {
        Self {
            category: ErrorCategory::Unknown,
            severity: 2,
            hints: vec!["Review error logs", "Check implementation logic"],
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.severity <= 3
    }

    pub fn requires_external_help(&self) -> bool {
        self.severity >= 3
            && matches!(
                self.category,
                ErrorCategory::MissingDependency
                    | ErrorCategory::PermissionError
                    | ErrorCategory::NetworkError
            )
    }
}

struct PatternSpec {
    pattern: &'static str,
    category: ErrorCategory,
    severity: u8,
    hints: [&'static str; 3],
}

const PATTERNS: &[PatternSpec] = &[
    PatternSpec {
        pattern: r"undefined:\s*\w+|undeclared name:\s*\w+|cannot find[\s\w]*:\s*\w+",
        category: ErrorCategory::UndefinedSymbol,
        severity: 4,
        hints: [
            "Check import statements",
            "Verify function/variable names",
            "Add missing declarations",
        ],
    },
    PatternSpec {
        pattern: r"syntax error|unexpected \w+|expected \w+",
        category: ErrorCategory::SyntaxError,
        severity: 4,
        hints: [
            "Check brackets, braces, and parentheses",
            "Verify function signatures",
            "Check for missing semicolons or commas",
        ],
    },
    PatternSpec {
        pattern: r"import cycle|circular import|cyclic import",
        category: ErrorCategory::ImportCycle,
        severity: 3,
        hints: [
            "Restructure package dependencies",
            "Create interface abstraction",
            "Move shared code to separate package",
        ],
    },
    PatternSpec {
        pattern: r"module\s+\w+\s+not found|no such file or directory|package \w+ is not in goroot",
        category: ErrorCategory::MissingDependency,
        severity: 3,
        hints: [
            "Run 'go mod tidy'",
            "Add missing dependency with 'go get'",
            "Check module path in go.mod",
        ],
    },
    PatternSpec {
        pattern: r"permission denied|access denied|operation not permitted",
        category: ErrorCategory::PermissionError,
        severity: 3,
        hints: [
            "Check file permissions",
            "Verify write access to target directory",
            "Run with appropriate privileges",
        ],
    },
    PatternSpec {
        pattern: r"test failed|assertion failed|panic: test timed out",
        category: ErrorCategory::TestFailure,
        severity: 2,
        hints: [
            "Review test logic and assertions",
            "Check test data and setup",
            "Verify function behavior",
        ],
    },
    PatternSpec {
        pattern: r"no tests to run|no test files",
        category: ErrorCategory::NoTests,
        severity: 1,
        hints: [
            "Create test files following the project naming convention",
            "Add test functions for the new behavior",
            "Check test file naming conventions",
        ],
    },
    PatternSpec {
        pattern: r"panic:|runtime error|nil pointer dereference|index out of range",
        category: ErrorCategory::RuntimeError,
        severity: 4,
        hints: [
            "Add nil checks",
            "Validate array/slice bounds",
            "Add error handling",
        ],
    },
    PatternSpec {
        pattern: r"type \w+ has no field \w+|cannot use \w+ as \w+ value",
        category: ErrorCategory::TypeError,
        severity: 3,
        hints: [
            "Check struct field names",
            "Verify type compatibility",
            "Add type conversions where needed",
        ],
    },
    PatternSpec {
        pattern: r"connection refused|timeout|no route to host|dial tcp.*refused",
        category: ErrorCategory::NetworkError,
        severity: 2,
        hints: [
            "Check service availability",
            "Verify network connectivity",
            "Review endpoint URLs and ports",
        ],
    },
    PatternSpec {
        pattern: r"fatal: not a git repository|git.*error|merge conflict",
        category: ErrorCategory::GitError,
        severity: 2,
        hints: [
            "Initialize git repository if needed",
            "Resolve merge conflicts",
            "Check git configuration",
        ],
    },
];

const TEST_FILE_MARKERS: &[&str] = &[
    "_test.go", ".test.js", ".test.ts", ".spec.js", ".spec.ts", "test_", "_test.py", "/test/",
    "/tests/",
];

const NON_TESTABLE_MARKERS: &[&str] = &[
    "non-testable",
    "cannot test",
    "untestable",
    "no tests needed",
    "testing not applicable",
    "manual testing only",
    "ui only",
    "configuration only",
];

const QUALITY_KEYWORDS: &[&str] = &[
    "code quality",
    "lint",
    "format",
    "style",
    "naming convention",
    "complexity",
    "duplication",
    "security",
    "performance",
    "maintainability",
];

const ARCHITECTURE_KEYWORDS: &[&str] = &[
    "architecture",
    "design pattern",
    "separation of concerns",
    "coupling",
    "cohesion",
    "dependency injection",
    "interface design",
    "api design",
    "structure",
];

/// True if `path` looks like a test file in any supported toolchain.
pub fn is_test_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    TEST_FILE_MARKERS.iter().any(|m| lower.contains(m))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Typed view of a step outcome; the only input the router consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub success: bool,
    pub files_touched: usize,
    pub test_files_touched: bool,
    /// Message or error mentions "failed" even though the step may report success.
    pub failure_wording: bool,
    pub classification: Classification,
    pub structured_rejection: bool,
    pub quality_issue: bool,
    pub architecture_issue: bool,
    pub non_testable: bool,
}

struct CompiledPattern {
    regex: Regex,
    spec: &'static PatternSpec,
}

/// Ordered pattern matcher: the most severe match wins, ties go to the
/// earlier declaration.
pub struct ErrorClassifier {
    patterns: Vec<CompiledPattern>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        let patterns = PATTERNS
            .iter()
            .map(|spec| CompiledPattern {
                regex: Regex::new(&format!("(?i){}", spec.pattern))
                    .expect("built-in classifier pattern should be valid"),
                spec,
            })
            .collect();
        Self { patterns }
    }

    /// Classify arbitrary text.
    pub fn classify(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let mut best: Option<&PatternSpec> = None;
        for compiled in &self.patterns {
            if !compiled.regex.is_match(&lower) {
                continue;
            }
            if best.is_none_or(|b| compiled.spec.severity > b.severity) {
                best = Some(compiled.spec);
            }
        }
        match best {
            Some(spec) => Classification {
                category: spec.category,
                severity: spec.severity,
                hints: spec.hints.to_vec(),
            },
            None => Classification::unknown(),
        }
    }

    /// Classify the error, output and message of an outcome together.
    pub fn classify_outcome(&self, outcome: &StepOutcome) -> Classification {
        self.classify(&format!(
            "{} {} {}",
            outcome.error, outcome.output, outcome.message
        ))
    }

    /// Reduce an outcome to the typed facts routing depends on.
    pub fn assess(&self, outcome: &StepOutcome) -> Assessment {
        let error = outcome.error.to_lowercase();
        let message = outcome.message.to_lowercase();
        let classification = if outcome.success {
            Classification::unknown()
        } else {
            self.classify_outcome(outcome)
        };
        Assessment {
            success: outcome.success,
            files_touched: outcome.files_modified.len(),
            test_files_touched: outcome.files_modified.iter().any(|f| is_test_file(f)),
            failure_wording: message.contains("failed") || error.contains("failed"),
            classification,
            structured_rejection: rejection::detect(&outcome.error),
            quality_issue: contains_any(&error, QUALITY_KEYWORDS),
            architecture_issue: contains_any(&error, ARCHITECTURE_KEYWORDS),
            non_testable: contains_any(&message, NON_TESTABLE_MARKERS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_symbol_is_critical() {
        let c = ErrorClassifier::new().classify("./main.go:12:2: undefined: foo");
        assert_eq!(c.category, ErrorCategory::UndefinedSymbol);
        assert_eq!(c.severity, 4);
        assert!(c.category.is_critical_build_error());
        assert!(!c.is_recoverable());
    }

    #[test]
    fn most_severe_match_wins_over_benign_warning() {
        let text = "testing: warning: no tests to run\nfatal: not a git repository";
        let c = ErrorClassifier::new().classify(text);
        assert_eq!(c.category, ErrorCategory::GitError);
        assert_eq!(c.severity, 2);
    }

    #[test]
    fn equal_severity_keeps_declaration_order() {
        // missing_dependency and permission_error are both severity 3.
        let text = "open x: no such file or directory; permission denied";
        let c = ErrorClassifier::new().classify(text);
        assert_eq!(c.category, ErrorCategory::MissingDependency);
    }

    #[test]
    fn runtime_panic_outranks_test_timeout() {
        let c = ErrorClassifier::new().classify("panic: test timed out after 10m0s");
        assert_eq!(c.category, ErrorCategory::RuntimeError);
    }

    #[test]
    fn unmatched_text_is_unknown_with_generic_hints() {
        let c = ErrorClassifier::new().classify("something odd happened");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert_eq!(c.severity, 2);
        assert_eq!(c.hints, vec!["Review error logs", "Check implementation logic"]);
    }

    #[test]
    fn classify_is_deterministic() {
        let classifier = ErrorClassifier::new();
        let text = "cannot use x (variable of type int) as string value";
        assert_eq!(classifier.classify(text), classifier.classify(text));
    }

    #[test]
    fn external_help_needs_severity_and_category() {
        let classifier = ErrorClassifier::new();
        assert!(classifier.classify("permission denied").requires_external_help());
        // network errors are severity 2, below the threshold.
        assert!(!classifier.classify("connection refused").requires_external_help());
    }

    #[test]
    fn assessment_recognizes_test_files_and_markers() {
        let outcome = StepOutcome {
            success: true,
            files_modified: vec!["pkg/server/handler_test.go".to_string()],
            ..StepOutcome::default()
        };
        let a = ErrorClassifier::new().assess(&outcome);
        assert!(a.test_files_touched);
        assert_eq!(a.files_touched, 1);

        let outcome = StepOutcome::failed("non-testable code: UI only", "");
        let a = ErrorClassifier::new().assess(&outcome);
        assert!(a.non_testable);
        assert!(!a.structured_rejection);
    }

    #[test]
    fn assessment_flags_quality_and_architecture_in_error_text() {
        let outcome = StepOutcome::failed("review failed", "tight coupling and lint warnings");
        let a = ErrorClassifier::new().assess(&outcome);
        assert!(a.quality_issue);
        assert!(a.architecture_issue);
        assert!(a.failure_wording);
    }
}
