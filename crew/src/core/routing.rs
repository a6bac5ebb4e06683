//! Prioritized routing between roles.
//!
//! Each rule names the role it applies to, a predicate over an [`Assessment`],
//! the next stop and a priority. Among the rules for the current role whose
//! predicate holds, the highest priority wins. The table is validated once at
//! construction so that priorities are unique per role and every role has a
//! rule for a plain success and a plain failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::core::classifier::{Assessment, Classification, ErrorCategory, ErrorClassifier};
use crate::core::types::{Role, StepOutcome};

/// Where the workflow goes after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Next {
    Role(Role),
    /// Terminal; the controller finishes the workflow instead of transitioning.
    Complete,
}

impl fmt::Display for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Role(role) => write!(f, "{role}"),
            Next::Complete => f.write_str("complete"),
        }
    }
}

/// One row of the routing table.
#[derive(Clone)]
pub struct RoutingRule {
    pub from: Role,
    /// Human-readable form of the predicate, for listings.
    pub condition: &'static str,
    pub when: fn(&Assessment) -> bool,
    pub to: Next,
    pub reason: &'static str,
    pub priority: u32,
}

impl fmt::Debug for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingRule")
            .field("from", &self.from)
            .field("condition", &self.condition)
            .field("to", &self.to)
            .field("priority", &self.priority)
            .finish()
    }
}

/// The selected rule's target and justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub next: Next,
    pub reason: String,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no routing rule matched for {role} (success={success})")]
    NoRuleMatched { role: Role, success: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleTableError {
    #[error("rules for {role} share priority {priority}: '{first}' and '{second}'")]
    PriorityCollision {
        role: Role,
        priority: u32,
        first: &'static str,
        second: &'static str,
    },
    #[error("no rule for {role} covers a plain {case}")]
    Uncovered { role: Role, case: &'static str },
}

/// A validated, immutable rule table.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<RoutingRule>,
}

impl RuleTable {
    /// Build a table, rejecting priority collisions and missing coverage.
    pub fn new(rules: Vec<RoutingRule>) -> Result<Self, RuleTableError> {
        let table = Self { rules };
        table.validate()?;
        Ok(table)
    }

    /// The built-in table for the four roles.
    pub fn builtin() -> Result<Self, RuleTableError> {
        Self::new(builtin_rules())
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn validate(&self) -> Result<(), RuleTableError> {
        let mut seen: BTreeMap<(Role, u32), &'static str> = BTreeMap::new();
        for rule in &self.rules {
            if let Some(first) = seen.insert((rule.from, rule.priority), rule.condition) {
                return Err(RuleTableError::PriorityCollision {
                    role: rule.from,
                    priority: rule.priority,
                    first,
                    second: rule.condition,
                });
            }
        }
        for role in Role::ALL {
            for (case, sample) in [("success", sample_success()), ("failure", sample_failure())] {
                if self.select(role, &sample).is_none() {
                    return Err(RuleTableError::Uncovered { role, case });
                }
            }
        }
        Ok(())
    }

    fn select(&self, role: Role, assessment: &Assessment) -> Option<&RoutingRule> {
        let mut best: Option<&RoutingRule> = None;
        for rule in self.rules.iter().filter(|r| r.from == role) {
            if !(rule.when)(assessment) {
                continue;
            }
            if best.is_none_or(|b| rule.priority > b.priority) {
                best = Some(rule);
            }
        }
        best
    }
}

/// Routing engine: classifier plus validated rule table.
pub struct Router {
    table: RuleTable,
    classifier: ErrorClassifier,
}

impl Router {
    pub fn new(table: RuleTable, classifier: ErrorClassifier) -> Self {
        Self { table, classifier }
    }

    /// Router over the built-in table and classifier.
    pub fn builtin() -> Result<Self, RuleTableError> {
        Ok(Self::new(RuleTable::builtin()?, ErrorClassifier::new()))
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Assess `outcome` and pick the next stop for `role`.
    pub fn route(&self, role: Role, outcome: &StepOutcome) -> Result<RoutingDecision, RoutingError> {
        let assessment = self.classifier.assess(outcome);
        self.route_assessed(role, &assessment)
    }

    pub fn route_assessed(
        &self,
        role: Role,
        assessment: &Assessment,
    ) -> Result<RoutingDecision, RoutingError> {
        let rule = self
            .table
            .select(role, assessment)
            .ok_or(RoutingError::NoRuleMatched {
                role,
                success: assessment.success,
            })?;
        debug!(
            %role,
            next = %rule.to,
            priority = rule.priority,
            category = %assessment.classification.category,
            "routing rule selected"
        );
        Ok(RoutingDecision {
            next: rule.to,
            reason: rule.reason.to_string(),
            priority: rule.priority,
        })
    }
}

fn sample_success() -> Assessment {
    Assessment {
        success: true,
        files_touched: 1,
        test_files_touched: true,
        failure_wording: false,
        classification: Classification {
            category: ErrorCategory::Unknown,
            severity: 2,
            hints: Vec::new(),
        },
        structured_rejection: false,
        quality_issue: false,
        architecture_issue: false,
        non_testable: false,
    }
}

fn sample_failure() -> Assessment {
    Assessment {
        success: false,
        files_touched: 0,
        test_files_touched: false,
        failure_wording: true,
        ..sample_success()
    }
}

fn failed_with(a: &Assessment, category: ErrorCategory) -> bool {
    !a.success && a.classification.category == category
}

fn builtin_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule {
            from: Role::Manager,
            condition: "success",
            when: |a| a.success,
            to: Next::Role(Role::Engineer),
            reason: "Plan approved, starting implementation",
            priority: 10,
        },
        RoutingRule {
            from: Role::Manager,
            condition: "failure",
            when: |a| !a.success,
            to: Next::Role(Role::Manager),
            reason: "Planning failed, retrying",
            priority: 5,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "success with files touched",
            when: |a| a.success && a.files_touched > 0,
            to: Next::Role(Role::Qa),
            reason: "Implementation complete, needs testing",
            priority: 20,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "success without file changes",
            when: |a| a.success && a.files_touched == 0 && !a.failure_wording,
            to: Next::Role(Role::TechLead),
            reason: "Task completed without file changes, skip to quality review",
            priority: 19,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "failure: critical build error",
            when: |a| !a.success && a.classification.category.is_critical_build_error(),
            to: Next::Role(Role::Engineer),
            reason: "Critical build errors detected, continuing implementation fixes",
            priority: 18,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "failure: runtime error, severity >= 3",
            when: |a| {
                failed_with(a, ErrorCategory::RuntimeError) && a.classification.severity >= 3
            },
            to: Next::Role(Role::Engineer),
            reason: "Runtime errors detected, applying targeted fixes",
            priority: 16,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "failure: missing dependency or permission",
            when: |a| {
                failed_with(a, ErrorCategory::MissingDependency)
                    || failed_with(a, ErrorCategory::PermissionError)
            },
            to: Next::Role(Role::Manager),
            reason: "Dependency or permission issues detected, need planning support",
            priority: 15,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "failure: network or git",
            when: |a| {
                failed_with(a, ErrorCategory::NetworkError) || failed_with(a, ErrorCategory::GitError)
            },
            to: Next::Role(Role::Manager),
            reason: "External system issues detected, need guidance",
            priority: 12,
        },
        RoutingRule {
            from: Role::Engineer,
            condition: "failure",
            when: |a| !a.success,
            to: Next::Role(Role::Manager),
            reason: "Implementation failed, need replanning",
            priority: 5,
        },
        RoutingRule {
            from: Role::Qa,
            condition: "success with test files",
            when: |a| a.success && a.test_files_touched,
            to: Next::Role(Role::TechLead),
            reason: "Tests added and passing, ready for quality review",
            priority: 20,
        },
        RoutingRule {
            from: Role::Qa,
            condition: "failure: test failure, severity >= 2",
            when: |a| failed_with(a, ErrorCategory::TestFailure) && a.classification.severity >= 2,
            to: Next::Role(Role::Engineer),
            reason: "Significant test failures found, implementation needs fixes",
            priority: 17,
        },
        RoutingRule {
            from: Role::Qa,
            condition: "failure: no tests or severity <= 1",
            when: |a| {
                !a.success
                    && (a.classification.category == ErrorCategory::NoTests
                        || a.classification.severity <= 1)
            },
            to: Next::Role(Role::Qa),
            reason: "Missing or insufficient tests, continuing test development",
            priority: 10,
        },
        RoutingRule {
            from: Role::Qa,
            condition: "failure: non-testable code",
            when: |a| !a.success && a.non_testable,
            to: Next::Role(Role::TechLead),
            reason: "Code determined non-testable, skip to quality review",
            priority: 9,
        },
        RoutingRule {
            from: Role::Qa,
            condition: "failure",
            when: |a| !a.success,
            to: Next::Role(Role::Manager),
            reason: "QA process failed, need guidance",
            priority: 5,
        },
        RoutingRule {
            from: Role::TechLead,
            condition: "success",
            when: |a| a.success,
            to: Next::Complete,
            reason: "Quality review passed, workflow complete",
            priority: 20,
        },
        RoutingRule {
            from: Role::TechLead,
            condition: "failure: structured rejection",
            when: |a| !a.success && a.structured_rejection,
            to: Next::Role(Role::Manager),
            reason: "Tech lead structured rejection, routing to manager as requested",
            priority: 18,
        },
        RoutingRule {
            from: Role::TechLead,
            condition: "failure: quality issues",
            when: |a| !a.success && a.quality_issue,
            to: Next::Role(Role::Engineer),
            reason: "Quality issues found, need implementation fixes",
            priority: 15,
        },
        RoutingRule {
            from: Role::TechLead,
            condition: "failure: architecture concerns",
            when: |a| !a.success && a.architecture_issue,
            to: Next::Role(Role::Manager),
            reason: "Architecture concerns, need replanning",
            priority: 14,
        },
        RoutingRule {
            from: Role::TechLead,
            condition: "failure",
            when: |a| !a.success,
            to: Next::Role(Role::Manager),
            reason: "Tech lead review failed, need guidance",
            priority: 5,
        },
    ]
}
