//! Workflow health checks over the transition history.

use thiserror::Error;

use crate::core::types::{Role, Transition};

const LOOP_WINDOW: usize = 3;
const ESCALATION_WINDOW: usize = 5;
const MAX_ESCALATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("loop detected: {from} -> {to} repeated")]
    LoopDetected { from: Role, to: Role },
    #[error("excessive EM interventions: {count} of the last {window} transitions returned to planning")]
    ExcessiveEscalation { count: usize, window: usize },
}

/// Run every health check against `history`.
pub fn check_health(history: &[Transition]) -> Result<(), HealthError> {
    detect_loop(history)?;
    detect_excessive_escalation(history)
}

/// Fail when a transition in the trailing window repeats two steps later.
pub fn detect_loop(history: &[Transition]) -> Result<(), HealthError> {
    if history.len() < LOOP_WINDOW {
        return Ok(());
    }
    let recent = &history[history.len() - LOOP_WINDOW..];
    for i in 0..recent.len() - 2 {
        let (a, b) = (&recent[i], &recent[i + 2]);
        if a.from == b.from && a.to == b.to {
            return Err(HealthError::LoopDetected {
                from: a.from,
                to: a.to,
            });
        }
    }
    Ok(())
}

/// Fail when too many recent transitions went back to the manager.
pub fn detect_excessive_escalation(history: &[Transition]) -> Result<(), HealthError> {
    let start = history.len().saturating_sub(ESCALATION_WINDOW);
    let count = history[start..]
        .iter()
        .filter(|t| t.to == Role::Manager)
        .count();
    if count > MAX_ESCALATIONS {
        return Err(HealthError::ExcessiveEscalation {
            count,
            window: ESCALATION_WINDOW,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hops(pairs: &[(Role, Role)]) -> Vec<Transition> {
        pairs
            .iter()
            .map(|&(from, to)| Transition::now(from, to, "test"))
            .collect()
    }

    #[test]
    fn ping_pong_is_a_loop() {
        let history = hops(&[
            (Role::Engineer, Role::Qa),
            (Role::Qa, Role::Engineer),
            (Role::Engineer, Role::Qa),
        ]);
        assert_eq!(
            detect_loop(&history),
            Err(HealthError::LoopDetected {
                from: Role::Engineer,
                to: Role::Qa
            })
        );
    }

    #[test]
    fn forward_progress_is_not_a_loop() {
        let history = hops(&[
            (Role::Manager, Role::Engineer),
            (Role::Engineer, Role::Qa),
            (Role::Qa, Role::TechLead),
        ]);
        assert!(detect_loop(&history).is_ok());
        assert!(detect_loop(&history[..2]).is_ok());
    }

    #[test]
    fn only_trailing_window_is_inspected() {
        let history = hops(&[
            (Role::Engineer, Role::Qa),
            (Role::Qa, Role::Engineer),
            (Role::Engineer, Role::Qa),
            (Role::Qa, Role::TechLead),
            (Role::TechLead, Role::Manager),
            (Role::Manager, Role::Engineer),
        ]);
        assert!(detect_loop(&history).is_ok());
    }

    #[test]
    fn four_escalations_in_five_fail() {
        let history = hops(&[
            (Role::Engineer, Role::Manager),
            (Role::Manager, Role::Manager),
            (Role::Manager, Role::Engineer),
            (Role::Engineer, Role::Manager),
            (Role::TechLead, Role::Manager),
        ]);
        let err = detect_excessive_escalation(&history).expect_err("escalation");
        assert!(err.to_string().contains("excessive EM interventions"));
    }

    #[test]
    fn three_escalations_in_five_pass() {
        let history = hops(&[
            (Role::Engineer, Role::Manager),
            (Role::Manager, Role::Engineer),
            (Role::Engineer, Role::Qa),
            (Role::Qa, Role::Manager),
            (Role::TechLead, Role::Manager),
        ]);
        assert!(detect_excessive_escalation(&history).is_ok());
        assert!(check_health(&history).is_ok());
    }
}
