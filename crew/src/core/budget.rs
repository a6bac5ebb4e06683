//! Wall-clock budget helpers shared by the controller and external calls.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("workflow deadline exceeded"));
    }
    Ok(remaining)
}

/// Clamp a per-call timeout to whatever is left before `deadline`.
pub fn clamp_to_deadline(timeout: Duration, deadline: Instant) -> Result<Duration> {
    Ok(timeout.min(remaining_budget(deadline)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_deadline_is_an_error() {
        let err = remaining_budget(Instant::now()).expect_err("expired");
        assert!(err.to_string().contains("deadline"));
    }

    #[test]
    fn clamp_uses_the_smaller_budget() {
        let deadline = Instant::now() + Duration::from_secs(3600);
        let clamped = clamp_to_deadline(Duration::from_secs(5), deadline).expect("clamp");
        assert_eq!(clamped, Duration::from_secs(5));

        let deadline = Instant::now() + Duration::from_secs(2);
        let clamped = clamp_to_deadline(Duration::from_secs(60), deadline).expect("clamp");
        assert!(clamped <= Duration::from_secs(2));
    }
}
