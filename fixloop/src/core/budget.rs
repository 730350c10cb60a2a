//! Session time budget helpers.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("session timed out"));
    }
    Ok(remaining)
}

/// Clip a per-call timeout to the session deadline, if one is set.
pub fn clip_to_deadline(timeout: Duration, deadline: Option<Instant>) -> Result<Duration> {
    match deadline {
        Some(deadline) => Ok(timeout.min(remaining_budget(deadline)?)),
        None => Ok(timeout),
    }
}
