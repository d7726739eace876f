use std::time::Duration;

use chrono::{DateTime, Utc};

/// Lazily reset per-user window. `remaining` never exceeds the tier's
/// maximum and never goes below zero.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub window_start: DateTime<Utc>,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct AllowResult {
    pub allowed: bool,
    /// Zero when allowed; otherwise how long until the window resets.
    pub retry_after: Duration,
}

impl AllowResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    pub fn throttled(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}
