mod model;

pub use model::{AllowResult, RateWindow};

use chrono::Utc;
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::TierPolicies;
use crate::model::user::UserTier;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limited, retry after {retry_after:?}")]
    Limited { retry_after: Duration },
    /// Limiter storage failure. The limiter fails closed; callers with a
    /// degraded-mode policy can match on this variant and override.
    #[error("Rate limiter unavailable: {0}")]
    Unavailable(String),
}

/// Per-user sliding-ish window limiter, independent of credit balance.
/// Windows reset lazily on access; the check-and-decrement runs under the
/// map's entry guard so two racing requests cannot share the last slot.
pub struct RateLimitService {
    windows: DashMap<Uuid, RateWindow>,
    tiers: TierPolicies,
}

impl RateLimitService {
    pub fn new(tiers: TierPolicies) -> Self {
        info!("Initializing rate limit service");
        Self {
            windows: DashMap::new(),
            tiers,
        }
    }

    pub fn allow(&self, user_id: Uuid, tier: UserTier) -> Result<AllowResult, RateLimitError> {
        // Deliberate business rule: PREMIUM is never throttled.
        if tier == UserTier::Premium {
            return Ok(AllowResult::allowed());
        }

        let policy = self.tiers.policy(tier);
        let now = Utc::now();

        let mut window = self.windows.entry(user_id).or_insert(RateWindow {
            window_start: now,
            remaining: policy.max_requests,
        });

        let elapsed = now
            .signed_duration_since(window.window_start)
            .to_std()
            .unwrap_or_default();
        if elapsed >= policy.window {
            window.window_start = now;
            window.remaining = policy.max_requests;
        }

        if window.remaining > 0 {
            window.remaining -= 1;
            Ok(AllowResult::allowed())
        } else {
            let retry_after = policy.window.saturating_sub(elapsed);
            Ok(AllowResult::throttled(retry_after))
        }
    }
}
