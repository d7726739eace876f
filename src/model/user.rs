use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Ord, PartialOrd)]
pub enum UserTier {
    Premium = 3,
    Lite = 2,
    Default = 1,
}

/// Authoritative per-user record. Credit balances and subscription state
/// live together so a single conditional update covers every ledger
/// mutation; `version` is the compare-and-set token bumped by the store
/// on each committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: Uuid,
    pub telegram_user_id: u64,
    /// Allowance that refreshes on the tier's cadence. Never negative.
    pub allowed_tokens: u32,
    /// Referral/promotion credits. Never auto-reset.
    pub additional_tokens: u32,
    /// Audit counter: one unit per successful charge, not per token spent.
    pub used_tokens: u64,
    pub tier: UserTier,
    pub tier_expires_at: Option<DateTime<Utc>>,
    pub tokens_last_refresh: DateTime<Utc>,
    pub referral_count: u32,
    /// Cumulative referral reward already paid out, so level rewards are
    /// granted as deltas and never twice.
    pub referral_tokens_granted: u32,
    pub referred_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl UserAccount {
    pub fn new(telegram_user_id: u64, initial_tokens: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            telegram_user_id,
            allowed_tokens: initial_tokens,
            additional_tokens: 0,
            used_tokens: 0,
            tier: UserTier::Default,
            tier_expires_at: None,
            tokens_last_refresh: now,
            referral_count: 0,
            referral_tokens_granted: 0,
            referred_by: None,
            created_at: now,
            version: 0,
        }
    }

    /// An expired or missing subscription behaves as DEFAULT.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> UserTier {
        match (self.tier, self.tier_expires_at) {
            (UserTier::Default, _) => UserTier::Default,
            (tier, Some(expires_at)) if expires_at > now => tier,
            _ => UserTier::Default,
        }
    }

    pub fn balance(&self) -> u32 {
        self.allowed_tokens + self.additional_tokens
    }
}
