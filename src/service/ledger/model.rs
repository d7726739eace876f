use std::fmt;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendReason {
    Search,
    DrugUpdate,
}

impl fmt::Display for SpendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpendReason::Search => write!(f, "search"),
            SpendReason::DrugUpdate => write!(f, "drug_update"),
        }
    }
}

/// One credit-consuming action, kept as a value so charges are auditable
/// and testable in isolation.
#[derive(Debug, Clone, Copy)]
pub struct SpendRequest {
    pub user_id: Uuid,
    pub amount: u32,
    pub reason: SpendReason,
}

#[derive(Debug, Clone, Copy)]
pub struct ChargeResult {
    pub allowed_tokens: u32,
    pub additional_tokens: u32,
    pub used_tokens: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferralResult {
    pub referral_count: u32,
    pub level: u32,
    /// Tokens granted by this attribution; zero unless a level boundary
    /// was crossed.
    pub granted_tokens: u32,
}

/// Referral levels: (cumulative referral count, absolute cumulative token
/// reward for reaching that level). Rewards are paid as the delta against
/// what was already granted, never re-granted.
pub const REFERRAL_LEVELS: &[(u32, u32)] = &[(1, 10), (3, 25), (5, 50), (10, 120), (25, 400), (50, 1000)];

pub fn referral_level(referral_count: u32) -> u32 {
    REFERRAL_LEVELS
        .iter()
        .take_while(|(threshold, _)| *threshold <= referral_count)
        .count() as u32
}

pub fn referral_reward(level: u32) -> u32 {
    if level == 0 {
        return 0;
    }
    REFERRAL_LEVELS
        .get(level as usize - 1)
        .map(|(_, reward)| *reward)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_monotonic_in_count() {
        assert_eq!(referral_level(0), 0);
        assert_eq!(referral_level(1), 1);
        assert_eq!(referral_level(2), 1);
        assert_eq!(referral_level(3), 2);
        assert_eq!(referral_level(49), 5);
        assert_eq!(referral_level(50), 6);
        assert_eq!(referral_level(500), 6);
    }

    #[test]
    fn rewards_are_absolute_per_level() {
        assert_eq!(referral_reward(0), 0);
        assert_eq!(referral_reward(1), 10);
        assert_eq!(referral_reward(6), 1000);
    }
}
