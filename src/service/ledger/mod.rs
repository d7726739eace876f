mod error;
mod model;

pub use error::{LedgerError, ReferralRejection};
pub use model::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{LedgerConfig, TierPolicies};
use crate::model::user::{UserAccount, UserTier};
use crate::service::gateway::{CacheGateway, ResourceKind};
use crate::storage::UserStore;

/// Credit ledger. Every mutation runs as a compare-and-set loop against
/// the authoritative store: load, apply, conditional commit, reload on
/// conflict. The cached profile is invalidated before success is reported.
pub struct LedgerService {
    store: Arc<dyn UserStore>,
    gateway: Arc<CacheGateway>,
    tiers: TierPolicies,
    referral_window: Duration,
    max_retries: u32,
}

impl LedgerService {
    pub fn new(store: Arc<dyn UserStore>, gateway: Arc<CacheGateway>, tiers: TierPolicies, config: &LedgerConfig) -> Self {
        info!("Initializing ledger service");
        Self {
            store,
            gateway,
            tiers,
            referral_window: config.referral_window,
            max_retries: config.max_commit_retries,
        }
    }

    async fn load(&self, user_id: Uuid) -> Result<UserAccount, LedgerError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UnknownUser(user_id))
    }

    async fn invalidate_profile(&self, account: &UserAccount) {
        self.gateway
            .invalidate_best_effort(ResourceKind::Profile, &account.telegram_user_id.to_string())
            .await;
    }

    /// Atomically spends `amount`, drawing the allowance down first and any
    /// shortfall from additional tokens. All-or-nothing: an uncovered spend
    /// mutates nothing.
    pub async fn charge(&self, request: &SpendRequest) -> Result<ChargeResult, LedgerError> {
        if request.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        for _ in 0..self.max_retries {
            let mut user = self.load(request.user_id).await?;

            let available = user.balance();
            if available < request.amount {
                return Err(LedgerError::InsufficientCredits {
                    required: request.amount,
                    available,
                });
            }

            let from_allowed = user.allowed_tokens.min(request.amount);
            user.allowed_tokens -= from_allowed;
            user.additional_tokens -= request.amount - from_allowed;
            // One audit unit per action, independent of the amount.
            user.used_tokens += 1;

            if self.store.update_user(&user).await? {
                self.invalidate_profile(&user).await;
                debug!(
                    "charged user {} {} tokens for {}",
                    user.id, request.amount, request.reason
                );
                return Ok(ChargeResult {
                    allowed_tokens: user.allowed_tokens,
                    additional_tokens: user.additional_tokens,
                    used_tokens: user.used_tokens,
                });
            }
        }
        Err(LedgerError::Contention(request.user_id))
    }

    /// Reverses a charge whose action never happened. The amount comes
    /// back as additional tokens and the audit counter is rolled back by
    /// the one unit the charge added.
    pub async fn refund(&self, user_id: Uuid, amount: u32) -> Result<(), LedgerError> {
        for _ in 0..self.max_retries {
            let mut user = self.load(user_id).await?;
            user.additional_tokens += amount;
            user.used_tokens = user.used_tokens.saturating_sub(1);
            if self.store.update_user(&user).await? {
                self.invalidate_profile(&user).await;
                info!("refunded user {} {} tokens", user.id, amount);
                return Ok(());
            }
        }
        Err(LedgerError::Contention(user_id))
    }

    /// Adds non-expiring credits (referral rewards, promotions, top-ups).
    pub async fn grant(&self, user_id: Uuid, amount: u32) -> Result<(), LedgerError> {
        for _ in 0..self.max_retries {
            let mut user = self.load(user_id).await?;
            user.additional_tokens += amount;
            if self.store.update_user(&user).await? {
                self.invalidate_profile(&user).await;
                return Ok(());
            }
        }
        Err(LedgerError::Contention(user_id))
    }

    /// Resets the allowance to the tier cap when the tier's refresh
    /// interval has elapsed. Safe to call on every profile read; within an
    /// interval it is a no-op returning false.
    pub async fn maybe_refresh(&self, user_id: Uuid) -> Result<bool, LedgerError> {
        for _ in 0..self.max_retries {
            let now = Utc::now();
            let mut user = self.load(user_id).await?;

            let policy = self.tiers.policy(user.effective_tier(now));
            let interval = match policy.refresh_interval {
                Some(interval) => interval,
                None => return Ok(false),
            };

            let elapsed = now
                .signed_duration_since(user.tokens_last_refresh)
                .to_std()
                .unwrap_or_default();
            if elapsed < interval {
                return Ok(false);
            }

            user.allowed_tokens = policy.token_cap;
            user.tokens_last_refresh = now;
            if self.store.update_user(&user).await? {
                self.invalidate_profile(&user).await;
                info!("refreshed allowance for user {} to {}", user.id, policy.token_cap);
                return Ok(true);
            }
            // Conflict: someone else mutated the account; reload and
            // re-check, which also makes a racing refresh a no-op here.
        }
        Err(LedgerError::Contention(user_id))
    }

    /// Attributes `referral_id`'s signup to `referrer_id` at most once and
    /// pays out any newly reached referral level.
    pub async fn apply_referral(&self, referrer_id: Uuid, referral_id: Uuid) -> Result<ReferralResult, LedgerError> {
        if referrer_id == referral_id {
            return Err(LedgerError::InvalidReferral(ReferralRejection::SelfReferral));
        }
        // Validate the referrer exists before stamping the referral.
        self.load(referrer_id).await?;

        self.stamp_referral(referrer_id, referral_id).await?;
        self.reward_referrer(referrer_id).await
    }

    /// Marks the referral account as attributed; the conditional update is
    /// what makes the single-attribution guarantee hold under races.
    async fn stamp_referral(&self, referrer_id: Uuid, referral_id: Uuid) -> Result<(), LedgerError> {
        for _ in 0..self.max_retries {
            let now = Utc::now();
            let mut referral = self.load(referral_id).await?;

            if referral.referred_by.is_some() {
                return Err(LedgerError::InvalidReferral(ReferralRejection::AlreadyAttributed));
            }
            let age = now.signed_duration_since(referral.created_at).to_std().unwrap_or_default();
            if age > self.referral_window {
                return Err(LedgerError::InvalidReferral(ReferralRejection::StaleAccount));
            }

            referral.referred_by = Some(referrer_id);
            if self.store.update_user(&referral).await? {
                self.invalidate_profile(&referral).await;
                return Ok(());
            }
        }
        Err(LedgerError::Contention(referral_id))
    }

    async fn reward_referrer(&self, referrer_id: Uuid) -> Result<ReferralResult, LedgerError> {
        for _ in 0..self.max_retries {
            let mut referrer = self.load(referrer_id).await?;

            referrer.referral_count += 1;
            let level = referral_level(referrer.referral_count);
            // The table value is the absolute cumulative reward; pay only
            // what has not been granted yet.
            let granted = referral_reward(level).saturating_sub(referrer.referral_tokens_granted);
            referrer.additional_tokens += granted;
            referrer.referral_tokens_granted += granted;

            if self.store.update_user(&referrer).await? {
                self.invalidate_profile(&referrer).await;
                if granted > 0 {
                    info!("user {} reached referral level {}, granted {}", referrer.id, level, granted);
                }
                return Ok(ReferralResult {
                    referral_count: referrer.referral_count,
                    level,
                    granted_tokens: granted,
                });
            }
        }
        Err(LedgerError::Contention(referrer_id))
    }

    /// Sets the subscription tier. The expiry is replaced, not extended:
    /// last purchase wins. The allowance is brought up to the new tier's
    /// cap immediately, with the refresh clock restarted.
    pub async fn set_tier(&self, user_id: Uuid, tier: UserTier, duration_days: i64) -> Result<(), LedgerError> {
        for _ in 0..self.max_retries {
            let now = Utc::now();
            let mut user = self.load(user_id).await?;

            user.tier = tier;
            user.tier_expires_at = expiry_for(tier, now, duration_days);
            let cap = self.tiers.policy(tier).token_cap;
            if user.allowed_tokens < cap {
                user.allowed_tokens = cap;
            }
            user.tokens_last_refresh = now;

            if self.store.update_user(&user).await? {
                self.invalidate_profile(&user).await;
                info!("user {} set to tier {:?} for {} days", user.id, tier, duration_days);
                return Ok(());
            }
        }
        Err(LedgerError::Contention(user_id))
    }
}

fn expiry_for(tier: UserTier, now: DateTime<Utc>, duration_days: i64) -> Option<DateTime<Utc>> {
    match tier {
        UserTier::Default => None,
        _ => Some(now + chrono::Duration::days(duration_days)),
    }
}
