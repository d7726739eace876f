use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::assistant::AssistantClient;
use crate::config::AppConfig;
use crate::error::{BotError, BotResult};
use crate::model::drug::{normalize_name, DangerClass, DrugRecord};
use crate::model::user::{UserAccount, UserTier};
use crate::runtime::queue::{EnqueueStatus, JobQueue};
use crate::runtime::task::{Job, JobContext, OperationKind};
use crate::service::gateway::{CacheGateway, ResourceKind};
use crate::service::ledger::{LedgerService, ReferralResult, SpendReason, SpendRequest};
use crate::service::ratelimit::{RateLimitError, RateLimitService};
use crate::service::ServiceError;
use crate::storage::{DrugStore, UserStore};

/// Deterministic outcomes for the presentation layer to branch on; the
/// throttle and insufficient-credit cases surface as errors instead.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Found(DrugRecord),
    Queued { job_id: Uuid },
    AlreadyQueued { job_id: Uuid },
    UnknownSubstance,
    Forbidden,
    PremiumRequired,
}

/// Orchestrates one inbound substance query: limiter, cached profile,
/// allowance refresh, assistant validation, danger gate, charge, then the
/// cached record or a background job.
pub struct QueryService {
    users: Arc<dyn UserStore>,
    drugs: Arc<dyn DrugStore>,
    gateway: Arc<CacheGateway>,
    ledger: Arc<LedgerService>,
    ratelimit: Arc<RateLimitService>,
    assistant: Arc<dyn AssistantClient>,
    queue: Arc<JobQueue>,
    initial_tokens: u32,
    search_cost: u32,
}

impl QueryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        drugs: Arc<dyn DrugStore>,
        gateway: Arc<CacheGateway>,
        ledger: Arc<LedgerService>,
        ratelimit: Arc<RateLimitService>,
        assistant: Arc<dyn AssistantClient>,
        queue: Arc<JobQueue>,
        config: &AppConfig,
    ) -> Self {
        Self {
            users,
            drugs,
            gateway,
            ledger,
            ratelimit,
            assistant,
            queue,
            initial_tokens: config.tiers.default.token_cap,
            search_cost: config.ledger.search_cost,
        }
    }

    /// Idempotent first-contact upsert, read through the profile cache.
    pub async fn resolve_profile(&self, telegram_user_id: u64) -> BotResult<UserAccount> {
        let users = Arc::clone(&self.users);
        let initial_tokens = self.initial_tokens;
        let profile = self
            .gateway
            .get_or_fetch(ResourceKind::Profile, &telegram_user_id.to_string(), move || async move {
                users
                    .upsert_by_telegram(UserAccount::new(telegram_user_id, initial_tokens))
                    .await
            })
            .await
            .map_err(ServiceError::Gateway)?;
        Ok(profile)
    }

    pub async fn handle_drug_query(&self, telegram_user_id: u64, raw_query: &str) -> BotResult<QueryOutcome> {
        let mut profile = self.resolve_profile(telegram_user_id).await?;
        let tier = profile.effective_tier(Utc::now());

        let verdict = self
            .ratelimit
            .allow(profile.id, tier)
            .map_err(ServiceError::RateLimit)?;
        if !verdict.allowed {
            return Err(BotError::ServiceError(ServiceError::RateLimit(RateLimitError::Limited {
                retry_after: verdict.retry_after,
            })));
        }

        if self.ledger.maybe_refresh(profile.id).await.map_err(ServiceError::Ledger)? {
            profile = self.resolve_profile(telegram_user_id).await?;
        }

        let validation = self.assistant.validate_query(raw_query).await?;
        if !validation.exists {
            return Ok(QueryOutcome::UnknownSubstance);
        }
        let canonical_name = validation
            .canonical_name
            .unwrap_or_else(|| raw_query.trim().to_string());
        let name_key = normalize_name(&canonical_name);

        let drugs = Arc::clone(&self.drugs);
        let fetch_key = name_key.clone();
        let record = self
            .gateway
            .get_or_fetch_optional(ResourceKind::Drug, &name_key, move || async move {
                drugs.get_drug(&fetch_key).await
            })
            .await
            .map_err(ServiceError::Gateway)?;

        match record {
            Some(record) => {
                if let Some(refused) = gate(&record, tier) {
                    return Ok(refused);
                }
                self.charge(&profile, SpendReason::Search).await?;
                Ok(QueryOutcome::Found(record))
            }
            None => {
                self.charge_and_enqueue(&profile, tier, OperationKind::CreateDrug, &canonical_name)
                    .await
            }
        }
    }

    /// User-triggered regeneration of an existing record. Charged like a
    /// fresh generation; the idempotency key includes the operation kind,
    /// so an update job never collides with a pending creation.
    pub async fn request_drug_update(&self, telegram_user_id: u64, raw_query: &str) -> BotResult<QueryOutcome> {
        let profile = self.resolve_profile(telegram_user_id).await?;
        let tier = profile.effective_tier(Utc::now());

        let verdict = self
            .ratelimit
            .allow(profile.id, tier)
            .map_err(ServiceError::RateLimit)?;
        if !verdict.allowed {
            return Err(BotError::ServiceError(ServiceError::RateLimit(RateLimitError::Limited {
                retry_after: verdict.retry_after,
            })));
        }

        let validation = self.assistant.validate_query(raw_query).await?;
        if !validation.exists {
            return Ok(QueryOutcome::UnknownSubstance);
        }
        let canonical_name = validation
            .canonical_name
            .unwrap_or_else(|| raw_query.trim().to_string());
        let name_key = normalize_name(&canonical_name);

        // Only records that exist can be refreshed; the authoritative
        // store is asked directly so a cold cache cannot refuse an update.
        let record = match self.drugs.get_drug(&name_key).await? {
            Some(record) => record,
            None => return Ok(QueryOutcome::UnknownSubstance),
        };
        if let Some(refused) = gate(&record, tier) {
            return Ok(refused);
        }

        self.charge_and_enqueue(&profile, tier, OperationKind::UpdateDrug, &canonical_name)
            .await
    }

    async fn charge_and_enqueue(
        &self,
        profile: &UserAccount,
        tier: UserTier,
        kind: OperationKind,
        canonical_name: &str,
    ) -> BotResult<QueryOutcome> {
        self.charge(profile, SpendReason::DrugUpdate).await?;

        let context = JobContext {
            user_id: profile.id,
            telegram_user_id: profile.telegram_user_id,
            user_tier: tier,
        };
        let enqueued = match self.queue.enqueue(kind, canonical_name, context).await {
            Ok(enqueued) => enqueued,
            Err(e) => {
                // The charge bought nothing; reverse it before surfacing
                // the failure.
                if let Err(refund_err) = self.ledger.refund(profile.id, self.search_cost).await {
                    error!("refund for user {} after failed enqueue: {}", profile.id, refund_err);
                }
                return Err(e.into());
            }
        };
        Ok(match enqueued.status {
            EnqueueStatus::Created => QueryOutcome::Queued {
                job_id: enqueued.job_id,
            },
            EnqueueStatus::AlreadyQueued => QueryOutcome::AlreadyQueued {
                job_id: enqueued.job_id,
            },
        })
    }

    async fn charge(&self, profile: &UserAccount, reason: SpendReason) -> BotResult<()> {
        self.ledger
            .charge(&SpendRequest {
                user_id: profile.id,
                amount: self.search_cost,
                reason,
            })
            .await
            .map_err(ServiceError::Ledger)?;
        Ok(())
    }

    /// Attributes a /start referral payload. Both accounts are upserted
    /// first so attribution works on the very first contact.
    pub async fn attribute_referral(
        &self,
        referrer_telegram_id: u64,
        referral_telegram_id: u64,
    ) -> BotResult<ReferralResult> {
        let referrer = self.resolve_profile(referrer_telegram_id).await?;
        let referral = self.resolve_profile(referral_telegram_id).await?;

        let result = self
            .ledger
            .apply_referral(referrer.id, referral.id)
            .await
            .map_err(ServiceError::Ledger)?;
        Ok(result)
    }

    /// Status passthrough for "is my record ready yet" polling.
    pub fn job_status(&self, job_id: Uuid) -> Option<Job> {
        self.queue.job(job_id)
    }
}

fn gate(record: &DrugRecord, tier: UserTier) -> Option<QueryOutcome> {
    match record.danger() {
        DangerClass::Forbidden => Some(QueryOutcome::Forbidden),
        DangerClass::PremiumGated if tier != UserTier::Premium => Some(QueryOutcome::PremiumRequired),
        _ => None,
    }
}
