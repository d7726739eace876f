use std::str::FromStr;
use std::time::Duration;

use crate::model::user::UserTier;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing {0}")]
    MissingVar(String),
    #[error("Invalid {0}")]
    InvalidVar(String),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub tiers: TierPolicies,
    pub ledger: LedgerConfig,
    pub gateway: GatewayConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub redis_url: String,
    pub api_base_url: String,
    pub api_token: String,
}

/// Per-tier credit cap, refresh cadence and request quota. A `None`
/// refresh interval means the tier never refreshes its allowance.
#[derive(Clone, Debug)]
pub struct TierPolicy {
    pub token_cap: u32,
    pub refresh_interval: Option<Duration>,
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Clone, Debug)]
pub struct TierPolicies {
    pub default: TierPolicy,
    pub lite: TierPolicy,
    pub premium: TierPolicy,
}

impl TierPolicies {
    pub fn policy(&self, tier: UserTier) -> &TierPolicy {
        match tier {
            UserTier::Default => &self.default,
            UserTier::Lite => &self.lite,
            UserTier::Premium => &self.premium,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// How long after account creation a referral may still be attributed.
    pub referral_window: Duration,
    /// Bound on conditional-update retries before giving up on a mutation.
    pub max_commit_retries: u32,
    pub search_cost: u32,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub profile_ttl: Duration,
    pub drug_ttl: Duration,
    pub access_token_ttl: Duration,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub queue_capacity: usize,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    /// How long a queued or failed job blocks its idempotency key.
    pub job_expiry: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                api_base_url: "http://127.0.0.1:8000/api/v1".to_string(),
                api_token: String::new(),
            },
            tiers: TierPolicies {
                default: TierPolicy {
                    token_cap: 10,
                    refresh_interval: None,
                    max_requests: 5,
                    window: Duration::from_secs(60),
                },
                lite: TierPolicy {
                    token_cap: 50,
                    refresh_interval: Some(Duration::from_secs(7 * 24 * 3600)),
                    max_requests: 20,
                    window: Duration::from_secs(60),
                },
                premium: TierPolicy {
                    token_cap: 200,
                    refresh_interval: Some(Duration::from_secs(24 * 3600)),
                    // PREMIUM bypasses the limiter; kept for completeness.
                    max_requests: 60,
                    window: Duration::from_secs(60),
                },
            },
            ledger: LedgerConfig {
                referral_window: Duration::from_secs(24 * 3600),
                max_commit_retries: 32,
                search_cost: 1,
            },
            gateway: GatewayConfig {
                profile_ttl: Duration::from_secs(24 * 3600),
                drug_ttl: Duration::from_secs(3600),
                access_token_ttl: Duration::from_secs(24 * 3600),
            },
            runtime: RuntimeConfig {
                queue_capacity: 256,
                worker_concurrency: 4,
                poll_interval: Duration::from_millis(100),
                job_timeout: Duration::from_secs(120),
                job_expiry: Duration::from_secs(600),
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        info!("Building AppConfig...");
        let mut config = AppConfig::default();

        config.storage = StorageConfig {
            redis_url: required("REDIS_URL")?,
            api_base_url: required("API_BASE_URL")?,
            api_token: required("API_TOKEN")?,
        };

        if let Some(capacity) = optional_parse::<usize>("QUEUE_CAPACITY")? {
            config.runtime.queue_capacity = capacity;
        }
        if let Some(concurrency) = optional_parse::<usize>("WORKER_CONCURRENCY")? {
            config.runtime.worker_concurrency = concurrency;
        }
        if let Some(secs) = optional_parse::<u64>("JOB_TIMEOUT_SECS")? {
            config.runtime.job_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = optional_parse::<u64>("JOB_EXPIRY_SECS")? {
            config.runtime.job_expiry = Duration::from_secs(secs);
        }
        if let Some(secs) = optional_parse::<u64>("DRUG_CACHE_TTL_SECS")? {
            config.gateway.drug_ttl = Duration::from_secs(secs);
        }
        if let Some(cost) = optional_parse::<u32>("SEARCH_COST")? {
            config.ledger.search_cost = cost;
        }

        info!("AppConfig built");
        Ok(config)
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn optional_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar(name.to_string())),
        Err(_) => Ok(None),
    }
}
