pub mod gateway;
pub mod ledger;
pub mod query;
pub mod ratelimit;

use std::sync::Arc;

use gateway::{CacheGateway, GatewayError};
use ledger::{LedgerError, LedgerService};
use query::QueryService;
use ratelimit::{RateLimitError, RateLimitService};

use crate::assistant::AssistantClient;
use crate::config::AppConfig;
use crate::runtime::queue::JobQueue;
use crate::storage::{CacheBackend, DrugStore, UserStore};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),
    #[error("Other error: {0}")]
    Other(String),
}

/// One instance of every service, wired by constructor injection at
/// process start. No global lookups anywhere downstream.
#[derive(Clone)]
pub struct ServiceRegistry {
    pub gateway: Arc<CacheGateway>,
    pub ledger: Arc<LedgerService>,
    pub ratelimit: Arc<RateLimitService>,
    pub query: Arc<QueryService>,
}

impl ServiceRegistry {
    pub fn new(
        config: &AppConfig,
        cache: CacheBackend,
        users: Arc<dyn UserStore>,
        drugs: Arc<dyn DrugStore>,
        assistant: Arc<dyn AssistantClient>,
        queue: Arc<JobQueue>,
    ) -> Self {
        info!("Initializing service registry");

        let gateway = Arc::new(CacheGateway::new(cache, &config.gateway));
        let ledger = Arc::new(LedgerService::new(
            Arc::clone(&users),
            Arc::clone(&gateway),
            config.tiers.clone(),
            &config.ledger,
        ));
        let ratelimit = Arc::new(RateLimitService::new(config.tiers.clone()));
        let query = Arc::new(QueryService::new(
            users,
            drugs,
            Arc::clone(&gateway),
            Arc::clone(&ledger),
            Arc::clone(&ratelimit),
            assistant,
            queue,
            config,
        ));

        info!("Service registry initialized");

        Self {
            gateway,
            ledger,
            ratelimit,
            query,
        }
    }
}
