use std::sync::Arc;

use crate::assistant::AssistantClient;
use crate::config::AppConfig;
use crate::error::BotResult;
use crate::runtime::{queue::JobQueue, RuntimeManager};
use crate::service::ServiceRegistry;
use crate::storage::{ApiStore, CacheBackend, DrugStore, RedisClient, UserStore};
use crate::transport::Transport;

/// Process-wide wiring, constructed once and passed by reference. Every
/// collaborator a component needs appears in a constructor signature; there
/// is no global state to reach for.
pub struct AppContext {
    pub config: AppConfig,
    pub services: ServiceRegistry,
    pub runtime: Arc<RuntimeManager>,
}

impl AppContext {
    /// Wires the registry and runtime over the given backends and starts
    /// the worker pool.
    pub async fn new(
        config: AppConfig,
        cache: CacheBackend,
        users: Arc<dyn UserStore>,
        drugs: Arc<dyn DrugStore>,
        assistant: Arc<dyn AssistantClient>,
        transport: Arc<dyn Transport>,
    ) -> BotResult<Self> {
        info!("Initializing AppContext...");

        let queue = Arc::new(JobQueue::new(config.runtime.queue_capacity, config.runtime.job_expiry));

        let services = ServiceRegistry::new(
            &config,
            cache,
            users,
            Arc::clone(&drugs),
            Arc::clone(&assistant),
            Arc::clone(&queue),
        );

        let runtime = Arc::new(RuntimeManager::new(
            &config.runtime,
            queue,
            drugs,
            assistant,
            Arc::clone(&services.gateway),
            transport,
        ));
        runtime.start().await?;

        info!("AppContext initialized");
        Ok(Self {
            config,
            services,
            runtime,
        })
    }

    /// Production wiring: Redis cache plus the authoritative REST API.
    pub async fn connect(
        config: AppConfig,
        assistant: Arc<dyn AssistantClient>,
        transport: Arc<dyn Transport>,
    ) -> BotResult<Self> {
        let redis = RedisClient::new(&config.storage.redis_url).await?;
        let api = Arc::new(ApiStore::new(
            &config.storage.api_base_url,
            &config.storage.api_token,
            3,
        )?);

        Self::new(
            config,
            CacheBackend::Redis(redis),
            Arc::clone(&api) as Arc<dyn UserStore>,
            api as Arc<dyn DrugStore>,
            assistant,
            transport,
        )
        .await
    }
}
