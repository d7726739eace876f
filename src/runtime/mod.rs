mod error;
pub mod queue;
pub mod task;
pub mod worker;

pub use error::RuntimeError;

use std::sync::Arc;

use queue::JobQueue;
use worker::{drug::DrugWorker, WorkerPool};

use crate::assistant::AssistantClient;
use crate::config::RuntimeConfig;
use crate::service::gateway::CacheGateway;
use crate::storage::DrugStore;
use crate::transport::Transport;

/// Owns the job queue and the worker pool draining it.
pub struct RuntimeManager {
    pub queue: Arc<JobQueue>,
    pool: WorkerPool,
}

impl RuntimeManager {
    pub fn new(
        config: &RuntimeConfig,
        queue: Arc<JobQueue>,
        drugs: Arc<dyn DrugStore>,
        assistant: Arc<dyn AssistantClient>,
        gateway: Arc<CacheGateway>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut pool = WorkerPool::new();
        pool.add_worker(DrugWorker::new(
            "drug-worker",
            config.worker_concurrency,
            Arc::clone(&queue),
            drugs,
            assistant,
            gateway,
            transport,
            config.poll_interval,
            config.job_timeout,
        ));

        Self { queue, pool }
    }

    pub async fn start(&self) -> Result<(), RuntimeError> {
        self.pool.start_all().await
    }

    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.pool.stop_all().await
    }
}
