use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::assistant::AssistantClient;
use crate::model::drug::DrugRecord;
use crate::runtime::{
    queue::JobQueue,
    task::{Job, OperationKind},
    RuntimeError,
};
use crate::service::gateway::{CacheGateway, ResourceKind};
use crate::storage::DrugStore;
use crate::transport::{Transport, TransportError};

use super::Worker;

/// Drains the job queue: generates drug content through the assistant,
/// commits it to the authoritative store, invalidates the cached record
/// and only then marks the job DONE. A failure anywhere leaves the prior
/// cached value untouched.
#[derive(Clone)]
pub struct DrugWorker {
    name: String,
    concurrency: usize,
    queue: Arc<JobQueue>,
    drugs: Arc<dyn DrugStore>,
    assistant: Arc<dyn AssistantClient>,
    gateway: Arc<CacheGateway>,
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    job_timeout: Duration,
    shutdown: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl DrugWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        concurrency: usize,
        queue: Arc<JobQueue>,
        drugs: Arc<dyn DrugStore>,
        assistant: Arc<dyn AssistantClient>,
        gateway: Arc<CacheGateway>,
        transport: Arc<dyn Transport>,
        poll_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            name: name.to_string(),
            concurrency,
            queue,
            drugs,
            assistant,
            gateway,
            transport,
            poll_interval,
            job_timeout,
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn process(&self, job: Job) {
        if let Err(e) = self.queue.mark_in_progress(job.id) {
            warn!("could not claim job {}: {}", job.id, e);
            return;
        }

        let progress = self.send_progress(&job).await;

        match tokio::time::timeout(self.job_timeout, self.run_job(&job)).await {
            Ok(Ok(())) => {
                if let Err(e) = self.queue.mark_done(job.id) {
                    error!("failed to mark job {} done: {}", job.id, e);
                    return;
                }
                info!("job {} done: {} \"{}\"", job.id, job.kind, job.canonical_name);
                self.notify(&job, progress).await;
            }
            Ok(Err(e)) => {
                error!("job {} failed: {}", job.id, e);
                let _ = self.queue.mark_failed(job.id, &e.to_string());
            }
            Err(_) => {
                error!("job {} timed out after {:?}", job.id, self.job_timeout);
                let _ = self.queue.mark_failed(job.id, "timed out");
            }
        }
    }

    async fn run_job(&self, job: &Job) -> Result<(), RuntimeError> {
        let content = self
            .assistant
            .generate_drug_content(&job.canonical_name)
            .await
            .map_err(|e| RuntimeError::TaskError(e.to_string()))?;

        let record = match job.kind {
            OperationKind::CreateDrug | OperationKind::UpdateDrug => DrugRecord::new(&job.canonical_name, content),
        };

        self.drugs
            .upsert_drug(&record)
            .await
            .map_err(|e| RuntimeError::TaskError(e.to_string()))?;

        // The mutation is committed; drop the cached copy before the job
        // can be observed as DONE.
        self.gateway
            .invalidate_best_effort(ResourceKind::Drug, &record.name_key)
            .await;

        Ok(())
    }

    /// Tells the requester work has started; the returned message id is
    /// edited in place once the record is ready.
    async fn send_progress(&self, job: &Job) -> Option<i32> {
        let text = format!("Working on \"{}\"...", job.canonical_name);
        match self.transport.send_message(job.context.telegram_user_id, &text).await {
            Ok(message_id) => Some(message_id),
            Err(TransportError::Blocked) => {
                warn!("user {} blocked the bot, skipping progress message", job.context.telegram_user_id);
                None
            }
            Err(e) => {
                warn!("progress message for job {} failed: {}", job.id, e);
                None
            }
        }
    }

    /// Delivery problems must not fail the job; a blocked bot is the
    /// user's prerogative.
    async fn notify(&self, job: &Job, progress: Option<i32>) {
        let text = format!("Your record for \"{}\" is ready.", job.canonical_name);
        let delivery = match progress {
            Some(message_id) => {
                self.transport
                    .edit_message(job.context.telegram_user_id, message_id, &text)
                    .await
            }
            None => self
                .transport
                .send_message(job.context.telegram_user_id, &text)
                .await
                .map(|_| ()),
        };
        match delivery {
            Ok(()) => {}
            Err(TransportError::Blocked) => {
                warn!("user {} blocked the bot, skipping notification", job.context.telegram_user_id)
            }
            Err(e) => warn!("notification for job {} failed: {}", job.id, e),
        }
    }
}

#[async_trait]
impl Worker for DrugWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), RuntimeError> {
        self.running.store(true, Ordering::SeqCst);

        for i in 0..self.concurrency {
            let worker = self.clone();
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                info!("{} loop {} started", worker.name, i);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        job = worker.queue.pop_runnable() => match job {
                            Some(job) => worker.process(job).await,
                            None => {
                                worker.queue.sweep_expired();
                                tokio::time::sleep(worker.poll_interval).await;
                            }
                        }
                    }
                }
                info!("{} loop {} stopped", worker.name, i);
            });
        }

        Ok(())
    }

    async fn stop(&self) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
