pub mod priority;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use priority::PriorityQueue;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{
    task::{Job, JobContext, JobStatus, OperationKind},
    RuntimeError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    Created,
    AlreadyQueued,
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub status: EnqueueStatus,
    pub job_id: Uuid,
}

/// Deduplicating job queue. `index` maps each idempotency key to the job
/// currently owning it; the dedupe check and the ownership hand-off happen
/// under a single index entry guard, so concurrent enqueues for the same
/// target can never both win.
pub struct JobQueue {
    jobs: Arc<DashMap<Uuid, Job>>,
    index: Arc<DashMap<String, Uuid>>,
    runnable: Arc<PriorityQueue<Uuid>>,
    job_expiry: Duration,
}

impl JobQueue {
    pub fn new(capacity: usize, job_expiry: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            index: Arc::new(DashMap::new()),
            runnable: Arc::new(PriorityQueue::new(capacity)),
            job_expiry,
        }
    }

    pub async fn enqueue(
        &self,
        kind: OperationKind,
        target: &str,
        context: JobContext,
    ) -> Result<EnqueueResult, RuntimeError> {
        let job = Job::new(kind, target, context, self.job_expiry);
        let job_id = job.id;
        let key = job.idempotency_key.clone();
        let priority = job.context.user_tier.into();

        // Register the candidate first so the index never points at a job
        // record that is not yet visible.
        self.jobs.insert(job_id, job);

        match self.index.entry(key.clone()) {
            Entry::Occupied(mut owner) => {
                let existing_id = *owner.get();
                let still_owned = self
                    .jobs
                    .get(&existing_id)
                    .map(|existing| existing.blocks_new_enqueue(Utc::now()))
                    .unwrap_or(false);
                if still_owned {
                    self.jobs.remove(&job_id);
                    debug!("enqueue deduplicated onto job {}", existing_id);
                    return Ok(EnqueueResult {
                        status: EnqueueStatus::AlreadyQueued,
                        job_id: existing_id,
                    });
                }
                self.jobs.remove(&existing_id);
                owner.insert(job_id);
            }
            Entry::Vacant(slot) => {
                slot.insert(job_id);
            }
        }

        if let Err(e) = self.runnable.push(job_id, priority).await {
            self.jobs.remove(&job_id);
            self.index.remove_if(&key, |_, owner| *owner == job_id);
            return Err(e);
        }

        info!("job {} queued for {} \"{}\"", job_id, kind, target);
        Ok(EnqueueResult {
            status: EnqueueStatus::Created,
            job_id,
        })
    }

    /// Next claimable job, skipping records that expired unclaimed.
    pub async fn pop_runnable(&self) -> Option<Job> {
        loop {
            let job_id = self.runnable.pop().await?;
            match self.jobs.get(&job_id) {
                Some(job) if job.status == JobStatus::Queued => {
                    if Utc::now() >= job.expires_at {
                        debug!("job {} expired unclaimed, skipping", job_id);
                        continue;
                    }
                    return Some(job.clone());
                }
                _ => continue,
            }
        }
    }

    /// Status lookup for polling callers. A terminal job past `expires_at`
    /// is dropped on this touch; its record is no longer reachable.
    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        let job = self.jobs.get(&job_id).map(|job| job.clone())?;
        if job.status.is_terminal() && Utc::now() >= job.expires_at {
            self.jobs.remove(&job_id);
            self.index.remove_if(&job.idempotency_key, |_, owner| *owner == job_id);
            return None;
        }
        Some(job)
    }

    /// Drops job records past `expires_at` that are terminal or still
    /// QUEUED (expired unclaimed), together with any index entries left
    /// without an owner. IN_PROGRESS jobs are left to their timeout.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.jobs.retain(|_, job| job.status == JobStatus::InProgress || now < job.expires_at);
        self.index.retain(|_, owner| self.jobs.contains_key(owner));
    }

    pub fn mark_in_progress(&self, job_id: Uuid) -> Result<(), RuntimeError> {
        self.transition(job_id, JobStatus::Queued, JobStatus::InProgress, None)
    }

    pub fn mark_done(&self, job_id: Uuid) -> Result<(), RuntimeError> {
        self.transition(job_id, JobStatus::InProgress, JobStatus::Done, None)
    }

    pub fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), RuntimeError> {
        self.transition(job_id, JobStatus::InProgress, JobStatus::Failed, Some(error.to_string()))
    }

    fn transition(
        &self,
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<(), RuntimeError> {
        let mut job = self.jobs.get_mut(&job_id).ok_or(RuntimeError::UnknownJob(job_id))?;
        if job.status != from {
            return Err(RuntimeError::InvalidTransition { from: job.status, to });
        }
        job.status = to;
        job.error = error;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::UserTier;
    use tokio::time::sleep;

    fn context(tier: UserTier) -> JobContext {
        JobContext {
            user_id: Uuid::new_v4(),
            telegram_user_id: 1,
            user_tier: tier,
        }
    }

    fn queue() -> JobQueue {
        JobQueue::new(32, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn dedupes_on_normalized_target() {
        let queue = queue();
        let first = queue
            .enqueue(OperationKind::CreateDrug, "Ibuprofen", context(UserTier::Default))
            .await
            .unwrap();
        let second = queue
            .enqueue(OperationKind::CreateDrug, "  ibuprofen ", context(UserTier::Lite))
            .await
            .unwrap();

        assert_eq!(first.status, EnqueueStatus::Created);
        assert_eq!(second.status, EnqueueStatus::AlreadyQueued);
        assert_eq!(second.job_id, first.job_id);
    }

    #[tokio::test]
    async fn concurrent_enqueues_create_exactly_one_job() {
        let queue = Arc::new(queue());
        let mut handles = vec![];
        for _ in 0..10 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(OperationKind::CreateDrug, "Ibuprofen", context(UserTier::Default))
                    .await
                    .unwrap()
            }));
        }

        let mut created = vec![];
        let mut duplicates = vec![];
        for handle in handles {
            let result = handle.await.unwrap();
            match result.status {
                EnqueueStatus::Created => created.push(result.job_id),
                EnqueueStatus::AlreadyQueued => duplicates.push(result.job_id),
            }
        }

        assert_eq!(created.len(), 1);
        assert_eq!(duplicates.len(), 9);
        assert!(duplicates.iter().all(|id| *id == created[0]));
    }

    #[tokio::test]
    async fn done_frees_the_key_for_a_fresh_job() {
        let queue = queue();
        let first = queue
            .enqueue(OperationKind::UpdateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();

        queue.mark_in_progress(first.job_id).unwrap();
        queue.mark_done(first.job_id).unwrap();

        let second = queue
            .enqueue(OperationKind::UpdateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        assert_eq!(second.status, EnqueueStatus::Created);
        assert_ne!(second.job_id, first.job_id);
    }

    #[tokio::test]
    async fn failed_key_stays_closed_until_expiry() {
        let queue = JobQueue::new(32, Duration::from_millis(50));
        let first = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        queue.mark_in_progress(first.job_id).unwrap();
        queue.mark_failed(first.job_id, "assistant timed out").unwrap();

        let blocked = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        assert_eq!(blocked.status, EnqueueStatus::AlreadyQueued);
        assert_eq!(blocked.job_id, first.job_id);

        sleep(Duration::from_millis(80)).await;
        let reopened = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        assert_eq!(reopened.status, EnqueueStatus::Created);
    }

    #[tokio::test]
    async fn expired_queued_job_is_replaced_and_skipped() {
        let queue = JobQueue::new(32, Duration::from_millis(20));
        let stale = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();

        sleep(Duration::from_millis(40)).await;
        let fresh = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        assert_eq!(fresh.status, EnqueueStatus::Created);
        assert_ne!(fresh.job_id, stale.job_id);

        // The stale id is still in the runnable heap but must not be handed
        // to a worker.
        let popped = queue.pop_runnable().await.unwrap();
        assert_eq!(popped.id, fresh.job_id);
    }

    #[tokio::test]
    async fn premium_jobs_run_first() {
        let queue = queue();
        queue
            .enqueue(OperationKind::CreateDrug, "paracetamol", context(UserTier::Default))
            .await
            .unwrap();
        sleep(Duration::from_micros(10)).await;
        let premium = queue
            .enqueue(OperationKind::CreateDrug, "ibuprofen", context(UserTier::Premium))
            .await
            .unwrap();

        let first = queue.pop_runnable().await.unwrap();
        assert_eq!(first.id, premium.job_id);
    }

    #[tokio::test]
    async fn full_queue_rolls_back_the_key() {
        let queue = JobQueue::new(1, Duration::from_secs(60));
        queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        assert!(matches!(
            queue
                .enqueue(OperationKind::CreateDrug, "ibuprofen", context(UserTier::Default))
                .await,
            Err(RuntimeError::QueueFull)
        ));

        queue.pop_runnable().await.unwrap();
        let retried = queue
            .enqueue(OperationKind::CreateDrug, "ibuprofen", context(UserTier::Default))
            .await
            .unwrap();
        assert_eq!(retried.status, EnqueueStatus::Created);
    }

    #[tokio::test]
    async fn terminal_job_is_dropped_after_expiry() {
        let queue = JobQueue::new(32, Duration::from_millis(30));
        let job = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        queue.mark_in_progress(job.job_id).unwrap();
        queue.mark_done(job.job_id).unwrap();
        assert!(queue.job(job.job_id).is_some());

        sleep(Duration::from_millis(60)).await;
        assert!(queue.job(job.job_id).is_none());
        assert!(queue.job(job.job_id).is_none());
    }

    #[tokio::test]
    async fn sweep_drops_stale_records_and_their_index_entries() {
        let queue = JobQueue::new(32, Duration::from_millis(20));
        let done = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        queue.mark_in_progress(done.job_id).unwrap();
        queue.mark_done(done.job_id).unwrap();
        let unclaimed = queue
            .enqueue(OperationKind::CreateDrug, "ibuprofen", context(UserTier::Default))
            .await
            .unwrap();

        sleep(Duration::from_millis(40)).await;
        queue.sweep_expired();

        assert!(queue.job(done.job_id).is_none());
        assert!(queue.job(unclaimed.job_id).is_none());

        // Both keys are free again.
        for name in ["aspirin", "ibuprofen"] {
            let fresh = queue
                .enqueue(OperationKind::CreateDrug, name, context(UserTier::Default))
                .await
                .unwrap();
            assert_eq!(fresh.status, EnqueueStatus::Created);
        }
    }

    #[tokio::test]
    async fn replacing_an_expired_job_drops_its_record() {
        let queue = JobQueue::new(32, Duration::from_millis(20));
        let stale = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();

        sleep(Duration::from_millis(40)).await;
        let fresh = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();
        assert_eq!(fresh.status, EnqueueStatus::Created);
        assert!(queue.job(stale.job_id).is_none());
        assert!(queue.job(fresh.job_id).is_some());
    }

    #[tokio::test]
    async fn transitions_are_checked() {
        let queue = queue();
        let job = queue
            .enqueue(OperationKind::CreateDrug, "aspirin", context(UserTier::Default))
            .await
            .unwrap();

        assert!(matches!(
            queue.mark_done(job.job_id),
            Err(RuntimeError::InvalidTransition { .. })
        ));

        queue.mark_in_progress(job.job_id).unwrap();
        queue.mark_done(job.job_id).unwrap();
        assert_eq!(queue.job(job.job_id).unwrap().status, JobStatus::Done);

        assert!(matches!(
            queue.mark_failed(job.job_id, "late"),
            Err(RuntimeError::InvalidTransition { .. })
        ));
    }
}
