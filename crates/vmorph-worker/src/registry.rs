//! In-memory job registry.
//!
//! The registry owns every job record. Pollers get snapshots through
//! [`JobRegistry::get`]; only the task that owns a job mutates it, through
//! the [`JobHandle`] returned by [`JobRegistry::create`]. Finished jobs are
//! kept for a retention window and then evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vmorph_models::{AssetId, Job, JobId, VariationResult};

use crate::error::{WorkerError, WorkerResult};

/// Message recorded on jobs stopped through [`JobRegistry::cancel`].
pub const CANCELLED_MESSAGE: &str = "Job cancelled";

#[derive(Debug)]
struct JobSlot {
    id: JobId,
    job: RwLock<Job>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobSlot {
    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Owner-side reference to one job record.
#[derive(Debug, Clone)]
pub struct JobHandle {
    slot: Arc<JobSlot>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.slot.id
    }

    /// Token that fires when the job is cancelled or the registry shuts down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.slot.cancel.clone()
    }

    pub async fn set_progress(&self, progress: u8) {
        self.slot.job.write().await.set_progress(progress);
    }

    pub async fn complete(&self, results: Vec<VariationResult>) {
        self.slot.job.write().await.complete(results);
    }

    pub async fn fail(&self, error: impl Into<String>) {
        self.slot.job.write().await.fail(error);
    }

    /// Remember the task running this job so it can be awaited later.
    pub fn attach_task(&self, task: JoinHandle<()>) {
        *self.slot.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

/// Process-wide mapping from job id to job record.
#[derive(Debug)]
pub struct JobRegistry {
    next_id: AtomicU64,
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
    retention: Duration,
}

impl JobRegistry {
    /// Create a registry keeping finished jobs for `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Reserve the next id and store a fresh active job under it.
    pub async fn create(&self, video_id: AssetId, variation_count: u32) -> JobHandle {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(JobSlot {
            id,
            job: RwLock::new(Job::new(id, video_id, variation_count)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        });

        self.jobs.write().await.insert(id, Arc::clone(&slot));
        debug!("Registered job {}", id);

        JobHandle { slot }
    }

    /// Snapshot of a job, or `None` for ids never issued or already evicted.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        let slot = self.slot(id).await?;
        let job = slot.job.read().await.clone();
        Some(job)
    }

    /// Stop an active job. The job is marked failed right away; its task
    /// stops at the next suspension point.
    pub async fn cancel(&self, id: JobId) -> WorkerResult<()> {
        let slot = self.slot(id).await.ok_or(WorkerError::JobNotFound(id))?;

        {
            let mut job = slot.job.write().await;
            if job.is_terminal() {
                return Err(WorkerError::JobFinished(id));
            }
            job.fail(CANCELLED_MESSAGE);
        }

        slot.cancel.cancel();
        info!("Cancelled job {}", id);
        Ok(())
    }

    /// Delete a finished job once the client no longer needs it.
    pub async fn remove(&self, id: JobId) -> WorkerResult<Job> {
        let mut jobs = self.jobs.write().await;
        let slot = jobs.get(&id).cloned().ok_or(WorkerError::JobNotFound(id))?;

        let job = slot.job.read().await.clone();
        if !job.is_terminal() {
            return Err(WorkerError::JobActive(id));
        }

        jobs.remove(&id);
        debug!("Removed job {}", id);
        Ok(job)
    }

    /// Evict finished jobs whose retention window ended before `now`.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let slots: Vec<Arc<JobSlot>> = self.jobs.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for slot in slots {
            let finished_at = slot.job.read().await.finished_at;
            if let Some(finished_at) = finished_at {
                let age = now.signed_duration_since(finished_at).to_std().unwrap_or_default();
                if age >= self.retention {
                    expired.push(slot.id);
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs.write().await;
        for id in &expired {
            jobs.remove(id);
        }

        info!("Evicted {} finished jobs", expired.len());
        expired.len()
    }

    /// Wait for a job's task to finish. Returns `false` if there was no
    /// task to wait for.
    pub async fn join(&self, id: JobId) -> bool {
        let Some(task) = self.slot(id).await.and_then(|slot| slot.take_task()) else {
            return false;
        };

        if let Err(e) = task.await {
            warn!("Task for job {} ended abnormally: {}", id, e);
        }
        true
    }

    /// Cancel every in-flight job and wait for their tasks.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<JobSlot>> = self.jobs.read().await.values().cloned().collect();

        let mut tasks = Vec::new();
        for slot in slots {
            slot.cancel.cancel();
            if let Some(task) = slot.take_task() {
                tasks.push((slot.id, task));
            }
        }

        info!("Waiting for {} job tasks to stop", tasks.len());
        for (id, task) in tasks {
            if let Err(e) = task.await {
                warn!("Task for job {} ended abnormally: {}", id, e);
            }
        }
    }

    /// Number of jobs currently tracked.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn slot(&self, id: JobId) -> Option<Arc<JobSlot>> {
        self.jobs.read().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use vmorph_models::JobStatus;

    fn asset() -> AssetId {
        AssetId::parse("asset-1").unwrap()
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing() {
        let registry = JobRegistry::new(Duration::from_secs(60));

        let mut previous = 0;
        for _ in 0..10 {
            let id = registry.create(asset(), 5).await.id();
            assert!(id.as_u64() > previous);
            previous = id.as_u64();
        }
        assert_eq!(registry.len().await, 10);
    }

    #[tokio::test]
    async fn test_concurrent_creation() {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(60)));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.create(asset(), 1).await.id() })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
    }

    #[tokio::test]
    async fn test_get_unknown_id() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let handle = registry.create(asset(), 5).await;

        assert!(registry.get(handle.id()).await.is_some());
        assert!(registry.get(JobId(handle.id().as_u64() + 1)).await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_job_is_active() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let handle = registry.create(asset(), 5).await;

        let job = registry.get(handle.id()).await.unwrap();
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.progress, 0);
        assert_eq!(job.variation_count, 5);
    }

    #[tokio::test]
    async fn test_handle_updates_are_visible() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let handle = registry.create(asset(), 5).await;

        handle.set_progress(40).await;
        assert_eq!(registry.get(handle.id()).await.unwrap().progress, 40);

        handle.fail("boom").await;
        let job = registry.get(handle.id()).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_cancel() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let handle = registry.create(asset(), 5).await;

        assert_ok!(registry.cancel(handle.id()).await);
        assert!(handle.cancel_token().is_cancelled());

        let job = registry.get(handle.id()).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(CANCELLED_MESSAGE));

        assert!(matches!(
            assert_err!(registry.cancel(handle.id()).await),
            WorkerError::JobFinished(_)
        ));
        assert!(assert_err!(registry.cancel(JobId(999)).await).is_not_found());
    }

    #[tokio::test]
    async fn test_remove_requires_terminal() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let handle = registry.create(asset(), 5).await;

        assert!(matches!(
            registry.remove(handle.id()).await,
            Err(WorkerError::JobActive(_))
        ));

        handle.complete(Vec::new()).await;
        registry.remove(handle.id()).await.unwrap();
        assert!(registry.get(handle.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let finished = registry.create(asset(), 1).await;
        let active = registry.create(asset(), 1).await;
        finished.complete(Vec::new()).await;

        assert_eq!(registry.evict_expired(Utc::now()).await, 0);

        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(registry.evict_expired(later).await, 1);
        assert!(registry.get(finished.id()).await.is_none());
        assert!(registry.get(active.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_eviction() {
        let registry = JobRegistry::new(Duration::ZERO);
        let first = registry.create(asset(), 1).await;
        first.complete(Vec::new()).await;
        registry.evict_expired(Utc::now()).await;

        let second = registry.create(asset(), 1).await;
        assert!(second.id() > first.id());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_tasks() {
        let registry = JobRegistry::new(Duration::from_secs(60));
        let handle = registry.create(asset(), 1).await;

        let token = handle.cancel_token();
        handle.attach_task(tokio::spawn(async move { token.cancelled().await }));

        registry.shutdown().await;
        assert!(handle.cancel_token().is_cancelled());
        assert!(!registry.join(handle.id()).await);
    }
}
