//! Integration event queue: durable hand-off between deciding to notify the
//! outside world and reaching the broker.
//!
//! Jobs are claimed by exactly one worker; a claimed job is completed,
//! released for a later attempt, or parked as failed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use catalog_core::clock::Clock;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::MessagingError;
use crate::integration_event::IntegrationEvent;

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    /// Job identifier.
    pub id: Uuid,
    /// The event to publish.
    pub event: IntegrationEvent,
    /// Number of claims so far, including this one.
    pub attempts: i32,
}

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Published.
    Completed,
    /// Given up on.
    Failed,
}

/// Durable, at-least-once queue of integration events.
#[async_trait]
pub trait IntegrationEventQueue: Send + Sync {
    /// Enqueues `event`, returning the job id.
    async fn add(&self, event: IntegrationEvent) -> Result<Uuid, MessagingError>;

    /// Claims the oldest available job, if any.
    async fn claim(&self) -> Result<Option<QueuedJob>, MessagingError>;

    /// Marks a claimed job as published.
    async fn complete(&self, job_id: Uuid) -> Result<(), MessagingError>;

    /// Returns a claimed job to the queue, available again after `delay`.
    async fn release(
        &self,
        job_id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<(), MessagingError>;

    /// Parks a claimed job as failed.
    async fn park(&self, job_id: Uuid, error: &str) -> Result<(), MessagingError>;

    /// Returns jobs stuck in processing for longer than `older_than` to the
    /// queue, e.g. after a worker crashed mid-publish.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, MessagingError>;

    /// Number of jobs waiting to be claimed.
    async fn pending_count(&self) -> Result<u64, MessagingError>;
}

#[derive(Debug, Clone)]
struct JobRecord {
    id: Uuid,
    event: IntegrationEvent,
    status: JobStatus,
    attempts: i32,
    available_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Queue kept in process memory; durability ends with the process.
pub struct InMemoryIntegrationEventQueue {
    jobs: Mutex<Vec<JobRecord>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryIntegrationEventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIntegrationEventQueue")
            .field("jobs", &self.jobs().len())
            .finish_non_exhaustive()
    }
}

impl InMemoryIntegrationEventQueue {
    /// Creates an empty queue that schedules with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            clock,
        }
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<JobRecord>> {
        self.jobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Status of `job_id`, if known.
    #[must_use]
    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs()
            .iter()
            .find(|job| job.id == job_id)
            .map(|job| job.status)
    }

    /// Last error recorded for `job_id`.
    #[must_use]
    pub fn last_error(&self, job_id: Uuid) -> Option<String> {
        self.jobs()
            .iter()
            .find(|job| job.id == job_id)
            .and_then(|job| job.last_error.clone())
    }

    /// Events of every job ever added, in insertion order.
    #[must_use]
    pub fn events(&self) -> Vec<IntegrationEvent> {
        self.jobs().iter().map(|job| job.event.clone()).collect()
    }

    fn update(
        &self,
        job_id: Uuid,
        change: impl FnOnce(&mut JobRecord),
    ) -> Result<(), MessagingError> {
        let mut jobs = self.jobs();
        let job = jobs
            .iter_mut()
            .find(|job| job.id == job_id && job.status == JobStatus::Processing)
            .ok_or_else(|| MessagingError::Queue(format!("job {job_id} is not claimed")))?;
        change(job);
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[async_trait]
impl IntegrationEventQueue for InMemoryIntegrationEventQueue {
    async fn add(&self, event: IntegrationEvent) -> Result<Uuid, MessagingError> {
        let id = Uuid::new_v4();
        let now = self.clock.now();
        self.jobs().push(JobRecord {
            id,
            event,
            status: JobStatus::Pending,
            attempts: 0,
            available_at: now,
            claimed_at: None,
            last_error: None,
        });
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>, MessagingError> {
        let now = self.clock.now();
        let mut jobs = self.jobs();
        let Some(job) = jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::Pending && job.available_at <= now)
        else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.claimed_at = Some(now);
        Ok(Some(QueuedJob {
            id: job.id,
            event: job.event.clone(),
            attempts: job.attempts,
        }))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), MessagingError> {
        self.update(job_id, |job| {
            job.status = JobStatus::Completed;
            job.last_error = None;
        })
    }

    async fn release(
        &self,
        job_id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let available_at = self.clock.now() + to_chrono(delay);
        self.update(job_id, |job| {
            job.status = JobStatus::Pending;
            job.available_at = available_at;
            job.last_error = Some(error.to_owned());
        })
    }

    async fn park(&self, job_id: Uuid, error: &str) -> Result<(), MessagingError> {
        self.update(job_id, |job| {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_owned());
        })
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, MessagingError> {
        let cutoff = self.clock.now() - to_chrono(older_than);
        let mut requeued = 0;
        for job in self.jobs().iter_mut() {
            if job.status == JobStatus::Processing && job.claimed_at.is_some_and(|at| at <= cutoff)
            {
                job.status = JobStatus::Pending;
                job.claimed_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn pending_count(&self) -> Result<u64, MessagingError> {
        let pending = self
            .jobs()
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .count();
        Ok(pending as u64)
    }
}
