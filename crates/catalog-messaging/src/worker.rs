//! Background worker that drains the integration event queue into the
//! message bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::MessagingError;
use crate::message_bus::MessageBus;
use crate::queue::IntegrationEventQueue;

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Attempts after which a job is parked as failed.
    pub max_attempts: i32,
    /// Delay before a failed job becomes claimable again.
    pub retry_delay: Duration,
    /// Claims older than this are considered abandoned.
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Nothing was ready.
    Idle,
    /// A job was published and completed.
    Published,
    /// Publishing failed; the job will be retried.
    Retrying,
    /// Publishing failed for the last time; the job is parked.
    Parked,
}

/// Publishes queued integration events, one job per poll.
pub struct IntegrationEventWorker {
    queue: Arc<dyn IntegrationEventQueue>,
    bus: MessageBus,
    config: WorkerConfig,
}

impl std::fmt::Debug for IntegrationEventWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationEventWorker")
            .field("bus", &self.bus)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IntegrationEventWorker {
    /// Creates a worker.
    #[must_use]
    pub fn new(queue: Arc<dyn IntegrationEventQueue>, bus: MessageBus, config: WorkerConfig) -> Self {
        Self { queue, bus, config }
    }

    /// Claims and publishes at most one job.
    ///
    /// # Errors
    ///
    /// Returns queue failures, and programmer errors (such as a missing
    /// topology) after parking the offending job.
    pub async fn run_once(&self) -> Result<WorkerOutcome, MessagingError> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(WorkerOutcome::Idle);
        };

        match self.bus.publish(&job.event).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                debug!(job_id = %job.id, "integration event job completed");
                Ok(WorkerOutcome::Published)
            }
            Err(err) if err.is_programmer_error() => {
                error!(job_id = %job.id, error = %err, "integration event cannot be published");
                self.queue.park(job.id, &err.to_string()).await?;
                Err(err)
            }
            Err(err) if job.attempts >= self.config.max_attempts => {
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %err,
                    "integration event job exhausted its attempts"
                );
                self.queue.park(job.id, &err.to_string()).await?;
                Ok(WorkerOutcome::Parked)
            }
            Err(err) => {
                warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %err,
                    "integration event publish failed, retrying"
                );
                self.queue
                    .release(job.id, &err.to_string(), self.config.retry_delay)
                    .await?;
                Ok(WorkerOutcome::Retrying)
            }
        }
    }

    /// Polls until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Stops and returns the first programmer error; other failures are
    /// logged and polled past.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MessagingError> {
        info!(
            poll_interval = ?self.config.poll_interval,
            "integration event worker started"
        );
        match self.queue.requeue_stale(self.config.stale_after).await {
            Ok(0) => {}
            Ok(count) => info!(count, "requeued abandoned integration event jobs"),
            Err(err) => warn!(error = %err, "failed to requeue abandoned jobs"),
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(WorkerOutcome::Idle) => true,
                Ok(_) => false,
                Err(err) if err.is_programmer_error() => return Err(err),
                Err(err) => {
                    error!(error = %err, "integration event worker poll failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!("integration event worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::integration_event::{IntegrationEvent, IntegrationEventName};
    use crate::message_bus::TopologyMap;
    use crate::queue::{InMemoryIntegrationEventQueue, JobStatus};
    use catalog_test_support::{FixedClock, fixed_now};

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        queue: Arc<InMemoryIntegrationEventQueue>,
        worker: IntegrationEventWorker,
    }

    const ENCODER_QUEUE: &str = "encoder";

    fn fixture(topology: TopologyMap, max_attempts: i32) -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        broker.bind("amq.direct", "videos.convert", ENCODER_QUEUE);
        let queue = Arc::new(InMemoryIntegrationEventQueue::new(Arc::new(FixedClock(
            fixed_now(),
        ))));
        let config = WorkerConfig {
            max_attempts,
            retry_delay: Duration::ZERO,
            ..WorkerConfig::default()
        };
        let worker = IntegrationEventWorker::new(
            queue.clone(),
            MessageBus::new(broker.clone(), topology),
            config,
        );
        Fixture {
            broker,
            queue,
            worker,
        }
    }

    fn event() -> IntegrationEvent {
        IntegrationEvent::new(
            IntegrationEventName::VideoAudioUploaded,
            serde_json::json!({ "resource_id": "x.video", "file_path": "videos/x/videos/v.mp4" }),
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn test_run_once_publishes_and_completes_job() {
        // Arrange
        let fx = fixture(TopologyMap::default(), 3);
        let id = fx.queue.add(event()).await.unwrap();

        // Act
        let outcome = fx.worker.run_once().await.unwrap();

        // Assert
        assert_eq!(outcome, WorkerOutcome::Published);
        assert_eq!(fx.queue.status(id), Some(JobStatus::Completed));
        assert_eq!(fx.broker.published().len(), 1);
        assert_eq!(fx.broker.queue_len(ENCODER_QUEUE), 1);
    }

    #[tokio::test]
    async fn test_unroutable_event_is_retried_then_parked_not_completed() {
        // Arrange
        let queue = Arc::new(InMemoryIntegrationEventQueue::new(Arc::new(FixedClock(
            fixed_now(),
        ))));
        let broker = Arc::new(InMemoryBroker::new());
        broker.bind("amq.direct", "videos.convert.result", "micro-videos/admin");
        let worker = IntegrationEventWorker::new(
            queue.clone(),
            MessageBus::new(broker.clone(), TopologyMap::default()),
            WorkerConfig {
                max_attempts: 2,
                retry_delay: Duration::ZERO,
                ..WorkerConfig::default()
            },
        );
        let id = queue.add(event()).await.unwrap();

        // Act
        let first = worker.run_once().await.unwrap();
        let status_after_first = queue.status(id);
        let second = worker.run_once().await.unwrap();

        // Assert
        assert_eq!(first, WorkerOutcome::Retrying);
        assert_eq!(status_after_first, Some(JobStatus::Pending));
        assert_eq!(second, WorkerOutcome::Parked);
        assert_eq!(queue.status(id), Some(JobStatus::Failed));
        assert!(
            queue
                .last_error(id)
                .is_some_and(|error| error.contains("unroutable"))
        );
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_run_once_on_empty_queue_is_idle() {
        let fx = fixture(TopologyMap::default(), 3);

        let outcome = fx.worker.run_once().await.unwrap();

        assert_eq!(outcome, WorkerOutcome::Idle);
    }

    #[tokio::test]
    async fn test_broker_outage_is_retried_then_parked() {
        // Arrange
        let fx = fixture(TopologyMap::default(), 2);
        fx.broker.set_unavailable(true);
        let id = fx.queue.add(event()).await.unwrap();

        // Act
        let first = fx.worker.run_once().await.unwrap();
        let second = fx.worker.run_once().await.unwrap();

        // Assert
        assert_eq!(first, WorkerOutcome::Retrying);
        assert_eq!(second, WorkerOutcome::Parked);
        assert_eq!(fx.queue.status(id), Some(JobStatus::Failed));
        assert!(fx.broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_job_survives_outage_and_publishes_after_recovery() {
        let fx = fixture(TopologyMap::default(), 5);
        fx.broker.set_unavailable(true);
        let id = fx.queue.add(event()).await.unwrap();
        fx.worker.run_once().await.unwrap();

        fx.broker.set_unavailable(false);
        let outcome = fx.worker.run_once().await.unwrap();

        assert_eq!(outcome, WorkerOutcome::Published);
        assert_eq!(fx.queue.status(id), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_missing_topology_parks_job_and_reports_error() {
        let fx = fixture(TopologyMap::empty(), 5);
        let id = fx.queue.add(event()).await.unwrap();

        let result = fx.worker.run_once().await;

        assert!(matches!(
            result,
            Err(MessagingError::UnknownEventTopology(_))
        ));
        assert_eq!(fx.queue.status(id), Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn test_run_stops_on_programmer_error() {
        let fx = fixture(TopologyMap::empty(), 5);
        fx.queue.add(event()).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let result = fx.worker.run(rx).await;

        assert!(matches!(
            result,
            Err(MessagingError::UnknownEventTopology(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture(TopologyMap::default(), 3);
        fx.queue.add(event()).await.unwrap();
        let (tx, rx) = watch::channel(false);
        let worker = Arc::new(fx.worker);

        let task = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });
        while fx.broker.published().is_empty() {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(fx.broker.published().len(), 1);
    }
}
