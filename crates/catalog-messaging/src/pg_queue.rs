//! `PostgreSQL` implementation of the `IntegrationEventQueue` trait.
//!
//! Jobs live in `integration_event_jobs`. Claiming uses
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive the same
//! job. A row whose event name no longer decodes is parked as `failed`
//! inside the claiming transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::error::MessagingError;
use crate::integration_event::{IntegrationEvent, IntegrationEventName};
use crate::queue::{IntegrationEventQueue, QueuedJob};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    event_name: String,
    payload: serde_json::Value,
    occurred_on: DateTime<Utc>,
    event_version: i32,
    attempts: i32,
}

impl TryFrom<JobRow> for QueuedJob {
    type Error = MessagingError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let event_name: IntegrationEventName =
            serde_json::from_value(serde_json::Value::String(row.event_name))?;
        Ok(Self {
            id: row.id,
            event: IntegrationEvent {
                event_name,
                payload: row.payload,
                occurred_on: row.occurred_on,
                event_version: row.event_version,
            },
            attempts: row.attempts,
        })
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

/// PostgreSQL-backed integration event queue.
#[derive(Debug, Clone)]
pub struct PgIntegrationEventQueue {
    pool: PgPool,
}

impl PgIntegrationEventQueue {
    /// Creates a new `PgIntegrationEventQueue`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: &str,
        error: Option<&str>,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let result = sqlx::query(
            "UPDATE integration_event_jobs \
             SET status = $2, last_error = $3, claimed_at = NULL, \
                 available_at = now() + make_interval(secs => $4) \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(status)
        .bind(error)
        .bind(seconds(delay))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::Queue(format!("job {job_id} is not claimed")));
        }
        Ok(())
    }
}

#[async_trait]
impl IntegrationEventQueue for PgIntegrationEventQueue {
    async fn add(&self, event: IntegrationEvent) -> Result<Uuid, MessagingError> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO integration_event_jobs \
                 (id, event_name, payload, occurred_on, event_version) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(event.event_name.as_str())
        .bind(&event.payload)
        .bind(event.occurred_on)
        .bind(event.event_version)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>, MessagingError> {
        loop {
            let mut tx = self.pool.begin().await?;
            let row: Option<JobRow> = sqlx::query_as(
                "UPDATE integration_event_jobs \
                 SET status = 'processing', attempts = attempts + 1, claimed_at = now() \
                 WHERE id = ( \
                     SELECT id FROM integration_event_jobs \
                     WHERE status = 'pending' AND available_at <= now() \
                     ORDER BY created_at, id \
                     FOR UPDATE SKIP LOCKED \
                     LIMIT 1 \
                 ) \
                 RETURNING id, event_name, payload, occurred_on, event_version, attempts",
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                tx.commit().await?;
                return Ok(None);
            };
            let job_id = row.id;
            match QueuedJob::try_from(row) {
                Ok(job) => {
                    tx.commit().await?;
                    return Ok(Some(job));
                }
                Err(err) => {
                    // Undecodable rows never become claimable again.
                    warn!(%job_id, error = %err, "parking undecodable integration event job");
                    sqlx::query(
                        "UPDATE integration_event_jobs \
                         SET status = 'failed', last_error = $2, claimed_at = NULL \
                         WHERE id = $1",
                    )
                    .bind(job_id)
                    .bind(err.to_string())
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;
                }
            }
        }
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), MessagingError> {
        self.finish(job_id, "completed", None, Duration::ZERO).await
    }

    async fn release(
        &self,
        job_id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        self.finish(job_id, "pending", Some(error), delay).await
    }

    async fn park(&self, job_id: Uuid, error: &str) -> Result<(), MessagingError> {
        self.finish(job_id, "failed", Some(error), Duration::ZERO)
            .await
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, MessagingError> {
        let result = sqlx::query(
            "UPDATE integration_event_jobs \
             SET status = 'pending', claimed_at = NULL \
             WHERE status = 'processing' \
               AND claimed_at <= now() - make_interval(secs => $1)",
        )
        .bind(seconds(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<u64, MessagingError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM integration_event_jobs WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
