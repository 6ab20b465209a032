use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::now_millis;

use super::{NOTIFICATION, Notification};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts before a job is marked failed.
    pub max_attempts: u32,
    /// Deadline for a single handler run.
    pub job_timeout: Duration,
    /// Delay before the first retry, doubled for each further one.
    pub backoff_base: Duration,
    /// How often the idle worker looks for due retries.
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub payload: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl Job {
    pub fn payload<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// May run more than once for the same job.
    async fn run(&self, job: &Job) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Background job queue persisted in the `jobs` table, drained by one worker.
#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    config: Arc<QueueConfig>,
    handlers: Arc<DashMap<String, Arc<dyn JobHandler>>>,
    wake: Arc<Notify>,
}

const JOB_COLUMNS: &str = "id,kind,payload,status,attempts,last_error";

impl JobQueue {
    pub fn new(pool: SqlitePool, config: QueueConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            handlers: Arc::new(DashMap::new()),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn register(&self, kind: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind.to_owned(), handler);
    }

    pub async fn add<T: Serialize>(&self, kind: &str, payload: &T) -> anyhow::Result<Uuid> {
        let id = Self::insert(&self.pool, kind, payload).await?;
        self.wake_worker();
        Ok(id)
    }

    pub async fn notify(&self, notification: &Notification) -> anyhow::Result<Uuid> {
        self.add(NOTIFICATION, notification).await
    }

    /// Writes a job row through `executor` without waking the worker, so it
    /// can commit together with the write that caused it. Call
    /// `wake_worker` once committed.
    pub async fn insert<'e, T: Serialize>(
        executor: impl SqliteExecutor<'e>,
        kind: &str,
        payload: &T,
    ) -> anyhow::Result<Uuid> {
        let id = Uuid::now_v7();
        let now = now_millis();
        sqlx::query("INSERT INTO jobs (id,kind,payload,run_at,created_at) VALUES (?,?,?,?,?)")
            .bind(id)
            .bind(kind)
            .bind(serde_json::to_string(payload)?)
            .bind(now)
            .bind(now)
            .execute(executor)
            .await?;

        debug!(job_id = %id, kind, "job enqueued");
        Ok(id)
    }

    pub fn wake_worker(&self) {
        self.wake.notify_one();
    }

    pub async fn job(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        Ok(sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn stats(&self) -> anyhow::Result<QueueStats> {
        let counts: Vec<(JobStatus, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let counts: HashMap<_, _> = counts.into_iter().collect();
        let count = |status: JobStatus| counts.get(&status).copied().unwrap_or(0) as usize;

        Ok(QueueStats {
            queued: count(JobStatus::Queued),
            running: count(JobStatus::Running),
            completed: count(JobStatus::Completed),
            failed: count(JobStatus::Failed),
        })
    }

    /// Jobs left running by a previous process go back to the queue.
    pub async fn requeue_abandoned(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("UPDATE jobs SET status='queued' WHERE status='running'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn spawn_worker(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.work(shutdown).await })
    }

    async fn work(self, shutdown: CancellationToken) {
        match self.requeue_abandoned().await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "requeued jobs abandoned by a previous run"),
            Err(err) => error!(error = ?err, "could not requeue abandoned jobs"),
        }
        info!("job worker started");

        while !shutdown.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(processed) => !processed,
                Err(err) => {
                    error!(error = ?err, "job worker iteration failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!("job worker stopped");
    }

    /// Claims and runs the next due job. False when nothing was due.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let Some(job) = self.claim_next().await? else {
            return Ok(false);
        };

        match self.execute(&job).await {
            Ok(()) => {
                sqlx::query("UPDATE jobs SET status='completed', last_error=NULL WHERE id=?")
                    .bind(job.id)
                    .execute(&self.pool)
                    .await?;
                info!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, "job completed");
            }
            Err(err) => self.record_failure(&job, &err).await?,
        }

        Ok(true)
    }

    async fn claim_next(&self) -> anyhow::Result<Option<Job>> {
        Ok(sqlx::query_as(&format!(
            "UPDATE jobs SET status='running', attempts=attempts+1 \
             WHERE id = (SELECT id FROM jobs WHERE status='queued' AND run_at<=? ORDER BY run_at, created_at, rowid LIMIT 1) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn execute(&self, job: &Job) -> anyhow::Result<()> {
        let handler = self
            .handlers
            .get(&job.kind)
            .map(|handler| handler.clone())
            .ok_or_else(|| anyhow!("no handler registered for job kind {}", job.kind))?;

        let run = AssertUnwindSafe(handler.run(job)).catch_unwind();
        match tokio::time::timeout(self.config.job_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("job handler panicked")),
            Err(_) => Err(anyhow!("job timed out after {:?}", self.config.job_timeout)),
        }
    }

    async fn record_failure(&self, job: &Job, err: &anyhow::Error) -> anyhow::Result<()> {
        let unknown_kind = !self.handlers.contains_key(&job.kind);
        if unknown_kind || job.attempts >= i64::from(self.config.max_attempts) {
            sqlx::query("UPDATE jobs SET status='failed', last_error=? WHERE id=?")
                .bind(err.to_string())
                .bind(job.id)
                .execute(&self.pool)
                .await?;
            error!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, error = %err, "job failed permanently");
            return Ok(());
        }

        let delay = backoff(self.config.backoff_base, job.attempts);
        sqlx::query("UPDATE jobs SET status='queued', last_error=?, run_at=? WHERE id=?")
            .bind(err.to_string())
            .bind(now_millis() + delay.as_millis() as i64)
            .bind(job.id)
            .execute(&self.pool)
            .await?;
        warn!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempts,
            retry_in = ?delay,
            error = %err,
            "job attempt failed, will retry"
        );
        Ok(())
    }
}

/// Exponential delay before the retry that follows attempt `attempts`, plus up to half a base of jitter.
fn backoff(base: Duration, attempts: i64) -> Duration {
    if base.is_zero() {
        return base;
    }
    let exponent = (attempts.clamp(1, 16) - 1) as u32;
    let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
    base.saturating_mul(1u32 << exponent) + Duration::from_millis(jitter_ms)
}
