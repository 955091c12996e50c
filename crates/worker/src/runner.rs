//! Queue runner: claims scan jobs and maps scan outcomes to queue actions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lookout_core::Kind;
use lookout_db::models::job::Job;
use lookout_db::repositories::JobRepo;
use lookout_db::{DbError, DbPool};
use lookout_scanner::Scanner;
use tokio_util::sync::CancellationToken;

use crate::gate::RateLimitGate;

/// Base delay for retrying a failed job; doubled per attempt.
const RETRY_BACKOFF_BASE_SECS: i64 = 1;
/// Retry backoff cap.
const RETRY_BACKOFF_MAX_SECS: i64 = 300;

/// Worker settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum duration a single scan is allowed to run.
    pub job_timeout: Duration,
    /// Number of jobs processed in parallel.
    pub concurrency: u32,
    /// Idle sleep between queue polls.
    pub poll_interval: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `LOOKOUT_WORKER_JOB_TIMEOUT_SECS` | `60`    |
    /// | `LOOKOUT_WORKER_CONCURRENCY`      | `10`    |
    /// | `LOOKOUT_WORKER_POLL_INTERVAL_MS` | `1000`  |
    pub fn from_env() -> Self {
        let job_timeout_secs: u64 = std::env::var("LOOKOUT_WORKER_JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("LOOKOUT_WORKER_JOB_TIMEOUT_SECS must be a valid u64");

        let concurrency: u32 = std::env::var("LOOKOUT_WORKER_CONCURRENCY")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("LOOKOUT_WORKER_CONCURRENCY must be a valid u32");

        let poll_interval_ms: u64 = std::env::var("LOOKOUT_WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("LOOKOUT_WORKER_POLL_INTERVAL_MS must be a valid u64");

        Self {
            job_timeout: Duration::from_secs(job_timeout_secs),
            concurrency,
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}

/// How a processed job leaves the worker.
#[derive(Debug)]
enum Disposition {
    /// Scan succeeded; the job is done.
    Complete,
    /// Permanent: no pending scans remain, do not retry.
    Cancel(String),
    /// Upstream rate limit: re-run at the given instant without consuming
    /// an attempt.
    Snooze(chrono::DateTime<chrono::Utc>),
    /// Retryable failure; the queue applies backoff until the attempt
    /// budget runs out.
    Fail(String),
}

/// Processes scan jobs under the shared rate-limit gate.
pub struct Worker {
    pool: DbPool,
    scanner: Scanner,
    gate: Arc<RateLimitGate>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(pool: DbPool, scanner: Scanner, config: WorkerConfig) -> Self {
        Self {
            pool,
            scanner,
            gate: Arc::new(RateLimitGate::new()),
            config,
        }
    }

    /// The shared rate-limit gate.
    pub fn gate(&self) -> &RateLimitGate {
        &self.gate
    }

    /// Run the worker until `cancel` fires, then drain in-flight jobs.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        // Recover jobs stranded in `running` by a previous crash.
        match JobRepo::release_stale(&self.pool, stale_cutoff(self.config.job_timeout)).await {
            Ok(0) => {}
            Ok(released) => tracing::info!(released, "released stale running jobs"),
            Err(e) => tracing::error!(error = %e, "could not release stale jobs"),
        }

        tracing::info!(
            concurrency = self.config.concurrency,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "worker started",
        );

        let mut handles = Vec::with_capacity(self.config.concurrency as usize);
        for _ in 0..self.config.concurrency {
            let worker = Arc::clone(&self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker.work_loop(cancel).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("worker stopped");
    }

    async fn work_loop(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            match self.tick(&cancel).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "queue poll failed");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Claim and process at most one job. Returns whether a job was found.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<bool, DbError> {
        let Some(job) = JobRepo::claim_next(&self.pool).await? else {
            return Ok(false);
        };

        let disposition = self.run_job(&job, cancel).await;
        self.apply(&job, disposition).await;

        Ok(true)
    }

    /// Execute one claimed job: reserve a rate-limit slot, scan, release
    /// the slot, and classify the outcome.
    async fn run_job(&self, job: &Job, cancel: &CancellationToken) -> Disposition {
        tracing::info!(job_id = job.id, url = %job.url, "processing scan job");

        if let Err(e) = self.gate.reserve(cancel).await {
            tracing::error!(job_id = job.id, error = %e, "error reserving rate limit");
            return Disposition::Fail(format!("could not reserve rate limit: {e}"));
        }

        let outcome = match tokio::time::timeout(
            self.config.job_timeout,
            self.scanner.scan(&job.url),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                // The scan future was dropped; release the slot with no
                // fresh headers.
                self.gate.finish(None);
                tracing::error!(job_id = job.id, url = %job.url, "scan job timed out");
                return Disposition::Fail("scan job timed out".to_string());
            }
        };

        match outcome {
            Ok(status) => {
                self.gate.finish(status);
                tracing::info!(job_id = job.id, url = %job.url, "URL scanned successfully");
                Disposition::Complete
            }
            Err(failure) => {
                self.gate.finish(failure.rate_limit);

                if failure.source.is(Kind::Conflict) {
                    return Disposition::Cancel(failure.source.to_string());
                }

                tracing::error!(
                    job_id = job.id,
                    url = %job.url,
                    error = %failure.source,
                    "error scanning URL",
                );

                if failure.source.is(Kind::RateLimited) {
                    // Defer until the reported reset; now when the headers
                    // are missing or already in the past.
                    let until = failure
                        .rate_limit
                        .map(|rl| rl.reset_at)
                        .unwrap_or_else(Utc::now)
                        .max(Utc::now());
                    return Disposition::Snooze(until);
                }

                Disposition::Fail(failure.source.to_string())
            }
        }
    }

    async fn apply(&self, job: &Job, disposition: Disposition) {
        let applied = match disposition {
            Disposition::Complete => JobRepo::complete(&self.pool, job.id).await,
            Disposition::Cancel(reason) => {
                tracing::info!(job_id = job.id, url = %job.url, reason, "cancelling job");
                JobRepo::cancel(&self.pool, job.id, &reason).await
            }
            Disposition::Snooze(until) => {
                tracing::info!(job_id = job.id, url = %job.url, until = %until, "snoozing job");
                JobRepo::snooze(&self.pool, job.id, until).await
            }
            Disposition::Fail(error) => {
                let retry_at = Utc::now() + retry_backoff(job.attempt);
                JobRepo::fail(&self.pool, job.id, &error, retry_at)
                    .await
                    .map(|state| {
                        tracing::info!(
                            job_id = job.id,
                            state = state.as_str(),
                            "recorded failed attempt",
                        );
                    })
            }
        };

        if let Err(e) = applied {
            tracing::error!(job_id = job.id, error = %e, "could not update job state");
        }
    }
}

/// Exponential backoff for the nth retry, capped at five minutes.
fn retry_backoff(attempt: i32) -> chrono::Duration {
    let exp = attempt.clamp(0, 8) as u32;
    let secs = (RETRY_BACKOFF_BASE_SECS << exp).min(RETRY_BACKOFF_MAX_SECS);
    chrono::Duration::seconds(secs)
}

/// Running jobs untouched for twice the job timeout are considered stuck.
fn stale_cutoff(job_timeout: Duration) -> chrono::Duration {
    chrono::Duration::from_std(job_timeout * 2)
        .unwrap_or_else(|_| chrono::Duration::minutes(2))
}
