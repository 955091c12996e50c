//! Repository for the `scan_jobs` table, the queue runtime.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED` so concurrent workers
//! never double-dispatch. Per-URL uniqueness is enforced at insert time
//! under an advisory transaction lock, which also makes the insert atomic
//! with any surrounding scan insert.

use chrono::Utc;
use lookout_core::Timestamp;
use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::models::job::{Job, JobState};
use crate::DbError;

/// Column list for `scan_jobs` queries.
const COLUMNS: &str = "\
    id, url, state, attempt, max_attempts, scheduled_at, last_error, \
    finalized_at, created_at, updated_at";

/// Queue operations for scan jobs.
pub struct JobRepo;

impl JobRepo {
    /// Enqueue a job for the URL unless a duplicate exists.
    ///
    /// A duplicate is any job for the same URL in a non-terminal state, or a
    /// completed job finalized within `uniqueness_window` (the result-cache
    /// TTL). Returns `true` when a new job was inserted, `false` when the
    /// insert was rejected as a duplicate.
    ///
    /// Runs on a connection so the advisory lock and the insert share one
    /// transaction; when called inside the enqueue transaction the job only
    /// becomes visible on commit.
    pub async fn enqueue(
        conn: &mut PgConnection,
        url: &str,
        max_attempts: i32,
        uniqueness_window: chrono::Duration,
    ) -> Result<bool, DbError> {
        // Serialize concurrent inserts for the same URL for the rest of the
        // transaction; hashtext keys the lock by canonical URL.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(url)
            .execute(&mut *conn)
            .await?;

        let cutoff = Utc::now() - uniqueness_window;
        let done = sqlx::query(
            "INSERT INTO scan_jobs (url, max_attempts) \
             SELECT $1, $2 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM scan_jobs \
                 WHERE url = $1 \
                   AND (state IN ('available', 'running', 'retryable', 'scheduled') \
                        OR (state = 'completed' AND finalized_at > $3)) \
             )",
        )
        .bind(url)
        .bind(max_attempts)
        .bind(cutoff)
        .execute(&mut *conn)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    /// Atomically claim the oldest runnable job, transitioning it to
    /// `running`. Returns `None` when no job is due.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Job>, DbError> {
        let query = format!(
            "UPDATE scan_jobs SET state = 'running', updated_at = now() \
             WHERE id = ( \
                 SELECT id FROM scan_jobs \
                 WHERE state IN ('available', 'retryable', 'scheduled') \
                   AND scheduled_at <= now() \
                 ORDER BY scheduled_at, id \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .fetch_optional(pool)
            .await?;

        Ok(job)
    }

    /// Mark a job as completed (terminal).
    pub async fn complete(exec: impl PgExecutor<'_>, id: i64) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE scan_jobs \
             SET state = 'completed', finalized_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(exec)
        .await?;

        Ok(())
    }

    /// Cancel a job permanently (terminal), recording the reason.
    pub async fn cancel(
        exec: impl PgExecutor<'_>,
        id: i64,
        reason: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE scan_jobs \
             SET state = 'cancelled', last_error = $2, finalized_at = now(), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(exec)
        .await?;

        Ok(())
    }

    /// Re-schedule a job for a future instant without consuming an attempt.
    pub async fn snooze(
        exec: impl PgExecutor<'_>,
        id: i64,
        until: Timestamp,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE scan_jobs \
             SET state = 'scheduled', scheduled_at = $2, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(until)
        .execute(exec)
        .await?;

        Ok(())
    }

    /// Record a failed attempt. The attempt counter is incremented; the job
    /// becomes `discarded` (terminal) once the budget is exhausted,
    /// otherwise `retryable` at `retry_at`.
    pub async fn fail(
        exec: impl PgExecutor<'_>,
        id: i64,
        error: &str,
        retry_at: Timestamp,
    ) -> Result<JobState, DbError> {
        let state: String = sqlx::query_scalar(
            "UPDATE scan_jobs SET \
                 attempt      = attempt + 1, \
                 last_error   = $2, \
                 updated_at   = now(), \
                 state        = CASE WHEN attempt + 1 >= max_attempts \
                                     THEN 'discarded' ELSE 'retryable' END, \
                 finalized_at = CASE WHEN attempt + 1 >= max_attempts \
                                     THEN now() ELSE NULL END, \
                 scheduled_at = $3 \
             WHERE id = $1 \
             RETURNING state",
        )
        .bind(id)
        .bind(error)
        .bind(retry_at)
        .fetch_one(exec)
        .await?;

        JobState::parse(&state)
            .ok_or_else(|| DbError::Decode(format!("unknown job state {state:?}")))
    }

    /// Sweep jobs stuck in `running` back to `retryable`.
    ///
    /// Run at worker startup: a crash between claim and disposition would
    /// otherwise strand the job forever.
    pub async fn release_stale(
        pool: &PgPool,
        stuck_for: chrono::Duration,
    ) -> Result<u64, DbError> {
        let cutoff = Utc::now() - stuck_for;
        let done = sqlx::query(
            "UPDATE scan_jobs \
             SET state = 'retryable', scheduled_at = now(), updated_at = now() \
             WHERE state = 'running' AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;

        Ok(done.rows_affected())
    }

    /// Fetch a job by id.
    pub async fn find_by_id(
        exec: impl PgExecutor<'_>,
        id: i64,
    ) -> Result<Option<Job>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM scan_jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(exec)
            .await?;

        Ok(job)
    }

    /// Jobs for a URL, newest first. Test and debugging helper.
    pub async fn jobs_for_url(
        exec: impl PgExecutor<'_>,
        url: &str,
    ) -> Result<Vec<Job>, DbError> {
        let query = format!("SELECT {COLUMNS} FROM scan_jobs WHERE url = $1 ORDER BY id DESC");
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(url)
            .fetch_all(exec)
            .await?;

        Ok(jobs)
    }
}
