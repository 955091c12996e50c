//! Integration tests for the job queue repository.

use chrono::{Duration, Utc};
use lookout_db::models::job::JobState;
use lookout_db::repositories::JobRepo;
use sqlx::PgPool;

const URL: &str = "https://example.com/";

fn window() -> Duration {
    Duration::hours(1)
}

async fn enqueue(pool: &PgPool, url: &str) -> bool {
    let mut conn = pool.acquire().await.unwrap();
    JobRepo::enqueue(&mut conn, url, 5, window())
        .await
        .unwrap()
}

#[sqlx::test]
async fn enqueue_rejects_duplicate_while_job_is_live(pool: PgPool) {
    assert!(enqueue(&pool, URL).await);
    assert!(!enqueue(&pool, URL).await);
    // A different URL is unaffected.
    assert!(enqueue(&pool, "https://other.example/").await);
}

#[sqlx::test]
async fn enqueue_rejects_duplicate_within_completed_window(pool: PgPool) {
    assert!(enqueue(&pool, URL).await);
    let job = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    JobRepo::complete(&pool, job.id).await.unwrap();

    // Recently completed: still a duplicate.
    assert!(!enqueue(&pool, URL).await);

    // Age the completion past the uniqueness window.
    sqlx::query("UPDATE scan_jobs SET finalized_at = $2 WHERE id = $1")
        .bind(job.id)
        .bind(Utc::now() - window() - Duration::minutes(1))
        .execute(&pool)
        .await
        .unwrap();
    assert!(enqueue(&pool, URL).await);
}

#[sqlx::test]
async fn enqueue_ignores_cancelled_and_discarded_jobs(pool: PgPool) {
    assert!(enqueue(&pool, URL).await);
    let job = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    JobRepo::cancel(&pool, job.id, "no pending scans for URL")
        .await
        .unwrap();

    // Cancelled jobs do not suppress a fresh enqueue.
    assert!(enqueue(&pool, URL).await);
}

#[sqlx::test]
async fn enqueue_inside_rolled_back_transaction_leaves_no_job(pool: PgPool) {
    {
        let mut tx = pool.begin().await.unwrap();
        assert!(JobRepo::enqueue(&mut tx, URL, 5, window()).await.unwrap());
        // Dropped without commit: rolled back.
    }

    assert!(JobRepo::jobs_for_url(&pool, URL).await.unwrap().is_empty());
    assert!(enqueue(&pool, URL).await);
}

#[sqlx::test]
async fn claim_next_claims_oldest_due_job_once(pool: PgPool) {
    assert!(enqueue(&pool, "https://a.example/").await);
    assert!(enqueue(&pool, "https://b.example/").await);

    let first = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(first.url, "https://a.example/");
    assert_eq!(first.job_state(), Some(JobState::Running));

    let second = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(second.url, "https://b.example/");

    assert!(JobRepo::claim_next(&pool).await.unwrap().is_none());
}

#[sqlx::test]
async fn claim_next_skips_jobs_scheduled_in_the_future(pool: PgPool) {
    assert!(enqueue(&pool, URL).await);
    let job = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    JobRepo::snooze(&pool, job.id, Utc::now() + Duration::minutes(5))
        .await
        .unwrap();

    assert!(JobRepo::claim_next(&pool).await.unwrap().is_none());

    // Once the snooze elapses the job is runnable again.
    JobRepo::snooze(&pool, job.id, Utc::now() - Duration::seconds(1))
        .await
        .unwrap();
    let reclaimed = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, job.id);
}

#[sqlx::test]
async fn snooze_does_not_consume_an_attempt(pool: PgPool) {
    assert!(enqueue(&pool, URL).await);
    let job = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(job.attempt, 0);

    JobRepo::snooze(&pool, job.id, Utc::now() + Duration::milliseconds(10))
        .await
        .unwrap();

    let snoozed = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(snoozed.job_state(), Some(JobState::Scheduled));
    assert_eq!(snoozed.attempt, 0);
}

#[sqlx::test]
async fn fail_retries_until_budget_exhausted_then_discards(pool: PgPool) {
    let mut conn = pool.acquire().await.unwrap();
    assert!(JobRepo::enqueue(&mut conn, URL, 3, window()).await.unwrap());
    drop(conn);

    let job = JobRepo::claim_next(&pool).await.unwrap().unwrap();

    for expected_attempt in [1, 2] {
        let state = JobRepo::fail(&pool, job.id, "scan failed", Utc::now())
            .await
            .unwrap();
        assert_eq!(state, JobState::Retryable);
        let current = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
        assert_eq!(current.attempt, expected_attempt);

        let reclaimed = JobRepo::claim_next(&pool).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
    }

    let state = JobRepo::fail(&pool, job.id, "scan failed", Utc::now())
        .await
        .unwrap();
    assert_eq!(state, JobState::Discarded);

    let discarded = JobRepo::find_by_id(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(discarded.attempt, 3);
    assert!(discarded.finalized_at.is_some());
    assert!(JobRepo::claim_next(&pool).await.unwrap().is_none());
}

#[sqlx::test]
async fn release_stale_requeues_stuck_running_jobs(pool: PgPool) {
    assert!(enqueue(&pool, URL).await);
    let job = JobRepo::claim_next(&pool).await.unwrap().unwrap();

    // Fresh running jobs are left alone.
    assert_eq!(
        JobRepo::release_stale(&pool, Duration::minutes(5))
            .await
            .unwrap(),
        0
    );

    sqlx::query("UPDATE scan_jobs SET updated_at = $2 WHERE id = $1")
        .bind(job.id)
        .bind(Utc::now() - Duration::minutes(10))
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(
        JobRepo::release_stale(&pool, Duration::minutes(5))
            .await
            .unwrap(),
        1
    );
    let released = JobRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(released.id, job.id);
}
