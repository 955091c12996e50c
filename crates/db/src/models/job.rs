//! Row types for the `scan_jobs` table.

use lookout_core::Timestamp;
use sqlx::FromRow;

/// Queue job lifecycle state, stored as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Runnable immediately.
    Available,
    /// Claimed by a worker.
    Running,
    /// Failed, waiting for its backoff to elapse.
    Retryable,
    /// Snoozed or deferred to a future instant.
    Scheduled,
    /// Finished successfully (terminal).
    Completed,
    /// Cancelled permanently, e.g. an orphaned job (terminal).
    Cancelled,
    /// Attempt budget exhausted (terminal).
    Discarded,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Available => "available",
            JobState::Running => "running",
            JobState::Retryable => "retryable",
            JobState::Scheduled => "scheduled",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Discarded => "discarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(JobState::Available),
            "running" => Some(JobState::Running),
            "retryable" => Some(JobState::Retryable),
            "scheduled" => Some(JobState::Scheduled),
            "completed" => Some(JobState::Completed),
            "cancelled" => Some(JobState::Cancelled),
            "discarded" => Some(JobState::Discarded),
            _ => None,
        }
    }
}

/// A row from the `scan_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: i64,
    /// Canonical URL this job scans; all pending scans for it are updated
    /// together when the job finishes.
    pub url: String,
    pub state: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub scheduled_at: Timestamp,
    pub last_error: Option<String>,
    pub finalized_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Parsed lifecycle state. Unknown values (which the CHECK constraint
    /// rules out) read as `None`.
    pub fn job_state(&self) -> Option<JobState> {
        JobState::parse(&self.state)
    }
}
