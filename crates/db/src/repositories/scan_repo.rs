//! Repository for the `scans` table.
//!
//! Every method takes an executor so the same operation runs against the
//! pool or inside a transaction. Soft-deleted rows are invisible to all
//! reads and updates.

use lookout_core::{Scan, ScanId, ScanStatus, Timestamp, UserId};
use sqlx::PgExecutor;

use crate::models::scan::{rows_into_domain, NewScan, ScanPage, ScanRow, ScanUpdates};
use crate::DbError;

/// Column list for `scans` queries.
const COLUMNS: &str = "\
    id, user_id, url, status, result, attempts, last_error, \
    created_at, updated_at, deleted_at";

/// Provides CRUD operations for scan records.
pub struct ScanRepo;

impl ScanRepo {
    /// Insert scans and return the stored rows, including generated ids and
    /// timestamps. An empty input yields an empty output without touching
    /// the database.
    pub async fn store_scans(
        exec: impl PgExecutor<'_>,
        scans: &[NewScan],
    ) -> Result<Vec<Scan>, DbError> {
        if scans.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<UserId> = scans.iter().map(|s| s.user_id).collect();
        let urls: Vec<String> = scans.iter().map(|s| s.url.clone()).collect();
        let statuses: Vec<String> = scans.iter().map(|s| s.status.as_str().to_string()).collect();

        let query = format!(
            "INSERT INTO scans (user_id, url, status) \
             SELECT * FROM UNNEST($1::uuid[], $2::text[], $3::text[]) \
             RETURNING {COLUMNS}"
        );
        let rows = sqlx::query_as::<_, ScanRow>(&query)
            .bind(&user_ids)
            .bind(&urls)
            .bind(&statuses)
            .fetch_all(exec)
            .await?;

        rows_into_domain(rows)
    }

    /// Atomically update every pending, non-deleted scan for the given URL.
    ///
    /// `attempts` is incremented by 1 and `updated_at` is set on each row.
    /// When the new status is `Failed` and `max_attempts > 0`, a row only
    /// flips to `FAILED` once its post-increment attempt count reaches the
    /// budget; before that it stays `PENDING` for the next retry. An empty
    /// `last_error` clears the column to NULL.
    pub async fn update_pending_by_url(
        exec: impl PgExecutor<'_>,
        url: &str,
        updates: &ScanUpdates,
    ) -> Result<u64, DbError> {
        let result_json = updates
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DbError::Decode(format!("scan result: {e}")))?;

        let done = sqlx::query(
            "UPDATE scans SET \
                 attempts   = attempts + 1, \
                 updated_at = now(), \
                 status     = CASE \
                                  WHEN $2 = 'FAILED' AND $3 > 0 AND attempts + 1 < $3 \
                                  THEN status \
                                  ELSE $2 \
                              END, \
                 result     = COALESCE($4, result), \
                 last_error = CASE \
                                  WHEN $5::text IS NULL THEN last_error \
                                  WHEN $5 = '' THEN NULL \
                                  ELSE $5 \
                              END \
             WHERE url = $1 AND status = 'PENDING' AND deleted_at IS NULL",
        )
        .bind(url)
        .bind(updates.status.as_str())
        .bind(updates.max_attempts)
        .bind(result_json)
        .bind(updates.last_error.as_deref())
        .execute(exec)
        .await?;

        Ok(done.rows_affected())
    }

    /// Number of pending, non-deleted scans for the URL across all users.
    pub async fn pending_count_by_url(
        exec: impl PgExecutor<'_>,
        url: &str,
    ) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scans \
             WHERE url = $1 AND status = 'PENDING' AND deleted_at IS NULL",
        )
        .bind(url)
        .fetch_one(exec)
        .await?;

        Ok(count)
    }

    /// Update a single non-deleted scan and return the updated row, or
    /// `None` when it does not exist. `attempts` is not touched.
    pub async fn update_by_id(
        exec: impl PgExecutor<'_>,
        id: ScanId,
        updates: &ScanUpdates,
    ) -> Result<Option<Scan>, DbError> {
        let result_json = updates
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| DbError::Decode(format!("scan result: {e}")))?;

        let query = format!(
            "UPDATE scans SET \
                 status     = $2, \
                 updated_at = now(), \
                 result     = COALESCE($3, result), \
                 last_error = CASE \
                                  WHEN $4::text IS NULL THEN last_error \
                                  WHEN $4 = '' THEN NULL \
                                  ELSE $4 \
                              END \
             WHERE id = $1 AND deleted_at IS NULL \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ScanRow>(&query)
            .bind(id)
            .bind(updates.status.as_str())
            .bind(result_json)
            .bind(updates.last_error.as_deref())
            .fetch_optional(exec)
            .await?;

        row.map(ScanRow::into_domain).transpose()
    }

    /// Soft-delete a scan owned by the user and return the deleted row, or
    /// `None` when no live row matched.
    pub async fn soft_delete(
        exec: impl PgExecutor<'_>,
        user_id: UserId,
        id: ScanId,
    ) -> Result<Option<Scan>, DbError> {
        let query = format!(
            "UPDATE scans SET deleted_at = now() \
             WHERE id = $2 AND user_id = $1 AND deleted_at IS NULL \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ScanRow>(&query)
            .bind(user_id)
            .bind(id)
            .fetch_optional(exec)
            .await?;

        row.map(ScanRow::into_domain).transpose()
    }

    /// Page through a user's scans, newest first, ordered by
    /// `(created_at DESC, id DESC)`. The cursor is an exclusive upper bound
    /// on `created_at`. One extra row is fetched to decide whether a next
    /// page exists.
    pub async fn list_for_user(
        exec: impl PgExecutor<'_>,
        user_id: UserId,
        status: Option<ScanStatus>,
        cursor: Option<Timestamp>,
        limit: u32,
    ) -> Result<ScanPage, DbError> {
        let fetch = i64::from(limit) + 1;
        let query = format!(
            "SELECT {COLUMNS} FROM scans \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::timestamptz IS NULL OR created_at < $3) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4"
        );
        let mut rows = sqlx::query_as::<_, ScanRow>(&query)
            .bind(user_id)
            .bind(status.map(|s| s.as_str()))
            .bind(cursor)
            .bind(fetch)
            .fetch_all(exec)
            .await?;

        let next_cursor = if rows.len() > limit as usize {
            rows.truncate(limit as usize);
            rows.last().map(|r| r.created_at)
        } else {
            None
        };

        Ok(ScanPage {
            scans: rows_into_domain(rows)?,
            next_cursor,
        })
    }

    /// Fetch a scan by id for the given user, or `None` when absent. Scans
    /// of other users are indistinguishable from absent ones.
    pub async fn find_by_id(
        exec: impl PgExecutor<'_>,
        user_id: UserId,
        id: ScanId,
    ) -> Result<Option<Scan>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM scans \
             WHERE id = $2 AND user_id = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, ScanRow>(&query)
            .bind(user_id)
            .bind(id)
            .fetch_optional(exec)
            .await?;

        row.map(ScanRow::into_domain).transpose()
    }

    /// Most recently completed scan for the URL across all users, or `None`.
    pub async fn last_completed_by_url(
        exec: impl PgExecutor<'_>,
        url: &str,
    ) -> Result<Option<Scan>, DbError> {
        let query = format!(
            "SELECT {COLUMNS} FROM scans \
             WHERE url = $1 AND status = 'COMPLETED' AND deleted_at IS NULL \
             ORDER BY updated_at DESC NULLS LAST, created_at DESC \
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, ScanRow>(&query)
            .bind(url)
            .fetch_optional(exec)
            .await?;

        row.map(ScanRow::into_domain).transpose()
    }
}
