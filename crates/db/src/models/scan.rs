//! Row and DTO types for the `scans` table.

use lookout_core::{Scan, ScanResult, ScanStatus, Timestamp, UserId};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

/// A row from the `scans` table.
#[derive(Debug, Clone, FromRow)]
pub struct ScanRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub status: String,
    pub result: Option<serde_json::Value>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
}

impl ScanRow {
    /// Convert the raw row into the domain representation.
    pub fn into_domain(self) -> Result<Scan, DbError> {
        let status = ScanStatus::parse(&self.status)
            .ok_or_else(|| DbError::Decode(format!("unknown scan status {:?}", self.status)))?;

        let result = match self.result {
            Some(value) => Some(
                serde_json::from_value(value)
                    .map_err(|e| DbError::Decode(format!("scan result: {e}")))?,
            ),
            None => None,
        };

        Ok(Scan {
            id: self.id,
            user_id: self.user_id,
            url: self.url,
            status,
            result,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// Convert a batch of rows, failing on the first corrupt one.
pub fn rows_into_domain(rows: Vec<ScanRow>) -> Result<Vec<Scan>, DbError> {
    rows.into_iter().map(ScanRow::into_domain).collect()
}

/// Input for inserting a new scan.
#[derive(Debug, Clone)]
pub struct NewScan {
    pub user_id: UserId,
    /// Canonical URL; callers normalize before storing.
    pub url: String,
    pub status: ScanStatus,
}

/// Field set applied to existing scans during an update.
#[derive(Debug, Clone)]
pub struct ScanUpdates {
    /// New status.
    pub status: ScanStatus,
    /// When provided, replaces the stored result payload.
    pub result: Option<ScanResult>,
    /// When provided, sets the last error text. An empty string clears the
    /// column to NULL.
    pub last_error: Option<String>,
    /// When > 0 and the new status is `Failed`, rows only flip to `Failed`
    /// once their post-increment attempt count exceeds this budget.
    pub max_attempts: i32,
}

/// A page of scans plus the cursor for the next page, if any.
#[derive(Debug)]
pub struct ScanPage {
    pub scans: Vec<Scan>,
    /// Exclusive `created_at` upper bound for the next page. `None` when the
    /// result set is exhausted.
    pub next_cursor: Option<Timestamp>,
}
