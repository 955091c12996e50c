//! Scanner service: the business logic between the API, the queue, and the
//! scanning provider.
//!
//! The enqueue path stores a scan and its queue job in one transaction,
//! reusing a recent completed result when the queue rejects the job as a
//! duplicate. The scan path is invoked by the worker: it submits the URL to
//! the provider, polls for the outcome, and fans the result out to every
//! pending scan sharing the same canonical URL.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat};
use lookout_core::normalize::normalize_url;
use lookout_core::{Error, Kind, Scan, ScanId, ScanResult, ScanStatus, UserId};
use lookout_db::models::scan::{NewScan, ScanUpdates};
use lookout_db::repositories::{JobRepo, ScanRepo};
use lookout_db::{DbError, DbPool};
use lookout_provider::{RateLimitStatus, ScanProvider};

/// Overall deadline for polling a submitted scan's result.
const POLL_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay before the first poll attempt.
const POLL_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Starting backoff interval between polls; doubled after each failure.
const POLL_INTERVAL_BASE: Duration = Duration::from_secs(2);
/// Backoff cap.
const POLL_INTERVAL_MAX: Duration = Duration::from_secs(600);

/// Scanner settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Attempt budget for a scan job before it is marked failed.
    pub max_attempts: i32,
    /// Window during which a completed result is reused for new requests
    /// and duplicate jobs are suppressed.
    pub result_cache_ttl: chrono::Duration,
}

impl ScannerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                                 | Default |
    /// |-----------------------------------------|---------|
    /// | `LOOKOUT_SCANNER_MAX_ATTEMPTS`          | `5`     |
    /// | `LOOKOUT_SCANNER_RESULT_CACHE_TTL_SECS` | `3600`  |
    pub fn from_env() -> Self {
        let max_attempts: i32 = std::env::var("LOOKOUT_SCANNER_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("LOOKOUT_SCANNER_MAX_ATTEMPTS must be a valid i32");

        let ttl_secs: i64 = std::env::var("LOOKOUT_SCANNER_RESULT_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "3600".into())
            .parse()
            .expect("LOOKOUT_SCANNER_RESULT_CACHE_TTL_SECS must be a valid i64");

        Self {
            max_attempts,
            result_cache_ttl: chrono::Duration::seconds(ttl_secs),
        }
    }
}

/// A failed scan attempt, carrying the last observed rate-limit status so
/// the worker can schedule around the remaining budget.
#[derive(Debug)]
pub struct ScanFailure {
    pub rate_limit: Option<RateLimitStatus>,
    pub source: Error,
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

impl std::error::Error for ScanFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Coordinates persistence, the job queue, and the scanning provider.
#[derive(Clone)]
pub struct Scanner {
    pool: DbPool,
    provider: Arc<dyn ScanProvider>,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(pool: DbPool, provider: Arc<dyn ScanProvider>, config: ScannerConfig) -> Self {
        Self {
            pool,
            provider,
            config,
        }
    }

    /// Store a new scan request and enqueue its background job atomically.
    ///
    /// When the queue rejects the job as a duplicate, a recent completed
    /// result for the same URL (if any) is copied onto the new scan, which
    /// is returned already `COMPLETED`. Otherwise the scan stays `PENDING`
    /// and the sibling job's fan-in will finish it.
    pub async fn enqueue(&self, user_id: UserId, raw_url: &str) -> Result<Scan, Error> {
        let url =
            normalize_url(raw_url).map_err(|e| Error::wrap(Kind::BadRequest, e, "invalid URL"))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::internal(e, "could not begin transaction"))?;

        let mut scan = ScanRepo::store_scans(
            &mut *tx,
            &[NewScan {
                user_id,
                url: url.clone(),
                status: ScanStatus::Pending,
            }],
        )
        .await
        .map_err(|e| Error::internal(e, "could not store scan"))?
        .pop()
        .ok_or_else(|| Error::new(Kind::Internal, "insert returned no row"))?;

        let added = JobRepo::enqueue(
            &mut tx,
            &url,
            self.config.max_attempts,
            self.config.result_cache_ttl,
        )
        .await
        .map_err(|e| Error::internal(e, "could not add job"))?;

        if !added {
            // Another job already covers this URL. If it has completed
            // recently, reuse its result; otherwise the live job will update
            // all pending scans for the URL when it finishes.
            let prior = ScanRepo::last_completed_by_url(&mut *tx, &url)
                .await
                .map_err(|e| Error::internal(e, "could not get last completed scan"))?;

            if let Some(prior) = prior {
                let updated = ScanRepo::update_by_id(
                    &mut *tx,
                    scan.id,
                    &ScanUpdates {
                        status: ScanStatus::Completed,
                        result: prior.result,
                        last_error: None,
                        max_attempts: 0,
                    },
                )
                .await
                .map_err(|e| Error::internal(e, "could not update scan"))?;

                if let Some(updated) = updated {
                    scan = updated;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::internal(e, "could not commit transaction"))?;

        Ok(scan)
    }

    /// Page through a user's scans. The cursor is an RFC 3339 instant; an
    /// empty cursor starts from the newest scan. Returns the page and the
    /// cursor for the next one, when more rows exist.
    pub async fn user_scans(
        &self,
        user_id: UserId,
        status: Option<ScanStatus>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<Scan>, Option<String>), Error> {
        let cursor_time = match cursor.filter(|c| !c.is_empty()) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.to_utc())
                    .map_err(|e| Error::wrap(Kind::BadRequest, e, "invalid cursor"))?,
            ),
            None => None,
        };

        let page = ScanRepo::list_for_user(&self.pool, user_id, status, cursor_time, limit)
            .await
            .map_err(|e| Error::internal(e, "could not get user scans"))?;

        let next = page
            .next_cursor
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));

        Ok((page.scans, next))
    }

    /// Fetch a single scan by id for the given user.
    pub async fn result(&self, user_id: UserId, scan_id: ScanId) -> Result<Scan, Error> {
        ScanRepo::find_by_id(&self.pool, user_id, scan_id)
            .await
            .map_err(|e| Error::internal(e, "could not get scan result"))?
            .ok_or_else(|| Error::new(Kind::NotFound, "scan not found"))
    }

    /// Soft-delete a scan belonging to the given user.
    ///
    /// Queue jobs are not cancelled here: other pending scans may depend on
    /// the same URL job. The worker re-checks the pending count before
    /// processing.
    pub async fn delete(&self, user_id: UserId, scan_id: ScanId) -> Result<(), Error> {
        let deleted = ScanRepo::soft_delete(&self.pool, user_id, scan_id)
            .await
            .map_err(|e| Error::internal(e, "could not delete scan"))?;

        if deleted.is_none() {
            return Err(Error::new(Kind::NotFound, "scan not found"));
        }

        Ok(())
    }

    /// Process all pending scans for the given canonical URL.
    ///
    /// Invoked by the background worker. Verifies pending scans still exist
    /// (the job is orphaned otherwise and must be cancelled), submits the
    /// URL to the provider, polls for the outcome, and fans it out to every
    /// pending sibling. Returns the last observed rate-limit status in both
    /// the success and the failure case.
    pub async fn scan(&self, url: &str) -> Result<Option<RateLimitStatus>, ScanFailure> {
        // Deletion does not cancel jobs, so the job may have outlived every
        // scan that wanted it.
        let pending = ScanRepo::pending_count_by_url(&self.pool, url)
            .await
            .map_err(|e| ScanFailure {
                rate_limit: None,
                source: Error::internal(e, "could not get pending scan count"),
            })?;
        if pending <= 0 {
            tracing::warn!(url, "no pending scans for URL, skipping");
            return Err(ScanFailure {
                rate_limit: None,
                source: Error::new(Kind::Conflict, "no pending scans for URL"),
            });
        }

        match self.submit_and_poll(url).await {
            Ok((result, rate_limit)) => {
                ScanRepo::update_pending_by_url(
                    &self.pool,
                    url,
                    &ScanUpdates {
                        status: ScanStatus::Completed,
                        result: Some(result),
                        last_error: None,
                        max_attempts: 0,
                    },
                )
                .await
                .map_err(|e: DbError| ScanFailure {
                    rate_limit,
                    source: Error::internal(e, "could not update scan"),
                })?;

                Ok(rate_limit)
            }
            Err(failure) => {
                // A rate-limited attempt is deferred, not failed; the scans
                // stay pending and the worker snoozes the job.
                if !failure.source.is(Kind::RateLimited) {
                    let last_error = failure.source.to_string();
                    if let Err(e) = ScanRepo::update_pending_by_url(
                        &self.pool,
                        url,
                        &ScanUpdates {
                            status: ScanStatus::Failed,
                            result: None,
                            last_error: Some(last_error),
                            max_attempts: self.config.max_attempts,
                        },
                    )
                    .await
                    {
                        tracing::error!(url, error = %e, "error updating scan");
                    }
                }

                Err(failure)
            }
        }
    }

    /// Submit the URL and poll for the final result with exponential
    /// backoff until success or the overall deadline.
    async fn submit_and_poll(
        &self,
        url: &str,
    ) -> Result<(ScanResult, Option<RateLimitStatus>), ScanFailure> {
        tracing::info!(url, "submitting URL to scan provider");
        let submission = self.provider.submit(url).await.map_err(|e| ScanFailure {
            rate_limit: e.rate_limit,
            source: Error::wrap(Kind::Internal, e.source, "could not submit URL"),
        })?;
        let rate_limit = submission.rate_limit;

        tokio::time::sleep(POLL_INITIAL_DELAY).await;
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        let mut delay = POLL_INTERVAL_BASE;

        loop {
            tracing::debug!(url, "reading results from scan provider");
            match self.provider.result(&submission.provider_scan_id).await {
                Ok(result) => return Ok((result, rate_limit)),
                Err(e) => {
                    tracing::debug!(url, error = %e, "results not ready, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    delay = (delay * 2).min(POLL_INTERVAL_MAX);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ScanFailure {
                        rate_limit,
                        source: Error::new(Kind::Timeout, "timeout waiting for results"),
                    });
                }
            }
        }
    }
}
