//! Abstraction over the external URL-scanning provider.
//!
//! [`ScanProvider`] is the seam the scanner service and tests program
//! against; [`urlscanio::Client`] is the production implementation.

pub mod urlscanio;

use std::fmt;

use async_trait::async_trait;
use lookout_core::{Error, ScanResult, Timestamp};

/// Upstream rate-limit budget parsed from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Total requests allowed in the current window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the window resets and the budget refills to `limit`.
    pub reset_at: Timestamp,
}

/// Outcome of a successful URL submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Provider-side identifier used to poll for the result.
    pub provider_scan_id: String,
    /// Rate-limit headers observed on the submit response, when present.
    pub rate_limit: Option<RateLimitStatus>,
}

/// A failed submission, still carrying whatever rate-limit headers the
/// provider returned. Workers need those even on errors to schedule
/// around the remaining budget.
#[derive(Debug)]
pub struct SubmitError {
    pub rate_limit: Option<RateLimitStatus>,
    pub source: Error,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Client abstraction for URL scanning providers. Implementations must be
/// safe for concurrent use.
#[async_trait]
pub trait ScanProvider: Send + Sync {
    /// Submit the URL for scanning and return the provider job id plus the
    /// current rate-limit status.
    async fn submit(&self, url: &str) -> Result<Submission, SubmitError>;

    /// Fetch the result of a previously submitted scan. Returns a
    /// [`lookout_core::Kind::NotFound`] error while the result is not yet
    /// available.
    async fn result(&self, provider_scan_id: &str) -> Result<ScanResult, Error>;
}
