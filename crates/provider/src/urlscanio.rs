//! [`ScanProvider`] implementation backed by the urlscan.io REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lookout_core::{Error, Kind, PageInfo, ScanResult, Stats, Verdict};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{RateLimitStatus, ScanProvider, SubmitError, Submission};

const DEFAULT_BASE_URL: &str = "https://urlscan.io";

/// HTTP request timeout for a single provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEADER_LIMIT: &str = "X-Rate-Limit-Limit";
const HEADER_REMAINING: &str = "X-Rate-Limit-Remaining";
const HEADER_RESET: &str = "X-Rate-Limit-Reset";

/// Provider settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key sent as the `Api-Key` header.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
}

impl ProviderConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Required | Default               |
    /// |----------------------------|----------|-----------------------|
    /// | `LOOKOUT_PROVIDER_API_KEY` | **yes**  | --                    |
    /// | `LOOKOUT_PROVIDER_BASE_URL`| no       | `https://urlscan.io`  |
    ///
    /// # Panics
    ///
    /// Panics if `LOOKOUT_PROVIDER_API_KEY` is not set.
    pub fn from_env() -> Self {
        let api_key = std::env::var("LOOKOUT_PROVIDER_API_KEY")
            .expect("LOOKOUT_PROVIDER_API_KEY must be set");
        let base_url = std::env::var("LOOKOUT_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        Self { api_key, base_url }
    }
}

/// urlscan.io API client. Cheap to clone; safe for concurrent use.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Client {
    /// Build a client from the given configuration.
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest HTTP client");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        }
    }
}

/// Extract rate-limit information from response headers.
///
/// Returns `None` when the `Reset` header is missing or unparseable; the
/// numeric headers default to 0 when absent.
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitStatus> {
    let reset = headers.get(HEADER_RESET)?.to_str().ok()?;
    let reset_at = DateTime::parse_from_rfc3339(reset)
        .ok()?
        .with_timezone(&Utc);

    Some(RateLimitStatus {
        limit: header_u32(headers, HEADER_LIMIT),
        remaining: header_u32(headers, HEADER_REMAINING),
        reset_at,
    })
}

fn header_u32(headers: &HeaderMap, name: &str) -> u32 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    visibility: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    uuid: String,
}

// Subset of the urlscan.io result document this service cares about. The
// page object matches `PageInfo`'s wire names directly; verdicts are nested
// one level deeper upstream.
#[derive(Debug, Default, Deserialize)]
struct ResultResponse {
    #[serde(default)]
    page: Option<PageInfo>,
    #[serde(default)]
    verdicts: Option<ResultVerdicts>,
    #[serde(default)]
    stats: Option<Stats>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultVerdicts {
    #[serde(default)]
    overall: Option<Verdict>,
}

impl ResultResponse {
    fn into_domain(self) -> ScanResult {
        ScanResult {
            page: self.page,
            verdict: self.verdicts.and_then(|v| v.overall),
            stats: self.stats,
        }
    }
}

#[async_trait]
impl ScanProvider for Client {
    async fn submit(&self, url: &str) -> Result<Submission, SubmitError> {
        // https://docs.urlscan.io/apis/urlscan-openapi/scanning/submitscan
        let response = self
            .http
            .post(format!("{}/api/v1/scan", self.base_url))
            .header("Api-Key", &self.api_key)
            .json(&SubmitRequest {
                url,
                visibility: "public",
            })
            .send()
            .await
            .map_err(|e| SubmitError {
                rate_limit: None,
                source: Error::internal(e, "could not send scan request"),
            })?;

        let rate_limit = parse_rate_limit(response.headers());
        let status = response.status();
        let body = response.text().await.map_err(|e| SubmitError {
            rate_limit,
            source: Error::internal(e, "could not read response body"),
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SubmitError {
                rate_limit,
                source: Error::new(
                    Kind::RateLimited,
                    format!("rate limited: {}", body.trim()),
                ),
            });
        }
        if !status.is_success() {
            return Err(SubmitError {
                rate_limit,
                source: Error::new(
                    Kind::Internal,
                    format!("submit failed: {}", body.trim()),
                ),
            });
        }

        let parsed: SubmitResponse =
            serde_json::from_str(&body).map_err(|e| SubmitError {
                rate_limit,
                source: Error::internal(e, "could not decode submit response"),
            })?;

        Ok(Submission {
            provider_scan_id: parsed.uuid,
            rate_limit,
        })
    }

    async fn result(&self, provider_scan_id: &str) -> Result<ScanResult, Error> {
        // https://docs.urlscan.io/apis/urlscan-openapi/scanning/resultapi
        let response = self
            .http
            .get(format!(
                "{}/api/v1/result/{provider_scan_id}",
                self.base_url
            ))
            .header("Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::internal(e, "could not send result request"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::internal(e, "could not read response body"))?;

        if status == StatusCode::NOT_FOUND {
            return Err(Error::new(Kind::NotFound, "result not found"));
        }
        if !status.is_success() {
            return Err(Error::new(
                Kind::Internal,
                format!("get result failed: {}", body.trim()),
            ));
        }

        let parsed: ResultResponse = serde_json::from_str(&body)
            .map_err(|e| Error::internal(e, "could not decode result response"))?;

        Ok(parsed.into_domain())
    }
}
