//! Authenticated paged fetch against the Source's HTTP API (spec §4.2, §6.3).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::kernel::errors::CoreError;
use crate::kernel::rate_limiter::RateLimitClassify;

const TOKEN_URL: &str = "https://auth.example-upstream.test/oauth/token";
const BASE_URL: &str = "https://api.example-upstream.test/v2";
const HARD_RETRY_CEILING: u32 = 10;
const DEFAULT_WAIT_SECS: u64 = 60;
const RETRY_AFTER_BUFFER_SECS: u64 = 5;

/// A page of records from a paged-fetch operation.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<serde_json::Value>,
    pub has_more: bool,
}

#[derive(Debug)]
struct Token {
    bearer: String,
    expires_at: SystemTime,
}

/// Holds an API key + subscription key + client id + active year
/// ("season"). Renews its bearer token automatically when within five
/// minutes of expiry. The token is shared and guarded by a lock; it is not
/// year-scoped, so `clone_with_year` reuses it.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    api_key: String,
    subscription_key: String,
    client_id: String,
    year: i32,
    token: Arc<Mutex<Option<Token>>>,
    token_url: String,
    base_url: String,
}

/// Upstream fetch errors, classified for the rate limiter.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("http error: {0}")]
    Http(String),
    #[error("auth error: {0}")]
    Auth(String),
}

impl RateLimitClassify for UpstreamError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<UpstreamError> for CoreError {
    fn from(e: UpstreamError) -> Self {
        CoreError::UpstreamFetch(e.to_string())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Accepts both response-envelope casing conventions used by the Source
/// (`TotalCount/Next/Results` and `totalCount/next/result`), and falls back
/// to treating the body as a bare array (spec §6.3).
#[derive(Deserialize)]
struct EnvelopePascal {
    #[serde(rename = "Next")]
    next: Option<String>,
    #[serde(rename = "Results")]
    results: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct EnvelopeCamel {
    next: Option<String>,
    result: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RateLimitMessageBody {
    message: String,
}

impl UpstreamClient {
    pub fn new(api_key: String, subscription_key: String, client_id: String, year: i32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            subscription_key,
            client_id,
            year,
            token: Arc::new(Mutex::new(None)),
            token_url: TOKEN_URL.to_string(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Overrides the token and data endpoints, for integration tests
    /// running against a local mock server instead of the real Source.
    pub fn with_urls(mut self, token_url: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.base_url = base_url.into();
        self
    }

    /// Returns a shallow clone with `year` overridden, for historical
    /// syncs. The token is reused — it is not year-scoped (spec §4.2).
    pub fn clone_with_year(&self, year: i32) -> Self {
        Self {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            subscription_key: self.subscription_key.clone(),
            client_id: self.client_id.clone(),
            year,
            token: self.token.clone(),
            token_url: self.token_url.clone(),
            base_url: self.base_url.clone(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    async fn bearer_token(&self) -> Result<String, UpstreamError> {
        let mut guard = self.token.lock().await;

        let near_expiry = guard
            .as_ref()
            .map(|t| {
                t.expires_at
                    .duration_since(SystemTime::now())
                    .map(|remaining| remaining < Duration::from_secs(300))
                    .unwrap_or(true)
            })
            .unwrap_or(true);

        if near_expiry {
            let resp = self
                .http
                .post(&self.token_url)
                .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
                .form(&[("client_id", self.client_id.as_str()), ("api_key", self.api_key.as_str())])
                .send()
                .await
                .map_err(|e| UpstreamError::Auth(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(UpstreamError::Auth(format!(
                    "token exchange failed: {}",
                    resp.status()
                )));
            }

            let body: TokenResponse = resp
                .json()
                .await
                .map_err(|e| UpstreamError::Auth(e.to_string()))?;

            let ttl = body.expires_in.unwrap_or(3600);
            *guard = Some(Token {
                bearer: body.access_token,
                expires_at: UNIX_EPOCH + Duration::from_secs(now_secs() + ttl),
            });
        }

        Ok(guard.as_ref().expect("token just populated").bearer.clone())
    }

    /// Call a paged upstream endpoint once with the given page number and
    /// size. `hard_retry_ceiling`-bounded 429 handling happens one layer up
    /// in `fetch_page`; this is the single-attempt transport call.
    async fn request_once(
        &self,
        path: &str,
        page_number: u32,
        page_size: u32,
        extra_params: &[(&str, String)],
    ) -> Result<Page, UpstreamError> {
        let token = self.bearer_token().await?;

        let mut query: Vec<(&str, String)> = vec![
            ("clientid", self.client_id.clone()),
            ("seasonid", self.year.to_string()),
            ("pagenumber", page_number.to_string()),
            ("pagesize", page_size.to_string()),
        ];
        query.extend(extra_params.iter().cloned());

        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::RateLimited {
                retry_after: parse_retry_after(&body),
            });
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::Http(format!("{status}: {body}")));
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        Ok(parse_envelope(raw))
    }

    /// Fetch one page, retrying on 429 per the parsed retry-after (or a
    /// default 60s wait when unparseable), up to a hard ceiling of 10
    /// retries (spec §4.2).
    pub async fn fetch_page(
        &self,
        path: &str,
        page_number: u32,
        page_size: u32,
        extra_params: &[(&str, String)],
    ) -> Result<Page, UpstreamError> {
        let mut attempts = 0;
        loop {
            match self
                .request_once(path, page_number, page_size, extra_params)
                .await
            {
                Ok(page) => return Ok(page),
                Err(UpstreamError::RateLimited { retry_after }) if attempts < HARD_RETRY_CEILING => {
                    attempts += 1;
                    let wait = retry_after.unwrap_or(Duration::from_secs(DEFAULT_WAIT_SECS));
                    tracing::warn!(attempts, wait_secs = wait.as_secs(), "upstream 429, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pages through `path` from page 1 until `has_more` is false,
    /// returning every record.
    pub async fn fetch_all(
        &self,
        path: &str,
        page_size: u32,
        extra_params: &[(&str, String)],
    ) -> Result<Vec<serde_json::Value>, UpstreamError> {
        let mut out = Vec::new();
        let mut page_number = 1;
        loop {
            let page = self
                .fetch_page(path, page_number, page_size, extra_params)
                .await?;
            let is_last = !page.has_more;
            out.extend(page.records);
            if is_last {
                break;
            }
            page_number += 1;
        }
        Ok(out)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Accepts `TotalCount/Next/Results`, `totalCount/next/result`, or a bare
/// array (spec §6.3).
fn parse_envelope(raw: serde_json::Value) -> Page {
    if let Ok(env) = serde_json::from_value::<EnvelopePascal>(raw.clone()) {
        let has_more = env.next.as_deref().is_some_and(|n| !n.is_empty());
        return Page {
            records: env.results,
            has_more,
        };
    }
    if let Ok(env) = serde_json::from_value::<EnvelopeCamel>(raw.clone()) {
        let has_more = env.next.as_deref().is_some_and(|n| !n.is_empty());
        return Page {
            records: env.result,
            has_more,
        };
    }
    if let serde_json::Value::Array(records) = raw {
        return Page {
            records,
            has_more: false,
        };
    }
    Page {
        records: Vec::new(),
        has_more: false,
    }
}

/// Parses a retry-after value from either a plaintext phrase ("Try again
/// in N seconds") or a JSON envelope `{"message": "..."}` wrapping the same
/// phrase, adding the parser's 5-second buffer (spec §4.2, §6.3).
fn parse_retry_after(body: &str) -> Option<Duration> {
    let text = serde_json::from_str::<RateLimitMessageBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string());

    let digits: String = text
        .split_whitespace()
        .skip_while(|w| !w.chars().all(|c| c.is_ascii_digit()) || w.is_empty())
        .next()?
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    let seconds: u64 = digits.parse().ok()?;
    Some(Duration::from_secs(seconds + RETRY_AFTER_BUFFER_SECS))
}
