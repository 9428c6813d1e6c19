use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ETAG, HeaderMap, IF_NONE_MATCH};
use serde_json::Value;
use tokio::sync::Mutex;

use gitbot_core::event::RawEvent;
use gitbot_core::fetch::{FetchError, FetchResult, RateBudget};
use gitbot_core::resource::TrackedResource;

use crate::config::GitHubPollerConfig;

const GITHUB_JSON: &str = "application/vnd.github+json";

/// Conditional fetcher for `GET /repos/{owner}/{name}/events`.
///
/// Checks the rate budget before every feed request and remembers the
/// budget reported by the last response, so an exhausted window is skipped
/// without touching the network until it resets.
pub struct ChangeTokenFetcher {
    client: reqwest::Client,
    api_base: String,
    budget: Mutex<Option<RateBudget>>,
}

impl ChangeTokenFetcher {
    pub fn new(config: &GitHubPollerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            budget: Mutex::new(None),
        })
    }

    /// Fetch the feed for `resource`. `resource` is only read.
    pub async fn fetch(&self, resource: &TrackedResource, auth_token: Option<&str>) -> FetchResult {
        if let Err(e) = self.check_budget(auth_token).await {
            tracing::debug!(repo = %resource.full_name(), error = %e, "Skipping feed request");
            return FetchResult::Error(e);
        }

        let url = format!(
            "{}/repos/{}/{}/events",
            self.api_base, resource.owner, resource.name
        );
        let mut request = self.client.get(&url).header(ACCEPT, GITHUB_JSON);
        if let Some(ref token) = resource.change_token {
            request = request.header(IF_NONE_MATCH, token);
        }
        if let Some(auth) = auth_token {
            request = request.bearer_auth(auth);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(repo = %resource.full_name(), error = %e, "Feed request failed");
                return FetchResult::Error(FetchError::Upstream {
                    status: e.status().map(|s| s.as_u16()),
                });
            },
        };

        let budget = budget_from_headers(response.headers());
        self.remember(budget).await;

        match response.status() {
            StatusCode::OK => {
                let change_token = header_str(response.headers(), ETAG.as_str()).map(String::from);
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!(
                            repo = %resource.full_name(),
                            error = %e,
                            "Feed body unreadable"
                        );
                        return FetchResult::Error(FetchError::Upstream { status: Some(200) });
                    },
                };
                match parse_entries(&body) {
                    Ok(entries) => FetchResult::Fresh {
                        change_token,
                        entries,
                        rate_remaining: budget.map(|b| b.remaining),
                    },
                    Err(e) => FetchResult::Error(e),
                }
            },
            StatusCode::NOT_MODIFIED => FetchResult::Unchanged,
            StatusCode::NOT_FOUND => FetchResult::Error(FetchError::NotFound),
            status => {
                if budget.is_some_and(|b| b.is_spent()) {
                    FetchResult::Error(FetchError::RateLimited)
                } else {
                    FetchResult::Error(FetchError::Upstream {
                        status: Some(status.as_u16()),
                    })
                }
            },
        }
    }

    /// Fail fast when the budget is spent: first from the cached budget,
    /// then from a `GET /rate_limit` pre-flight.
    async fn check_budget(&self, auth_token: Option<&str>) -> Result<(), FetchError> {
        if let Some(cached) = *self.budget.lock().await
            && cached.is_exhausted_at(Utc::now())
        {
            return Err(FetchError::RateLimited);
        }

        let mut request = self
            .client
            .get(format!("{}/rate_limit", self.api_base))
            .header(ACCEPT, GITHUB_JSON);
        if let Some(auth) = auth_token {
            request = request.bearer_auth(auth);
        }
        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Rate limit pre-flight failed");
            FetchError::Upstream {
                status: e.status().map(|s| s.as_u16()),
            }
        })?;

        let budget = budget_from_headers(response.headers());
        self.remember(budget).await;
        if budget.is_some_and(|b| b.is_spent()) {
            tracing::warn!("Out of rate limit tokens");
            return Err(FetchError::RateLimited);
        }
        Ok(())
    }

    async fn remember(&self, budget: Option<RateBudget>) {
        if budget.is_some() {
            *self.budget.lock().await = budget;
        }
    }

    /// Last budget seen on any response.
    pub async fn last_budget(&self) -> Option<RateBudget> {
        *self.budget.lock().await
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn budget_from_headers(headers: &HeaderMap) -> Option<RateBudget> {
    RateBudget::from_headers(
        header_str(headers, "x-ratelimit-remaining"),
        header_str(headers, "x-ratelimit-reset"),
    )
}

/// Parse a feed body. Entries that are not objects are dropped with a
/// warning; a body that is not an array fails the whole fetch.
fn parse_entries(body: &str) -> Result<Vec<RawEvent>, FetchError> {
    let values: Vec<Value> =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    Ok(values
        .into_iter()
        .filter_map(|value| match RawEvent::try_from(value) {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed feed entry");
                None
            },
        })
        .collect())
}
