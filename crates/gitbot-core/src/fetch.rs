use chrono::{DateTime, Utc};

use crate::event::RawEvent;

/// Outcome of one conditional fetch against a tracked feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// The feed changed. `entries` are newest-first as delivered.
    Fresh {
        change_token: Option<String>,
        entries: Vec<RawEvent>,
        rate_remaining: Option<u32>,
    },
    /// The server confirmed the stored change token is current.
    Unchanged,
    Error(FetchError),
}

impl FetchResult {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request budget is spent; retry next tick.
    #[error("out of rate limit tokens")]
    RateLimited,
    /// The repository no longer exists upstream.
    #[error("repository not found upstream")]
    NotFound,
    /// Transient failure. `status` is `None` when no response arrived
    /// (timeout, connection error).
    #[error("upstream error, status {}", display_status(*status))]
    Upstream { status: Option<u16> },
    /// The feed body was not a JSON array.
    #[error("malformed feed body: {0}")]
    Malformed(String),
}

fn display_status(status: Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Rate budget as reported by the `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateBudget {
    /// Parse the `X-RateLimit-Remaining` / `X-RateLimit-Reset` header values.
    /// Returns `None` when the remaining count is missing or unparsable.
    pub fn from_headers(remaining: Option<&str>, reset: Option<&str>) -> Option<Self> {
        let remaining = remaining?.trim().parse().ok()?;
        let reset_at = reset
            .and_then(|r| r.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        Some(Self {
            remaining,
            reset_at,
        })
    }

    pub fn is_spent(&self) -> bool {
        self.remaining == 0
    }

    /// Spent and the window has not reset yet at `now`. A spent budget with
    /// no known reset time is not trusted; the caller should re-check.
    pub fn is_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        self.is_spent() && self.reset_at.is_some_and(|reset| now < reset)
    }
}
