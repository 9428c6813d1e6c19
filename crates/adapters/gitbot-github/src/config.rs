use std::time::Duration;

/// Configuration for the GitHub event feed poller.
#[derive(Debug, Clone)]
pub struct GitHubPollerConfig {
    /// Personal access token. Unauthenticated requests get a much smaller
    /// rate budget.
    pub token: Option<String>,
    /// API root, without a trailing slash.
    pub api_base: String,
    /// Polling interval in seconds.
    pub poll_interval_secs: u64,
    /// Per-request timeout in seconds. Must stay below the poll interval.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for GitHubPollerConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: "https://api.github.com".to_string(),
            poll_interval_secs: 60,
            timeout_secs: 10,
            user_agent: "gitbot/0.1".to_string(),
        }
    }
}

impl GitHubPollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
