use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use gitbot_core::watermark::WatermarkKind;
use gitbot_github::GitHubPollerConfig;

/// Top-level bot configuration, loaded from `gitbot.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub listen_addr: String,
    /// TOML file holding the tracked repos and their dedup state.
    pub state_file: String,
    /// Per-request timeout for the HTTP API, in seconds.
    pub request_timeout_secs: u64,
    pub auth: AuthFileConfig,
    pub github: GitHubConfig,
    pub sink: SinkConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            state_file: "gitbot-state.toml".to_string(),
            request_timeout_secs: 30,
            auth: AuthFileConfig::default(),
            github: GitHubConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    /// Bearer token for the `/api/v1` routes. None = auth disabled.
    pub bearer_token: Option<String>,
}

/// GitHub feed polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub api_base: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    /// Watermark kind for newly registered repos.
    pub watermark_kind: WatermarkKind,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        let poller = GitHubPollerConfig::default();
        Self {
            token: None,
            api_base: poller.api_base,
            poll_interval_secs: poller.poll_interval_secs,
            timeout_secs: poller.timeout_secs,
            watermark_kind: WatermarkKind::default(),
        }
    }
}

/// Where rendered notifications go.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Channel id to Discord-compatible webhook URL. Channels without an
    /// entry are written to the log.
    pub webhooks: HashMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            webhooks: HashMap::new(),
            timeout_secs: 10,
        }
    }
}

impl BotConfig {
    /// Problems that make the config unusable. Empty means valid.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.github.poll_interval_secs == 0 {
            problems.push("github.poll_interval_secs must be > 0".to_string());
        }
        if self.github.timeout_secs == 0 {
            problems.push("github.timeout_secs must be > 0".to_string());
        }
        if self.github.timeout_secs >= self.github.poll_interval_secs {
            problems.push(
                "github.timeout_secs must be below github.poll_interval_secs".to_string(),
            );
        }
        if self.request_timeout_secs == 0 {
            problems.push("request_timeout_secs must be > 0".to_string());
        }
        if self.sink.timeout_secs == 0 {
            problems.push("sink.timeout_secs must be > 0".to_string());
        }
        if self.state_file.is_empty() {
            problems.push("state_file must not be empty".to_string());
        }
        problems
    }

    /// Validate configuration, logging warnings for issues and exiting on
    /// fatal ones.
    pub fn validate(&self) {
        let problems = self.problems();
        for problem in &problems {
            tracing::error!("{problem}");
        }
        if !problems.is_empty() {
            std::process::exit(1);
        }

        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file, use GITBOT_API_TOKEN env var in production"
            );
        }
        if self.github.token.is_none() {
            tracing::warn!("No GitHub token configured, the unauthenticated rate budget is small");
        }
    }

    /// Load config from `path` if it exists, then apply env var overrides.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<BotConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Failed to parse config: {e}, using defaults"
                    );
                    BotConfig::default()
                },
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                BotConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `GITBOT_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| var(key).filter(|v| !v.is_empty());

        if let Some(addr) = get("GITBOT_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(file) = get("GITBOT_STATE_FILE") {
            self.state_file = file;
        }
        if let Some(token) = get("GITBOT_API_TOKEN") {
            self.auth.bearer_token = Some(token);
        }
        if let Some(token) = get("GITBOT_GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(val) = get("GITBOT_POLL_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.github.poll_interval_secs = n;
        }
    }

    pub fn poller_config(&self) -> GitHubPollerConfig {
        GitHubPollerConfig {
            token: self.github.token.clone(),
            api_base: self.github.api_base.clone(),
            poll_interval_secs: self.github.poll_interval_secs,
            timeout_secs: self.github.timeout_secs,
            ..GitHubPollerConfig::default()
        }
    }
}
