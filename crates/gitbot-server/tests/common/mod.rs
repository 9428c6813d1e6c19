use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use gitbot_core::ResourceRegistry;
use gitbot_core::test_helpers::RecordingSink;
use gitbot_github::Poller;
use gitbot_github::test_helpers::FakeGitHub;
use gitbot_server::build_app;
use gitbot_server::config::{AuthFileConfig, BotConfig};
use gitbot_server::state::AppState;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub github: FakeGitHub,
    _state_dir: tempfile::TempDir,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with no auth, pointed at a fresh fake GitHub.
    pub async fn new() -> Self {
        Self::from_config(BotConfig::default()).await
    }

    /// Start a test server requiring `token` on the API routes.
    pub async fn with_auth(token: &str) -> Self {
        let config = BotConfig {
            auth: AuthFileConfig {
                bearer_token: Some(token.to_string()),
            },
            ..BotConfig::default()
        };
        Self::from_config(config).await
    }

    async fn from_config(mut config: BotConfig) -> Self {
        let github = FakeGitHub::start().await;
        let state_dir = tempfile::tempdir().unwrap();
        config.listen_addr = "127.0.0.1:0".to_string();
        config.state_file = state_dir.path().join("state.toml").display().to_string();
        config.github.api_base = github.api_base();
        config.github.timeout_secs = 1;
        config.github.poll_interval_secs = 1;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config).await.unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            github,
            _state_dir: state_dir,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Send a chat command for `channel` and return the reply text.
    pub async fn command(&self, channel: &str, text: &str) -> String {
        let resp = reqwest::Client::new()
            .post(format!("{}/api/v1/commands", self.base_url()))
            .json(&json!({"channel": channel, "text": text}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["reply"].as_str().unwrap().to_string()
    }

    /// A poller over this server's registry that records deliveries.
    pub fn recording_poller(&self) -> (Poller, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let poller = Poller::new(
            self.state.config.poller_config(),
            Arc::clone(&self.state.fetcher),
            Arc::clone(&self.state.registry) as Arc<dyn ResourceRegistry>,
            Arc::clone(&sink) as Arc<dyn gitbot_core::NotificationSink>,
        );
        (poller, sink)
    }
}

/// A push entry as GitHub delivers it.
pub fn push_event(id: u64, message: &str) -> Value {
    json!({
        "id": id.to_string(),
        "type": "PushEvent",
        "actor": {"login": "alice", "display_login": "alice"},
        "repo": {"name": "octo/cat"},
        "payload": {"ref": "refs/heads/main", "commits": [{"message": message}]},
        "created_at": "2026-01-01T00:00:00Z",
    })
}

/// An issue comment entry.
pub fn comment_event(id: u64, body: &str) -> Value {
    json!({
        "id": id.to_string(),
        "type": "IssueCommentEvent",
        "actor": {"login": "bob", "display_login": "bob"},
        "repo": {"name": "octo/cat"},
        "payload": {
            "action": "created",
            "issue": {"number": 7, "title": "Crash on start"},
            "comment": {"body": body},
        },
        "created_at": "2026-01-01T00:00:05Z",
    })
}
