//! In-process stand-in for the GitHub REST API, for tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::config::GitHubPollerConfig;

/// Scripted answer for one repository's events endpoint.
#[derive(Debug, Clone, Default)]
pub struct FakeFeed {
    pub etag: String,
    /// Newest first, as GitHub delivers them.
    pub events: Vec<Value>,
    /// Answer with this status instead of the feed.
    pub status: Option<u16>,
    /// Overrides the `X-RateLimit-Remaining` header on feed responses.
    pub rate_remaining: Option<u32>,
    /// Sleep before answering.
    pub delay_ms: u64,
}

#[derive(Debug)]
struct FakeState {
    rate_remaining: u32,
    rate_reset: i64,
    feeds: HashMap<String, FakeFeed>,
    rate_calls: usize,
    feed_calls: usize,
    if_none_match: Vec<Option<String>>,
    authorization: Vec<Option<String>>,
}

type Shared = Arc<Mutex<FakeState>>;

#[derive(Clone)]
pub struct FakeGitHub {
    pub addr: SocketAddr,
    state: Shared,
}

impl FakeGitHub {
    /// Bind on an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState {
            rate_remaining: 5000,
            rate_reset: chrono::Utc::now().timestamp() + 3600,
            feeds: HashMap::new(),
            rate_calls: 0,
            feed_calls: 0,
            if_none_match: Vec::new(),
            authorization: Vec::new(),
        }));

        let app = Router::new()
            .route("/rate_limit", axum::routing::get(rate_limit))
            .route("/repos/{owner}/{name}/events", axum::routing::get(events))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake GitHub");
        let addr = listener.local_addr().expect("fake GitHub address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Poller config pointed at this fake with a short timeout.
    pub fn config(&self) -> GitHubPollerConfig {
        GitHubPollerConfig {
            api_base: self.api_base(),
            timeout_secs: 1,
            poll_interval_secs: 5,
            ..GitHubPollerConfig::default()
        }
    }

    pub fn set_feed(&self, full_name: &str, etag: &str, events: Vec<Value>) {
        self.set_fake_feed(
            full_name,
            FakeFeed {
                etag: etag.to_string(),
                events,
                ..FakeFeed::default()
            },
        );
    }

    pub fn set_fake_feed(&self, full_name: &str, feed: FakeFeed) {
        self.lock().feeds.insert(full_name.to_string(), feed);
    }

    pub fn remove_feed(&self, full_name: &str) {
        self.lock().feeds.remove(full_name);
    }

    pub fn set_rate_remaining(&self, remaining: u32) {
        self.lock().rate_remaining = remaining;
    }

    pub fn rate_calls(&self) -> usize {
        self.lock().rate_calls
    }

    pub fn feed_calls(&self) -> usize {
        self.lock().feed_calls
    }

    pub fn last_if_none_match(&self) -> Option<String> {
        self.lock().if_none_match.last().cloned().flatten()
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.lock().authorization.last().cloned().flatten()
    }
}

fn rate_headers(remaining: u32, reset: i64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset));
    headers
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

async fn rate_limit(State(state): State<Shared>) -> Response {
    let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
    s.rate_calls += 1;
    let body = json!({"resources": {"core": {"remaining": s.rate_remaining}}});
    (
        StatusCode::OK,
        rate_headers(s.rate_remaining, s.rate_reset),
        Json(body),
    )
        .into_response()
}

async fn events(
    State(state): State<Shared>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let (feed, remaining, reset) = {
        let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
        s.feed_calls += 1;
        s.if_none_match
            .push(header_string(&headers, header::IF_NONE_MATCH));
        s.authorization
            .push(header_string(&headers, header::AUTHORIZATION));
        (
            s.feeds.get(&format!("{owner}/{name}")).cloned(),
            s.rate_remaining,
            s.rate_reset,
        )
    };

    let Some(feed) = feed else {
        return (
            StatusCode::NOT_FOUND,
            rate_headers(remaining, reset),
            Json(json!({"message": "Not Found"})),
        )
            .into_response();
    };

    if feed.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(feed.delay_ms)).await;
    }

    let mut out = rate_headers(feed.rate_remaining.unwrap_or(remaining), reset);
    if let Some(code) = feed.status {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, out, Json(json!({"message": "scripted failure"}))).into_response();
    }
    if header_string(&headers, header::IF_NONE_MATCH).as_deref() == Some(feed.etag.as_str()) {
        return (StatusCode::NOT_MODIFIED, out).into_response();
    }
    if let Ok(etag) = HeaderValue::from_str(&feed.etag) {
        out.insert(header::ETAG, etag);
    }
    (StatusCode::OK, out, Json(Value::Array(feed.events))).into_response()
}
