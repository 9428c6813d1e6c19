use std::sync::Arc;

use serde::Serialize;

use gitbot_core::collab::{NotificationSink, ResourceRegistry};
use gitbot_core::fetch::{FetchError, FetchResult};
use gitbot_core::resource::TrackedResource;
use gitbot_core::translate::translate;
use gitbot_core::watermark::reconcile;

use crate::config::GitHubPollerConfig;
use crate::fetcher::ChangeTokenFetcher;

/// Polls every tracked feed once per interval and relays new events.
pub struct Poller {
    config: GitHubPollerConfig,
    fetcher: Arc<ChangeTokenFetcher>,
    registry: Arc<dyn ResourceRegistry>,
    sink: Arc<dyn NotificationSink>,
}

/// Counters for one tick, exposed on the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub resources: usize,
    pub fresh: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub new_events: usize,
    pub delivered: usize,
    pub finished_at: Option<String>,
}

/// Result of polling one resource.
struct Polled {
    resource: TrackedResource,
    messages: Vec<String>,
    outcome: Outcome,
}

enum Outcome {
    Fresh,
    Unchanged,
    Failed(FetchError),
}

impl Poller {
    pub fn new(
        config: GitHubPollerConfig,
        fetcher: Arc<ChangeTokenFetcher>,
        registry: Arc<dyn ResourceRegistry>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            fetcher,
            registry,
            sink,
        }
    }

    /// Run the poll loop forever, handing each tick's report to `on_tick`.
    pub async fn run(self, mut on_tick: impl FnMut(TickReport) + Send) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tick = 0u64;
        loop {
            interval.tick().await;
            tick += 1;
            let mut report = self.tick().await;
            report.tick = tick;
            tracing::debug!(?report, "Poll tick finished");
            on_tick(report);
        }
    }

    /// Fetch, reconcile, persist, then deliver, for every tracked resource.
    ///
    /// Resources are polled concurrently; each resource's state is only
    /// touched by its own future. Dedup state is persisted once, after all
    /// resources finished.
    pub async fn tick(&self) -> TickReport {
        let resources = self.registry.list_resources().await;
        let token = self.config.token.as_deref();

        let polled =
            futures::future::join_all(resources.iter().map(|r| self.poll_resource(r, token)))
                .await;

        let mut report = TickReport {
            resources: resources.len(),
            ..TickReport::default()
        };
        let mut updated = Vec::with_capacity(polled.len());
        for p in &polled {
            match &p.outcome {
                Outcome::Fresh => report.fresh += 1,
                Outcome::Unchanged => report.unchanged += 1,
                Outcome::Failed(FetchError::NotFound) => {
                    report.failed += 1;
                    tracing::warn!(
                        repo = %p.resource.full_name(),
                        "Repository not found upstream"
                    );
                    self.registry.report_missing(&p.resource).await;
                },
                Outcome::Failed(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        repo = %p.resource.full_name(),
                        error = %e,
                        "Failed to poll repo"
                    );
                },
            }
            if matches!(p.outcome, Outcome::Fresh) {
                updated.push(p.resource.clone());
            }
            report.new_events += p.messages.len();
        }

        if !updated.is_empty()
            && let Err(e) = self.registry.persist(&updated).await
        {
            tracing::error!(error = %e, "Failed to persist poll state");
        }

        // Subscriptions may have changed while the feeds were fetched.
        let current = if polled.iter().any(|p| !p.messages.is_empty()) {
            self.registry.list_resources().await
        } else {
            Vec::new()
        };
        for p in polled.iter().filter(|p| !p.messages.is_empty()) {
            let Some(subscribed) = current
                .iter()
                .find(|r| r.same_feed(&p.resource.owner, &p.resource.name))
            else {
                tracing::debug!(
                    repo = %p.resource.full_name(),
                    "Repo unregistered during tick, dropping its notifications"
                );
                continue;
            };
            report.delivered += self.deliver(subscribed, &p.messages).await;
        }

        report.finished_at = Some(chrono::Utc::now().to_rfc3339());
        report
    }

    async fn poll_resource(&self, resource: &TrackedResource, token: Option<&str>) -> Polled {
        let result = self.fetcher.fetch(resource, token).await;
        let outcome = match &result {
            FetchResult::Fresh { .. } => Outcome::Fresh,
            FetchResult::Unchanged => Outcome::Unchanged,
            FetchResult::Error(e) => Outcome::Failed(e.clone()),
        };

        let reconciled = reconcile(resource, &result);
        let messages = reconciled
            .events
            .iter()
            .filter(|event| resource.accepts(event.event_type().present()))
            .map(translate)
            .collect();

        Polled {
            resource: reconciled.resource,
            messages,
            outcome,
        }
    }

    /// Send each message to every channel currently subscribed to
    /// `resource`, in order. Returns the number of successful deliveries.
    async fn deliver(&self, resource: &TrackedResource, messages: &[String]) -> usize {
        let mut delivered = 0;
        for text in messages {
            for channel in &resource.channels {
                match self.sink.deliver(channel, text).await {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::warn!(
                        repo = %resource.full_name(),
                        channel = %channel,
                        error = %e,
                        "Failed to deliver notification"
                    ),
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FakeFeed, FakeGitHub};
    use gitbot_core::test_helpers::{MemoryRegistry, RecordingSink, make_resource};
    use serde_json::{Value, json};

    fn push(id: u64, message: &str) -> Value {
        json!({
            "id": id.to_string(),
            "type": "PushEvent",
            "actor": {"display_login": "alice"},
            "repo": {"name": "test/repo"},
            "payload": {"ref": "refs/heads/main", "commits": [{"message": message}]},
        })
    }

    fn watch(id: u64) -> Value {
        json!({"id": id.to_string(), "type": "WatchEvent", "payload": {"action": "started"}})
    }

    fn poller(
        fake: &FakeGitHub,
        registry: Arc<MemoryRegistry>,
        sink: Arc<RecordingSink>,
    ) -> Poller {
        let config = fake.config();
        let fetcher = Arc::new(ChangeTokenFetcher::new(&config).unwrap());
        Poller::new(config, fetcher, registry, sink)
    }

    #[tokio::test]
    async fn delivers_new_events_oldest_first_to_every_channel() {
        let fake = FakeGitHub::start().await;
        fake.set_feed("test/repo", "\"v1\"", vec![push(12, "second"), push(11, "first")]);
        let mut resource = make_resource("test", "repo", &["dev", "ops"]);
        resource.watermark = Some(gitbot_core::Watermark::Id(10));
        let registry = Arc::new(MemoryRegistry::with(vec![resource]));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(&fake, Arc::clone(&registry), Arc::clone(&sink));

        let report = poller.tick().await;
        assert_eq!(report.resources, 1);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.new_events, 2);
        assert_eq!(report.delivered, 4);

        let delivered = sink.messages();
        assert_eq!(delivered.len(), 4);
        assert_eq!(delivered[0].0, "dev");
        assert!(delivered[0].1.contains("first"));
        assert_eq!(delivered[1].0, "ops");
        assert!(delivered[1].1.contains("first"));
        assert!(delivered[2].1.contains("second"));

        let stored = registry.snapshot();
        assert_eq!(stored[0].change_token.as_deref(), Some("\"v1\""));
        assert_eq!(stored[0].watermark, Some(gitbot_core::Watermark::Id(12)));
    }

    #[tokio::test]
    async fn second_tick_with_same_etag_delivers_nothing() {
        let fake = FakeGitHub::start().await;
        fake.set_feed("test/repo", "\"v1\"", vec![push(2, "only")]);
        let registry = Arc::new(MemoryRegistry::with(vec![make_resource(
            "test",
            "repo",
            &["dev"],
        )]));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(&fake, Arc::clone(&registry), Arc::clone(&sink));

        poller.tick().await;
        let report = poller.tick().await;
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(sink.messages().len(), 1);
        assert_eq!(fake.last_if_none_match().as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn allow_list_filters_event_types() {
        let fake = FakeGitHub::start().await;
        fake.set_feed("test/repo", "\"v1\"", vec![watch(3), push(2, "kept")]);
        let mut resource = make_resource("test", "repo", &["dev"]);
        resource.events = Some(vec!["PushEvent".to_string()]);
        let registry = Arc::new(MemoryRegistry::with(vec![resource]));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(&fake, Arc::clone(&registry), Arc::clone(&sink));

        let report = poller.tick().await;
        assert_eq!(report.new_events, 1);
        let delivered = sink.messages();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1.contains("kept"));
        // Filtered entries still advance the watermark.
        assert_eq!(
            registry.snapshot()[0].watermark,
            Some(gitbot_core::Watermark::Id(3))
        );
    }

    #[tokio::test]
    async fn missing_repo_is_reported_and_left_alone() {
        let fake = FakeGitHub::start().await;
        let mut resource = make_resource("gone", "repo", &["dev"]);
        resource.change_token = Some("\"old\"".to_string());
        let registry = Arc::new(MemoryRegistry::with(vec![resource.clone()]));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(&fake, Arc::clone(&registry), Arc::clone(&sink));

        let report = poller.tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(
            *registry.missing.lock().unwrap(),
            vec!["gone/repo".to_string()]
        );
        assert_eq!(registry.snapshot(), vec![resource]);
        assert_eq!(*registry.persist_calls.lock().unwrap(), 0);
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn failing_repo_does_not_hold_back_others() {
        let fake = FakeGitHub::start().await;
        fake.set_fake_feed(
            "octo/cat",
            FakeFeed {
                etag: "\"v2\"".to_string(),
                events: vec![push(30, "never seen")],
                delay_ms: 2_000,
                ..FakeFeed::default()
            },
        );
        fake.set_feed("octo/dog", "\"d1\"", vec![push(40, "dog work")]);

        let mut cat = make_resource("octo", "cat", &["dev"]);
        cat.change_token = Some("\"v1\"".to_string());
        let dog = make_resource("octo", "dog", &["dev"]);
        let registry = Arc::new(MemoryRegistry::with(vec![cat, dog]));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(&fake, Arc::clone(&registry), Arc::clone(&sink));

        let report = poller.tick().await;
        assert_eq!(report.resources, 2);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);

        let delivered = sink.messages();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1.contains("dog work"));

        let stored = registry.snapshot();
        assert_eq!(stored[0].change_token.as_deref(), Some("\"v1\""));
        assert_eq!(stored[0].watermark, None);
        assert_eq!(stored[1].change_token.as_deref(), Some("\"d1\""));
        assert_eq!(stored[1].watermark, Some(gitbot_core::Watermark::Id(40)));
    }

    #[tokio::test]
    async fn delivery_follows_current_subscriptions() {
        let fake = FakeGitHub::start().await;
        fake.set_feed("test/repo", "\"v1\"", vec![push(2, "late")]);
        fake.set_feed("test/gone", "\"g1\"", vec![push(3, "orphan")]);
        let registry = Arc::new(MemoryRegistry::with(vec![
            make_resource("test", "repo", &["dev", "ops"]),
            make_resource("test", "gone", &["dev"]),
        ]));
        let sink = Arc::new(RecordingSink::default());
        let config = fake.config();
        let poller = Poller::new(
            config.clone(),
            Arc::new(ChangeTokenFetcher::new(&config).unwrap()),
            Arc::new(UnsubscribingRegistry { inner: registry }),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
        );

        let report = poller.tick().await;
        assert_eq!(report.new_events, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(
            sink.messages()
                .iter()
                .map(|(c, _)| c.as_str())
                .collect::<Vec<_>>(),
            vec!["ops"]
        );
    }

    /// Hands out the full snapshot once, then behaves as if `dev` left
    /// `test/repo` and `test/gone` was removed.
    struct UnsubscribingRegistry {
        inner: Arc<MemoryRegistry>,
    }

    #[async_trait::async_trait]
    impl ResourceRegistry for UnsubscribingRegistry {
        async fn list_resources(&self) -> Vec<TrackedResource> {
            let snapshot = self.inner.list_resources().await;
            let mut stored = self.inner.resources.lock().unwrap();
            stored.retain(|r| r.name != "gone");
            for r in stored.iter_mut() {
                r.channels.retain(|c| c != "dev");
            }
            snapshot
        }

        async fn persist(&self, resources: &[TrackedResource]) -> anyhow::Result<()> {
            self.inner.persist(resources).await
        }

        async fn report_missing(&self, resource: &TrackedResource) {
            self.inner.report_missing(resource).await;
        }
    }

    #[tokio::test]
    async fn rate_limited_tick_touches_nothing() {
        let fake = FakeGitHub::start().await;
        fake.set_feed("test/repo", "\"v1\"", vec![push(2, "later")]);
        fake.set_rate_remaining(0);
        let registry = Arc::new(MemoryRegistry::with(vec![make_resource(
            "test",
            "repo",
            &["dev"],
        )]));
        let sink = Arc::new(RecordingSink::default());
        let poller = poller(&fake, Arc::clone(&registry), Arc::clone(&sink));

        let report = poller.tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(fake.feed_calls(), 0);
        assert_eq!(*registry.persist_calls.lock().unwrap(), 0);
        assert!(sink.messages().is_empty());
        assert!(registry.snapshot()[0].change_token.is_none());
    }

    #[test]
    fn tick_report_default() {
        let report = TickReport::default();
        assert_eq!(report.tick, 0);
        assert_eq!(report.delivered, 0);
        assert!(report.finished_at.is_none());
    }

    #[test]
    fn tick_report_serializes() {
        let report = TickReport {
            tick: 3,
            resources: 2,
            fresh: 1,
            unchanged: 1,
            ..TickReport::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tick"], 3);
        assert_eq!(json["fresh"], 1);
    }
}
