pub mod collab;
pub mod event;
pub mod fetch;
pub mod resource;
pub mod translate;
pub mod watermark;

pub use collab::{NotificationSink, ResourceRegistry};
pub use event::{EventRecord, Field, RawEvent};
pub use fetch::{FetchError, FetchResult, RateBudget};
pub use resource::TrackedResource;
pub use translate::translate;
pub use watermark::{Reconciled, Watermark, WatermarkKind, reconcile};

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::collab::{NotificationSink, ResourceRegistry};
    use crate::event::RawEvent;
    use crate::resource::TrackedResource;

    /// Build a feed entry with the given id, type, and payload.
    pub fn make_raw_event(id: u64, event_type: &str, payload: serde_json::Value) -> RawEvent {
        RawEvent::try_from(json!({
            "id": id.to_string(),
            "type": event_type,
            "actor": {"login": "alice", "display_login": "alice"},
            "repo": {"name": "test/repo"},
            "payload": payload,
            "created_at": "2026-01-01T00:00:00Z",
        }))
        .expect("test event is an object")
    }

    /// A push entry carrying one commit whose message is `message`.
    pub fn make_push_event(id: u64, message: &str) -> RawEvent {
        make_raw_event(
            id,
            "PushEvent",
            json!({"ref": "refs/heads/main", "commits": [{"message": message}]}),
        )
    }

    /// A resource subscribed by `channels`.
    pub fn make_resource(owner: &str, name: &str, channels: &[&str]) -> TrackedResource {
        let mut r = TrackedResource::new(owner, name);
        r.channels = channels.iter().map(|c| c.to_string()).collect();
        r
    }

    /// Sink that records every delivery in order.
    #[derive(Default)]
    pub struct RecordingSink {
        pub delivered: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        pub fn messages(&self) -> Vec<(String, String)> {
            self.delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, channel: &str, text: &str) -> anyhow::Result<()> {
            self.delivered
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// In-memory registry that keeps the last persisted snapshot.
    #[derive(Default)]
    pub struct MemoryRegistry {
        pub resources: Mutex<Vec<TrackedResource>>,
        pub missing: Mutex<Vec<String>>,
        pub persist_calls: Mutex<usize>,
    }

    impl MemoryRegistry {
        pub fn with(resources: Vec<TrackedResource>) -> Self {
            Self {
                resources: Mutex::new(resources),
                ..Self::default()
            }
        }

        pub fn snapshot(&self) -> Vec<TrackedResource> {
            self.resources
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    #[async_trait]
    impl ResourceRegistry for MemoryRegistry {
        async fn list_resources(&self) -> Vec<TrackedResource> {
            self.snapshot()
        }

        async fn persist(&self, resources: &[TrackedResource]) -> anyhow::Result<()> {
            *self
                .persist_calls
                .lock()
                .unwrap_or_else(|e| e.into_inner()) += 1;
            let mut stored = self.resources.lock().unwrap_or_else(|e| e.into_inner());
            for updated in resources {
                if let Some(r) = stored
                    .iter_mut()
                    .find(|r| r.same_feed(&updated.owner, &updated.name))
                {
                    r.change_token = updated.change_token.clone();
                    r.watermark = updated.watermark;
                }
            }
            Ok(())
        }

        async fn report_missing(&self, resource: &TrackedResource) {
            self.missing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(resource.full_name());
        }
    }
}
