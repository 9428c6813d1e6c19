//! Seams to the collaborators that sit around the polling pipeline.

use async_trait::async_trait;

use crate::resource::TrackedResource;

/// Owner of the tracked resources and their persisted dedup state.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Snapshot of every tracked resource.
    async fn list_resources(&self) -> Vec<TrackedResource>;

    /// Write back the dedup state of resources processed in one tick.
    async fn persist(&self, resources: &[TrackedResource]) -> anyhow::Result<()>;

    /// The feed for `resource` answered 404. The registry decides whether to
    /// drop it; the poller never removes resources itself.
    async fn report_missing(&self, resource: &TrackedResource);
}

/// Destination for rendered messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, channel: &str, text: &str) -> anyhow::Result<()>;
}
