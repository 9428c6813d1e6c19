use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;

use gitbot_core::collab::NotificationSink;

use crate::config::SinkConfig;

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        tracing::info!(channel, text, "Notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Posts notifications to per-channel Discord-compatible webhooks.
///
/// One attempt per message; a failed post is reported to the caller and the
/// next tick does not retry it. Channels with no webhook go to [`LogSink`].
pub struct WebhookSink {
    client: reqwest::Client,
    webhooks: HashMap<String, String>,
    fallback: LogSink,
}

impl WebhookSink {
    pub fn new(config: &SinkConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            webhooks: config.webhooks.clone(),
            fallback: LogSink,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, channel: &str, text: &str) -> anyhow::Result<()> {
        let Some(url) = self.webhooks.get(channel) else {
            return self.fallback.deliver(channel, text).await;
        };

        let response = self
            .client
            .post(url)
            .json(&WebhookPayload { content: text })
            .send()
            .await
            .map_err(|e| anyhow!("webhook request failed: {e}"))?;
        response
            .error_for_status()
            .map_err(|e| anyhow!("webhook HTTP error: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Json;
    use axum::extract::State;
    use axum::http::StatusCode;
    use serde_json::Value;

    use super::*;

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn receiver(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = axum::Router::new()
            .route(
                "/hook",
                axum::routing::post(
                    move |State(received): State<Received>, Json(body): Json<Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(Arc::clone(&received));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    fn sink_for(channel: &str, url: &str) -> WebhookSink {
        WebhookSink::new(&SinkConfig {
            webhooks: HashMap::from([(channel.to_string(), url.to_string())]),
            timeout_secs: 2,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_content_to_channel_webhook() {
        let (url, received) = receiver(StatusCode::NO_CONTENT).await;
        let sink = sink_for("dev", &url);

        sink.deliver("dev", "Merged pull request:\nhttps://x/1")
            .await
            .unwrap();

        let bodies = received.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["content"], "Merged pull request:\nhttps://x/1");
    }

    #[tokio::test]
    async fn unmapped_channel_falls_back_to_log() {
        let (url, received) = receiver(StatusCode::NO_CONTENT).await;
        let sink = sink_for("dev", &url);

        sink.deliver("ops", "hello").await.unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_is_reported_once() {
        let (url, received) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let sink = sink_for("dev", &url);

        assert!(sink.deliver("dev", "hello").await.is_err());
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        let sink = sink_for("dev", "http://127.0.0.1:9/hook");
        assert!(sink.deliver("dev", "hello").await.is_err());
    }

    #[tokio::test]
    async fn log_sink_always_succeeds() {
        assert!(LogSink.deliver("dev", "hello").await.is_ok());
    }
}
