use crate::error::NotifyError;
use crate::model::IngestionEvent;
use async_std::task::spawn_blocking;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget delivery target for interesting events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: &IngestionEvent) -> Result<(), NotifyError>;
}

// One POST of a JSON body, run off the executor
async fn post_json(agent: &ureq::Agent, url: &str, body: Value) -> Result<(), NotifyError> {
    let agent = agent.clone();
    let url = url.to_string();
    spawn_blocking(move || -> Result<(), NotifyError> {
        agent.post(&url).send_json(body)?;
        Ok(())
    })
    .await
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build()
}

/// Chat incoming-webhook: a short human readable summary.
pub struct SlackSink {
    url: String,
    agent: ureq::Agent,
}

impl SlackSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: agent(),
        }
    }

    pub fn payload(event: &IngestionEvent) -> Value {
        json!({
            "text": format!(
                ":email: New Interested Email!\n*From:* {}\n*Subject:* {}",
                event.sender, event.subject
            )
        })
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn deliver(&self, event: &IngestionEvent) -> Result<(), NotifyError> {
        post_json(&self.agent, &self.url, Self::payload(event)).await
    }
}

/// Generic webhook receiving the full event.
pub struct WebhookSink {
    url: String,
    agent: ureq::Agent,
}

pub const INTERESTED_EVENT: &str = "new_interested_email";

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: agent(),
        }
    }

    pub fn payload(event: &IngestionEvent) -> Value {
        json!({ "event": INTERESTED_EVENT, "email": event })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &IngestionEvent) -> Result<(), NotifyError> {
        post_json(&self.agent, &self.url, Self::payload(event)).await
    }
}

/// Dispatches one event to every configured sink at once.
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Returns the number of sinks that accepted the event. A failing sink
    /// is logged and never affects the others.
    pub async fn dispatch(&self, event: &IngestionEvent) -> usize {
        let attempts = self.sinks.iter().map(|sink| async move {
            match sink.deliver(event).await {
                Ok(()) => {
                    info!(sink = sink.name(), account = %event.account, "notification sent");
                    true
                }
                Err(e) => {
                    warn!(sink = sink.name(), account = %event.account, %e, "notification failed");
                    false
                }
            }
        });
        join_all(attempts).await.into_iter().filter(|ok| *ok).count()
    }
}
