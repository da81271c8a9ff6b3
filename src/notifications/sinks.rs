//! Delivery collaborators for notifications

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Notification, NotificationError};
use crate::events::{Event, EventBus};

/// Something that can deliver a notification to its recipient
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Publishes notifications on the event bus for connected WebSocket clients
pub struct EventBusSink {
    event_bus: EventBus,
}

impl EventBusSink {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl NotificationSink for EventBusSink {
    fn name(&self) -> &'static str {
        "event_bus"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.event_bus.publish(Event::Notification {
            dispatch_id: notification.dispatch_id,
            trip_id: notification.trip_id,
            state: notification.new_state,
            recipient_role: notification.recipient_role,
            timestamp: notification.created_at,
        });
        Ok(())
    }
}

/// POSTs the notification as JSON to an external delivery service
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nodexia/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(NotificationError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Delivers to every inner sink; the first failure is reported after all have run
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    fn name(&self) -> &'static str {
        "fanout"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let results =
            futures::future::join_all(self.sinks.iter().map(|s| s.deliver(notification))).await;
        results.into_iter().collect()
    }
}

/// Drops every notification
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn deliver(&self, _notification: &Notification) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[cfg(test)]
pub use self::testing::*;
