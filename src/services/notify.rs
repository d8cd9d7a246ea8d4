use std::sync::Arc;

use hmac::{Hmac, Mac};
use log::{error, info, warn};
use mongodb::bson::oid::ObjectId;
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::Config;

/// Events the core reports to the notification gateway.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyEvent {
    QuoteReceived,
    EngagementAccepted,
    EngagementDeclined,
    EngagementStarted,
    EngagementCompleted,
    EngagementCancelled,
    DisputeRaised,
    ReviewReceived,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::QuoteReceived => "quote_received",
            NotifyEvent::EngagementAccepted => "engagement_accepted",
            NotifyEvent::EngagementDeclined => "engagement_declined",
            NotifyEvent::EngagementStarted => "engagement_started",
            NotifyEvent::EngagementCompleted => "engagement_completed",
            NotifyEvent::EngagementCancelled => "engagement_cancelled",
            NotifyEvent::DisputeRaised => "dispute_raised",
            NotifyEvent::ReviewReceived => "review_received",
        }
    }
}

/// Best-effort delivery interface. Failure is logged and absorbed; it never
/// rolls back or blocks the state transition that triggered it.
#[rocket::async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, recipient_id: ObjectId, event: NotifyEvent, payload: serde_json::Value);
}

pub type Notifier = Arc<dyn NotificationGateway>;

/// Dispatches without awaiting the outcome in the caller's request.
pub fn notify_async(
    notifier: &Notifier,
    recipient_id: ObjectId,
    event: NotifyEvent,
    payload: serde_json::Value,
) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        notifier.notify(recipient_id, event, payload).await;
    });
}

/// Posts a signed JSON envelope to the configured gateway webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    signing_secret: String,
}

impl WebhookNotifier {
    pub fn from_config() -> Option<Self> {
        let url = Config::notify_webhook_url()?;
        let signing_secret = Config::notify_signing_secret().unwrap_or_default();
        Some(WebhookNotifier {
            client: Client::new(),
            url,
            signing_secret,
        })
    }

    fn sign(&self, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.signing_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[rocket::async_trait]
impl NotificationGateway for WebhookNotifier {
    async fn notify(&self, recipient_id: ObjectId, event: NotifyEvent, payload: serde_json::Value) {
        let envelope = serde_json::json!({
            "event_id": Uuid::new_v4().to_string(),
            "recipient_id": recipient_id.to_hex(),
            "event_type": event.as_str(),
            "payload": payload,
        });
        let body = envelope.to_string();
        let signature = self.sign(&body);

        let result = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .body(body)
            .send()
            .await;

        match result {
            Ok(res) if res.status().is_success() => {
                info!("notified {} of {}", recipient_id.to_hex(), event.as_str());
            }
            Ok(res) => {
                warn!(
                    "notification gateway degraded: {} returned {}",
                    event.as_str(),
                    res.status()
                );
            }
            Err(e) => {
                error!("notification gateway degraded: {}: {}", event.as_str(), e);
            }
        }
    }
}

/// Used when no webhook is configured, and by tests.
pub struct NoopNotifier;

#[rocket::async_trait]
impl NotificationGateway for NoopNotifier {
    async fn notify(
        &self,
        recipient_id: ObjectId,
        event: NotifyEvent,
        _payload: serde_json::Value,
    ) {
        info!(
            "notification skipped (no gateway configured): {} -> {}",
            event.as_str(),
            recipient_id.to_hex()
        );
    }
}

pub fn build_notifier() -> Notifier {
    match WebhookNotifier::from_config() {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(NoopNotifier),
    }
}
