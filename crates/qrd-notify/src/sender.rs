//! Push transports.
//!
//! The service does not speak the Web Push protocol itself. Deliveries are
//! handed to a relay over HTTP; the relay owns VAPID keys and payload
//! encryption.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use qrd_schemas::PushSubscription;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::message::PushMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The endpoint no longer exists; the subscription should be dropped.
    Gone,
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<Delivery>;
}

// ---------------------------------------------------------------------------
// RelayPushSender
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RelayRequest<'a> {
    endpoint: &'a str,
    subscription_id: String,
    message: &'a PushMessage,
}

/// POSTs each delivery as JSON to a push relay.
pub struct RelayPushSender {
    client: reqwest::Client,
    relay_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for RelayPushSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPushSender")
            .field("relay_url", &self.relay_url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl RelayPushSender {
    pub fn new(relay_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build push relay http client")?;
        Ok(Self {
            client,
            relay_url: relay_url.into(),
            token,
        })
    }
}

#[async_trait]
impl PushSender for RelayPushSender {
    async fn send(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<Delivery> {
        let body = RelayRequest {
            endpoint: &subscription.endpoint,
            subscription_id: subscription.subscription_id.to_string(),
            message,
        };

        let mut req = self.client.post(&self.relay_url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("push relay request failed: {}", self.relay_url))?;

        classify(resp.status())
    }
}

fn classify(status: StatusCode) -> Result<Delivery> {
    if status.is_success() {
        return Ok(Delivery::Delivered);
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Delivery::Gone),
        other => Err(anyhow!("push relay returned {other}")),
    }
}

// ---------------------------------------------------------------------------
// LogPushSender
// ---------------------------------------------------------------------------

/// Used when no relay is configured: logs the delivery and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<Delivery> {
        info!(
            subscription_id = %subscription.subscription_id,
            order_id = %message.order_id,
            status = %message.status,
            title = %message.title,
            "push (log only)"
        );
        Ok(Delivery::Delivered)
    }
}

// ---------------------------------------------------------------------------
// RecordingPushSender
// ---------------------------------------------------------------------------

/// Captures deliveries in memory. Endpoints listed in `gone` report
/// [`Delivery::Gone`]; endpoints listed in `failing` return an error.
#[derive(Debug, Default, Clone)]
pub struct RecordingPushSender {
    sent: Arc<Mutex<Vec<(PushSubscription, PushMessage)>>>,
    gone: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl RecordingPushSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_gone(&self, endpoint: &str) {
        self.gone.lock().await.push(endpoint.to_string());
    }

    pub async fn mark_failing(&self, endpoint: &str) {
        self.failing.lock().await.push(endpoint.to_string());
    }

    pub async fn sent(&self) -> Vec<(PushSubscription, PushMessage)> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_messages(&self) -> Vec<PushMessage> {
        self.sent.lock().await.iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<Delivery> {
        if self.failing.lock().await.contains(&subscription.endpoint) {
            return Err(anyhow!("endpoint unreachable: {}", subscription.endpoint));
        }
        if self.gone.lock().await.contains(&subscription.endpoint) {
            return Ok(Delivery::Gone);
        }
        self.sent
            .lock()
            .await
            .push((subscription.clone(), message.clone()));
        Ok(Delivery::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_status_mapping() {
        assert_eq!(classify(StatusCode::CREATED).unwrap(), Delivery::Delivered);
        assert_eq!(classify(StatusCode::GONE).unwrap(), Delivery::Gone);
        assert_eq!(classify(StatusCode::NOT_FOUND).unwrap(), Delivery::Gone);
        assert!(classify(StatusCode::BAD_GATEWAY).is_err());
    }

    #[test]
    fn relay_debug_redacts_token() {
        let s = RelayPushSender::new(
            "http://relay.local/push",
            Some("secret-token".into()),
            Duration::from_secs(2),
        )
        .unwrap();
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("<REDACTED>"));
    }
}
