//! Feishu (Lark) webhook notifications
//!
//! Pushes order state changes to a Feishu bot as plain text messages.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::QueueState;
use crate::error::{Result, SigmatchError};
use crate::services::notifier::{Notifier, StateChangeEvent};

/// Feishu notification client
#[derive(Clone)]
pub struct FeishuNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct FeishuMessage {
    msg_type: String,
    content: FeishuContent,
}

#[derive(Serialize)]
struct FeishuContent {
    text: String,
}

impl FeishuNotifier {
    /// Create a notifier from `FEISHU_WEBHOOK_URL`, if set
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("FEISHU_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(Self::new)
    }

    /// Create a notifier with an explicit webhook URL
    pub fn new(webhook_url: String) -> Arc<Self> {
        info!("Feishu notifications enabled");
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            client,
            webhook_url,
        })
    }

    /// Send a text message to Feishu
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let message = FeishuMessage {
            msg_type: "text".to_string(),
            content: FeishuContent {
                text: text.to_string(),
            },
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("Feishu notification sent successfully");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("Feishu notification failed: {} - {}", status, body);
            Err(SigmatchError::Internal(format!(
                "feishu webhook returned HTTP {}: {}",
                status, body
            )))
        }
    }
}

/// Chat text for one state change
fn render(event: &StateChangeEvent) -> String {
    let marker = match event.to() {
        QueueState::Pending => "🕒",
        QueueState::Matched => "🎯",
        QueueState::Executed => "🟢",
        QueueState::Failed => "🔴",
        QueueState::Cancelled => "⚪",
    };

    let mut text = format!("{} {}", marker, event.summary());
    if event.attempts > 0 {
        text.push_str(&format!("\nAttempts: {}", event.attempts));
    }
    if event.to() == QueueState::Failed {
        if let Some(err) = &event.last_error {
            text.push_str(&format!("\nError: {}", err));
        }
    }
    text
}

#[async_trait]
impl Notifier for FeishuNotifier {
    async fn notify(&self, event: &StateChangeEvent) -> Result<()> {
        self.send_message(&render(event)).await
    }
}
