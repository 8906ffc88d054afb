//! Human-readable operator notifications.
//!
//! Notifications are a side channel: delivery is fire-and-forget and a
//! failed post never affects the liquidation cycle.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::B256;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Events surfaced to operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The liquidator started watching a group.
    Launched { group: String },
    /// An account was confirmed liquidatable.
    SickAccount {
        account: B256,
        health_ratio: Decimal,
        summary: String,
    },
    Liquidated { account: B256 },
    LiquidationFailed { account: B256, error: String },
    /// The operator account was rebalanced toward its targets.
    Rebalanced { orders: usize },
    Error { context: String, error: String },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launched { group } => write!(f, "Liquidator launched for group {group}"),
            Self::SickAccount {
                account,
                health_ratio,
                summary,
            } => write!(
                f,
                "Sick account {account} health ratio: {}\n{summary}",
                health_ratio.round_dp(4)
            ),
            Self::Liquidated { account } => write!(f, "Liquidated account {account}"),
            Self::LiquidationFailed { account, error } => {
                write!(f, "Failed to liquidate account {account}: {error}")
            }
            Self::Rebalanced { orders } => {
                write!(f, "Rebalanced operator account with {orders} orders")
            }
            Self::Error { context, error } => write!(f, "{context}: {error}"),
        }
    }
}

/// Sink for notifications.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// Deliver a notification without waiting for the result.
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!(notification = %notification, "Notification");
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
}

/// Posts notifications as `{"content": ...}` JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Arc<str>,
    prefix: Option<String>,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: Arc::from(url.into()),
            prefix: None,
        }
    }

    /// Prepend a fixed tag (e.g. the group name) to every message.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn render(&self, notification: &Notification) -> String {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        match &self.prefix {
            Some(prefix) => format!("[{prefix}] {timestamp} {notification}"),
            None => format!("{timestamp} {notification}"),
        }
    }

    /// Post one message and wait for the response.
    pub async fn post(&self, content: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(self.url.as_ref())
            .json(&WebhookPayload { content })
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: Notification) {
        let content = self.render(&notification);
        debug!(content = %content, "Posting notification");

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, notification dropped");
            return;
        };
        let notifier = self.clone();
        handle.spawn(async move {
            if let Err(e) = notifier.post(&content).await {
                warn!(error = %e, "Error posting to notify webhook");
            }
        });
    }
}

/// Build the notifier for an optional webhook URL. Webhook messages are
/// prefixed with the group name.
pub fn notifier_for(webhook_url: Option<&str>, group: &str) -> Arc<dyn Notifier> {
    match webhook_url {
        Some(url) if !url.is_empty() => Arc::new(WebhookNotifier::new(url).with_prefix(group)),
        _ => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sick_account_message() {
        let n = Notification::SickAccount {
            account: B256::repeat_byte(1),
            health_ratio: dec!(-3.123456),
            summary: "BTC: -1".to_string(),
        };
        let text = n.to_string();
        assert!(text.starts_with("Sick account 0x0101"));
        assert!(text.contains("health ratio: -3.1235"));
        assert!(text.ends_with("BTC: -1"));
    }

    #[test]
    fn test_render_with_prefix() {
        let notifier = WebhookNotifier::new("http://localhost:1/hook").with_prefix("devnet.2");
        let text = notifier.render(&Notification::Launched {
            group: "devnet.2".to_string(),
        });
        assert!(text.starts_with("[devnet.2] "));
        assert!(text.ends_with("Liquidator launched for group devnet.2"));
    }

    #[test]
    fn test_notifier_for_empty_url_logs() {
        let notifier = notifier_for(Some(""), "devnet.2");
        assert!(format!("{notifier:?}").contains("LogNotifier"));
        let notifier = notifier_for(Some("http://localhost:1/hook"), "devnet.2");
        let debug = format!("{notifier:?}");
        assert!(debug.contains("WebhookNotifier"));
        assert!(debug.contains("devnet.2"));
    }

    #[test]
    fn test_notify_without_runtime_does_not_panic() {
        let notifier = WebhookNotifier::new("http://localhost:1/hook");
        notifier.notify(Notification::Liquidated {
            account: B256::ZERO,
        });
    }

    #[tokio::test]
    async fn test_post_to_unreachable_webhook_errors() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hook");
        assert!(notifier.post("hello").await.is_err());
    }
}
