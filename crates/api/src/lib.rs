//! Operator-facing side channels of the margin liquidator.
//!
//! This crate provides:
//! - Notification events (launch, sick account, liquidation outcome, rebalance)
//! - Webhook delivery over HTTP, with a log-only fallback

mod notify;

pub use notify::{notifier_for, LogNotifier, Notification, Notifier, WebhookNotifier};
