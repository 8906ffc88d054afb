//! Configuration system for the margin liquidator.
//!
//! This module provides:
//! - Runtime configuration (profiles, intervals, sizing, rebalance targets)
//! - Loading from TOML files and environment overrides

mod bot;
mod loader;

pub use bot::{
    config, init_config, BotConfig, LedgerConfig, LiquidationConfig, NotificationConfig,
    OperatorConfig, RebalanceConfig, ScannerTimingConfig,
};
pub use loader::env;
