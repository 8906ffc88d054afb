//! Liquidator core logic.
//!
//! This crate provides the core liquidation bot functionality:
//! - Health evaluation of margin accounts at maint and init strictness
//! - Account universe tracking fed by refreshes and change feeds
//! - Liquidation target selection and transfer sizing
//! - Spot and perp liquidation flows with bankruptcy resolution
//! - Trigger order execution
//! - Operator account rebalancing
//! - Scanner orchestration

mod account_tracker;
mod bankruptcy;
pub mod config;
mod error;
mod health;
mod liquidator;
mod rebalancer;
mod scanner;
mod selector;
mod trigger_orders;

#[cfg(test)]
mod test_support;

pub use account_tracker::{AccountTracker, RefreshTicket, TrackedAccount, UpdateKind};
pub use bankruptcy::{
    residual_perp_liability, residual_token_liability, BankruptcyResolver, Resolution,
};
pub use config::{config, init_config, BotConfig};
pub use error::LiquidationError;
pub use health::{
    classify, describe, equity, evaluate, has_collateral, health, is_bankrupt, is_liquidatable,
    perp_base_value, perp_market_health, perp_quote_position, HealthComponents, Solvency,
};
pub use liquidator::{should_clear_flag, LiquidationOutcome, LiquidationSettings, Liquidator};
pub use rebalancer::{
    compute_diffs, plan_token_orders, positions_unbalanced, tokens_unbalanced, RebalanceReport,
    Rebalancer, TokenDiff,
};
pub use scanner::{CycleReport, FeedUpdate, Scanner, ScannerConfig};
pub use selector::{
    highest_perp_market, largest_asset_token, lowest_perp_market, net_values, select_legs,
    size_transfer, LegSelection, LiquidationPair, SizingError, TransferSize,
};
pub use trigger_orders::{TriggerExecutor, TriggerReport};
