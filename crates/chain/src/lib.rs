//! Venue interaction layer for the margin liquidator.
//!
//! This crate provides:
//! - Data model of groups, prices and margin accounts
//! - Actions the liquidator submits and their classified failures
//! - Collaborator traits: ledger reader, executor, change feed
//! - A file-backed ledger with a polling change feed
//! - A dry-run executor

mod account;
mod action;
mod dry_run;
mod error;
mod ledger;
mod market;
mod snapshot;

pub use account::{
    MarginAccount, OpenOrdersState, PerpPosition, Side, TriggerCondition, TriggerOrder,
    TriggerOrders,
};
pub use action::{Action, AssetRef, OrderType, Signature};
pub use dry_run::DryRunExecutor;
pub use error::ExecError;
pub use ledger::{ChangeFeed, Executor, LedgerReader, OpenOrdersUpdate, RestingOrder, UpdateStream};
pub use market::{
    AccountKey, FundingState, Group, PerpMarketInfo, PriceSnapshot, RiskWeights, SpotMarketInfo,
    Strictness, TokenInfo, MAX_TOKENS,
};
pub use snapshot::{AdvancedOrdersRecord, LedgerSnapshot, SnapshotLedger};
