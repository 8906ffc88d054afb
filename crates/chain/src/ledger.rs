//! Collaborator interfaces between the risk engine and the venue.
//!
//! The engine never decodes ledger storage or builds transactions itself.
//! It reads through a [`LedgerReader`], writes through an [`Executor`] and
//! listens to a [`ChangeFeed`].
//!
//! # Example
//!
//! ```rust,ignore
//! use margin_liquidator_chain::{Action, Executor, LedgerReader};
//!
//! let (group, prices) = ledger.load_group_and_prices().await?;
//! let account = ledger.load_account(key).await?;
//! executor.submit(Action::SettleFunds { owner: key, market_index: 0 }).await?;
//! ```

use std::fmt::Debug;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::{MarginAccount, OpenOrdersState, Side, TriggerOrder};
use crate::action::{Action, Signature};
use crate::error::ExecError;
use crate::market::{AccountKey, Group, PriceSnapshot};

/// A resting order on a spot or perp book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub owner: AccountKey,
    pub market_index: usize,
    pub order_id: u128,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Raw update of an open-orders record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrdersUpdate {
    /// Key of the open-orders record, not of the owning account.
    pub key: AccountKey,
    pub state: OpenOrdersState,
}

/// Boxed stream of pushed updates.
pub type UpdateStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Read access to venue state.
#[async_trait]
pub trait LedgerReader: Send + Sync + Debug {
    /// Group configuration together with a consistent price snapshot.
    async fn load_group_and_prices(&self) -> Result<(Group, PriceSnapshot)>;

    /// One account, including decoded open-orders state.
    async fn load_account(&self, key: AccountKey) -> Result<MarginAccount>;

    /// Every account of the group, including decoded open-orders state.
    async fn load_all_accounts(&self, group: &Group) -> Result<Vec<MarginAccount>>;

    /// Accounts owned by `owner`.
    async fn load_accounts_for_owner(
        &self,
        group: &Group,
        owner: AccountKey,
    ) -> Result<Vec<MarginAccount>>;

    /// Trigger orders stored in each advanced-orders record, in input order.
    async fn load_trigger_orders(&self, records: &[AccountKey]) -> Result<Vec<Vec<TriggerOrder>>>;

    /// Resting spot orders of an account in one market.
    async fn load_resting_spot_orders(
        &self,
        account: &MarginAccount,
        market_index: usize,
    ) -> Result<Vec<RestingOrder>>;

    /// Resting perp orders of an account in one market.
    async fn load_resting_perp_orders(
        &self,
        account: &MarginAccount,
        market_index: usize,
    ) -> Result<Vec<RestingOrder>>;
}

/// Submits actions. Implementations own signing, transport and timeouts;
/// every call resolves to a signature or a classified error.
#[async_trait]
pub trait Executor: Send + Sync + Debug {
    async fn submit(&self, action: Action) -> std::result::Result<Signature, ExecError>;
}

/// Push notifications of account changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync + Debug {
    /// Raw margin account updates for the group.
    async fn subscribe_accounts(&self, group: &Group) -> Result<UpdateStream<MarginAccount>>;

    /// Raw open-orders record updates for the group.
    async fn subscribe_open_orders(&self, group: &Group) -> Result<UpdateStream<OpenOrdersUpdate>>;
}
