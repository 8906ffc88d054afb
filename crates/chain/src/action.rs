//! Actions submitted to the ledger through an [`Executor`](crate::Executor).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Side;
use crate::market::AccountKey;

/// Identifier of a submitted action.
pub type Signature = String;

/// Either side of a token/perp liability transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum AssetRef {
    Token(usize),
    Perp(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    ImmediateOrCancel,
}

/// Everything the liquidator can ask the ledger to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Cancel up to `limit` resting spot orders of a liquidatee.
    ForceCancelSpotOrders {
        liqee: AccountKey,
        market_index: usize,
        limit: u8,
    },
    /// Cancel up to `limit` resting perp orders of a liquidatee.
    ForceCancelPerpOrders {
        liqee: AccountKey,
        market_index: usize,
        limit: u8,
    },
    /// Take over a token liability in exchange for a token asset.
    LiquidateTokenAndToken {
        liqee: AccountKey,
        liqor: AccountKey,
        asset_index: usize,
        liab_index: usize,
        max_liab_transfer: Decimal,
    },
    /// Transfer between a token and a perp quote position, in either direction.
    LiquidateTokenAndPerp {
        liqee: AccountKey,
        liqor: AccountKey,
        asset: AssetRef,
        liab: AssetRef,
        max_liab_transfer: Decimal,
    },
    /// Take over base lots of a perp position.
    LiquidatePerpMarket {
        liqee: AccountKey,
        liqor: AccountKey,
        market_index: usize,
        base_transfer_request: i64,
    },
    ResolveTokenBankruptcy {
        liqee: AccountKey,
        liqor: AccountKey,
        liab_index: usize,
        max_liab_transfer: Decimal,
    },
    ResolvePerpBankruptcy {
        liqee: AccountKey,
        liqor: AccountKey,
        market_index: usize,
        max_liab_transfer: Decimal,
    },
    PlaceSpotOrder {
        owner: AccountKey,
        market_index: usize,
        side: Side,
        price: Decimal,
        size: Decimal,
        order_type: OrderType,
    },
    CancelSpotOrder {
        owner: AccountKey,
        market_index: usize,
        order_id: u128,
    },
    PlacePerpOrder {
        owner: AccountKey,
        market_index: usize,
        side: Side,
        price: Decimal,
        size: Decimal,
        order_type: OrderType,
        reduce_only: bool,
    },
    CancelPerpOrder {
        owner: AccountKey,
        market_index: usize,
        order_id: u128,
    },
    /// Move free open-orders balances back to the account.
    SettleFunds {
        owner: AccountKey,
        market_index: usize,
    },
    /// Realize a positive perp quote position.
    SettlePnl {
        owner: AccountKey,
        market_index: usize,
    },
    ExecuteTriggerOrder {
        owner: AccountKey,
        order_index: usize,
    },
}

impl Action {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ForceCancelSpotOrders { .. } => "force_cancel_spot_orders",
            Self::ForceCancelPerpOrders { .. } => "force_cancel_perp_orders",
            Self::LiquidateTokenAndToken { .. } => "liquidate_token_and_token",
            Self::LiquidateTokenAndPerp { .. } => "liquidate_token_and_perp",
            Self::LiquidatePerpMarket { .. } => "liquidate_perp_market",
            Self::ResolveTokenBankruptcy { .. } => "resolve_token_bankruptcy",
            Self::ResolvePerpBankruptcy { .. } => "resolve_perp_bankruptcy",
            Self::PlaceSpotOrder { .. } => "place_spot_order",
            Self::CancelSpotOrder { .. } => "cancel_spot_order",
            Self::PlacePerpOrder { .. } => "place_perp_order",
            Self::CancelPerpOrder { .. } => "cancel_perp_order",
            Self::SettleFunds { .. } => "settle_funds",
            Self::SettlePnl { .. } => "settle_pnl",
            Self::ExecuteTriggerOrder { .. } => "execute_trigger_order",
        }
    }

    /// Account the action operates on.
    pub fn target(&self) -> AccountKey {
        match self {
            Self::ForceCancelSpotOrders { liqee, .. }
            | Self::ForceCancelPerpOrders { liqee, .. }
            | Self::LiquidateTokenAndToken { liqee, .. }
            | Self::LiquidateTokenAndPerp { liqee, .. }
            | Self::LiquidatePerpMarket { liqee, .. }
            | Self::ResolveTokenBankruptcy { liqee, .. }
            | Self::ResolvePerpBankruptcy { liqee, .. } => *liqee,
            Self::PlaceSpotOrder { owner, .. }
            | Self::CancelSpotOrder { owner, .. }
            | Self::PlacePerpOrder { owner, .. }
            | Self::CancelPerpOrder { owner, .. }
            | Self::SettleFunds { owner, .. }
            | Self::SettlePnl { owner, .. }
            | Self::ExecuteTriggerOrder { owner, .. } => *owner,
        }
    }
}
