//! Margin account state as decoded from the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::market::AccountKey;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Position in one perp market.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerpPosition {
    /// Signed base position in lots.
    pub base_position: i64,
    /// Quote position in quote units.
    pub quote_position: Decimal,
    #[serde(default)]
    pub long_settled_funding: Decimal,
    #[serde(default)]
    pub short_settled_funding: Decimal,
    /// Resting bid quantity in lots.
    #[serde(default)]
    pub bids_quantity: i64,
    /// Resting ask quantity in lots.
    #[serde(default)]
    pub asks_quantity: i64,
}

impl PerpPosition {
    pub fn has_open_orders(&self) -> bool {
        self.bids_quantity > 0 || self.asks_quantity > 0
    }

    pub fn is_flat(&self) -> bool {
        self.base_position == 0 && self.quote_position.is_zero()
    }
}

/// Balances held by a spot open-orders record, in token units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenOrdersState {
    pub base_free: Decimal,
    pub base_total: Decimal,
    pub quote_free: Decimal,
    pub quote_total: Decimal,
    #[serde(default)]
    pub referrer_rebates_accrued: Decimal,
}

impl OpenOrdersState {
    /// True when settling funds would move anything back to the account.
    pub fn has_settleable_funds(&self) -> bool {
        !self.base_total.is_zero()
            || !(self.quote_total + self.referrer_rebates_accrued).is_zero()
    }
}

/// When a trigger order fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerCondition {
    Above,
    Below,
}

/// Conditional order stored off the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOrder {
    /// Slot of the order in the advanced-orders record.
    pub index: usize,
    pub market_index: usize,
    pub side: Side,
    pub quantity: i64,
    pub condition: TriggerCondition,
    pub trigger_price: Decimal,
    /// Cleared by the ledger once, at execution.
    pub is_active: bool,
}

impl TriggerOrder {
    /// Whether the condition holds at `price`.
    pub fn is_triggered(&self, price: Decimal) -> bool {
        match self.condition {
            TriggerCondition::Above => price > self.trigger_price,
            TriggerCondition::Below => price < self.trigger_price,
        }
    }
}

pub type TriggerOrders = SmallVec<[TriggerOrder; 4]>;

/// One risk-bearing account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginAccount {
    pub key: AccountKey,
    pub owner: AccountKey,
    /// Deposits per token index, in token units.
    pub deposits: Vec<Decimal>,
    /// Borrows per token index, in token units.
    pub borrows: Vec<Decimal>,
    /// Perp position per market index.
    #[serde(default)]
    pub perp_positions: Vec<PerpPosition>,
    /// Spot markets whose open orders count toward health.
    #[serde(default)]
    pub in_margin_basket: Vec<bool>,
    /// Open-orders record per spot market.
    #[serde(default)]
    pub spot_open_orders: Vec<Option<AccountKey>>,
    /// Decoded open-orders state per spot market. Not carried by raw account
    /// updates.
    #[serde(default)]
    pub open_orders: Vec<Option<OpenOrdersState>>,
    /// Record holding the account's trigger orders, if any.
    #[serde(default)]
    pub advanced_orders: Option<AccountKey>,
    /// Decoded trigger orders. Not carried by raw account updates.
    #[serde(default)]
    pub trigger_orders: TriggerOrders,
    #[serde(default)]
    pub being_liquidated: bool,
    #[serde(default)]
    pub bankrupt: bool,
}

impl MarginAccount {
    pub fn new(key: AccountKey, owner: AccountKey, num_tokens: usize) -> Self {
        Self {
            key,
            owner,
            deposits: vec![Decimal::ZERO; num_tokens],
            borrows: vec![Decimal::ZERO; num_tokens],
            perp_positions: Vec::new(),
            in_margin_basket: Vec::new(),
            spot_open_orders: Vec::new(),
            open_orders: Vec::new(),
            advanced_orders: None,
            trigger_orders: TriggerOrders::new(),
            being_liquidated: false,
            bankrupt: false,
        }
    }

    pub fn deposit(&self, index: usize) -> Decimal {
        self.deposits.get(index).copied().unwrap_or_default()
    }

    pub fn borrow(&self, index: usize) -> Decimal {
        self.borrows.get(index).copied().unwrap_or_default()
    }

    /// Deposit minus borrow of a token.
    pub fn net(&self, index: usize) -> Decimal {
        self.deposit(index) - self.borrow(index)
    }

    pub fn perp_position(&self, market_index: usize) -> Option<&PerpPosition> {
        self.perp_positions.get(market_index)
    }

    pub fn open_orders_state(&self, market_index: usize) -> Option<&OpenOrdersState> {
        self.open_orders.get(market_index).and_then(Option::as_ref)
    }

    /// Spot markets whose resting orders count toward health.
    pub fn margin_basket_markets(&self) -> impl Iterator<Item = usize> + '_ {
        self.in_margin_basket
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
    }

    pub fn has_any_spot_orders(&self) -> bool {
        self.in_margin_basket.iter().any(|&b| b)
    }

    pub fn has_any_perp_orders(&self) -> bool {
        self.perp_positions.iter().any(PerpPosition::has_open_orders)
    }

    /// Copy the decoded sub-resources a raw update does not carry.
    pub fn inherit_cached(&mut self, previous: &MarginAccount) {
        if self.open_orders.is_empty() {
            self.open_orders = previous.open_orders.clone();
        }
        if self.trigger_orders.is_empty() && self.advanced_orders == previous.advanced_orders {
            self.trigger_orders = previous.trigger_orders.clone();
        }
    }

    /// Cache open-orders state for a spot market, growing the cache if needed.
    pub fn set_open_orders(&mut self, market_index: usize, state: OpenOrdersState) {
        if self.open_orders.len() <= market_index {
            self.open_orders.resize(market_index + 1, None);
        }
        self.open_orders[market_index] = Some(state);
    }
}
