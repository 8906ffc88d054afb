//! Fixtures and a scripted in-memory venue for unit tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use margin_liquidator_chain::{
    AccountKey, Action, ChangeFeed, ExecError, Executor, FundingState, Group, LedgerReader,
    MarginAccount, OpenOrdersUpdate, PerpMarketInfo, PriceSnapshot, RestingOrder, RiskWeights,
    Signature, SpotMarketInfo, TokenInfo, TriggerOrder, UpdateStream,
};

pub fn key(byte: u8) -> AccountKey {
    AccountKey::repeat_byte(byte)
}

fn weights(maint: Decimal, init: Decimal) -> RiskWeights {
    RiskWeights {
        maint_asset_weight: Decimal::ONE - maint,
        init_asset_weight: Decimal::ONE - init,
        maint_liab_weight: Decimal::ONE + maint,
        init_liab_weight: Decimal::ONE + init,
    }
}

/// BTC, ETH, USDC. Spot weights 0.9/1.1 maint, 0.8/1.2 init; perp weights
/// 0.95/1.05 maint, 0.9/1.1 init; perp lot size 0.0001.
pub fn group() -> Group {
    let token = |symbol: &str, b: u8| TokenInfo {
        symbol: symbol.to_string(),
        mint: key(b),
        decimals: 6,
    };
    let spot = |b: u8| SpotMarketInfo {
        key: key(b),
        weights: weights(dec!(0.1), dec!(0.2)),
        liquidation_fee: dec!(0.05),
        min_order_size: dec!(0.001),
    };
    let perp = |b: u8| PerpMarketInfo {
        key: key(b),
        weights: weights(dec!(0.05), dec!(0.1)),
        liquidation_fee: dec!(0.025),
        base_lot_size: dec!(0.0001),
    };
    Group {
        key: key(0xaa),
        name: "test.group".to_string(),
        tokens: vec![token("BTC", 1), token("ETH", 2), token("USDC", 3)],
        spot_markets: vec![Some(spot(0x11)), Some(spot(0x12))],
        perp_markets: vec![Some(perp(0x21)), Some(perp(0x22))],
    }
}

/// BTC 40000, ETH 2000, USDC 1.
pub fn prices() -> PriceSnapshot {
    PriceSnapshot {
        prices: vec![dec!(40000), dec!(2000), Decimal::ONE],
        funding: vec![FundingState::default(); 2],
        timestamp: None,
    }
}

/// Empty account owned by `key(0xf0)`.
pub fn account(byte: u8) -> MarginAccount {
    MarginAccount::new(key(byte), key(0xf0), 3)
}

/// Operator account holding `usdc` of quote, so its init health is `usdc`.
pub fn liqor(usdc: Decimal) -> MarginAccount {
    let mut account = MarginAccount::new(key(0xee), key(0xef), 3);
    account.deposits[2] = usdc;
    account
}

type Effect =
    Box<dyn Fn(&Action, &mut HashMap<AccountKey, MarginAccount>) -> Result<(), ExecError> + Send + Sync>;

#[derive(Default)]
struct VenueState {
    group: Option<Group>,
    prices: PriceSnapshot,
    accounts: HashMap<AccountKey, MarginAccount>,
    trigger_orders: HashMap<AccountKey, Vec<TriggerOrder>>,
    resting_spot: Vec<RestingOrder>,
    resting_perp: Vec<RestingOrder>,
    submitted: Vec<Action>,
    failures: HashMap<&'static str, ExecError>,
    failing_loads: bool,
    effect: Option<Effect>,
    feed_accounts: Vec<MarginAccount>,
}

/// In-memory ledger and executor. Every submission is recorded; an
/// optional effect mutates accounts the way the ledger would.
pub struct FakeVenue {
    state: Mutex<VenueState>,
}

impl fmt::Debug for FakeVenue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeVenue")
            .field("accounts", &state.accounts.len())
            .field("submitted", &state.submitted.len())
            .finish()
    }
}

impl FakeVenue {
    pub fn new(group: Group, prices: PriceSnapshot) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(VenueState {
                group: Some(group),
                prices,
                ..Default::default()
            }),
        })
    }

    pub fn insert(&self, account: MarginAccount) {
        self.state.lock().accounts.insert(account.key, account);
    }

    pub fn account(&self, key: AccountKey) -> Option<MarginAccount> {
        self.state.lock().accounts.get(&key).cloned()
    }

    pub fn set_prices(&self, prices: PriceSnapshot) {
        self.state.lock().prices = prices;
    }

    pub fn set_trigger_orders(&self, record: AccountKey, orders: Vec<TriggerOrder>) {
        self.state.lock().trigger_orders.insert(record, orders);
    }

    pub fn add_resting_spot(&self, order: RestingOrder) {
        self.state.lock().resting_spot.push(order);
    }

    pub fn add_resting_perp(&self, order: RestingOrder) {
        self.state.lock().resting_perp.push(order);
    }

    /// Fail every submission of this kind.
    pub fn fail(&self, kind: &'static str, error: ExecError) {
        self.state.lock().failures.insert(kind, error);
    }

    /// Make every ledger read fail.
    pub fn fail_loads(&self, failing: bool) {
        self.state.lock().failing_loads = failing;
    }

    /// Queue an account update for the next account subscription.
    pub fn push_feed_account(&self, account: MarginAccount) {
        self.state.lock().feed_accounts.push(account);
    }

    pub fn on_submit<F>(&self, effect: F)
    where
        F: Fn(&Action, &mut HashMap<AccountKey, MarginAccount>) -> Result<(), ExecError>
            + Send
            + Sync
            + 'static,
    {
        self.state.lock().effect = Some(Box::new(effect));
    }

    pub fn submitted(&self) -> Vec<Action> {
        self.state.lock().submitted.clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.state.lock().submitted.iter().map(Action::kind).collect()
    }

    fn check_loads(&self) -> Result<()> {
        if self.state.lock().failing_loads {
            anyhow::bail!("ledger unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for FakeVenue {
    async fn load_group_and_prices(&self) -> Result<(Group, PriceSnapshot)> {
        self.check_loads()?;
        let state = self.state.lock();
        let group = state
            .group
            .clone()
            .ok_or_else(|| anyhow::anyhow!("group not found"))?;
        Ok((group, state.prices.clone()))
    }

    async fn load_account(&self, key: AccountKey) -> Result<MarginAccount> {
        self.check_loads()?;
        self.account(key)
            .ok_or_else(|| anyhow::anyhow!("account {} not found", key))
    }

    async fn load_all_accounts(&self, _group: &Group) -> Result<Vec<MarginAccount>> {
        self.check_loads()?;
        let mut accounts: Vec<_> = self.state.lock().accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.key);
        Ok(accounts)
    }

    async fn load_accounts_for_owner(
        &self,
        group: &Group,
        owner: AccountKey,
    ) -> Result<Vec<MarginAccount>> {
        Ok(self
            .load_all_accounts(group)
            .await?
            .into_iter()
            .filter(|a| a.owner == owner)
            .collect())
    }

    async fn load_trigger_orders(&self, records: &[AccountKey]) -> Result<Vec<Vec<TriggerOrder>>> {
        self.check_loads()?;
        let state = self.state.lock();
        Ok(records
            .iter()
            .map(|r| state.trigger_orders.get(r).cloned().unwrap_or_default())
            .collect())
    }

    async fn load_resting_spot_orders(
        &self,
        account: &MarginAccount,
        market_index: usize,
    ) -> Result<Vec<RestingOrder>> {
        self.check_loads()?;
        Ok(self
            .state
            .lock()
            .resting_spot
            .iter()
            .filter(|o| o.owner == account.key && o.market_index == market_index)
            .cloned()
            .collect())
    }

    async fn load_resting_perp_orders(
        &self,
        account: &MarginAccount,
        market_index: usize,
    ) -> Result<Vec<RestingOrder>> {
        self.check_loads()?;
        Ok(self
            .state
            .lock()
            .resting_perp
            .iter()
            .filter(|o| o.owner == account.key && o.market_index == market_index)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Executor for FakeVenue {
    async fn submit(&self, action: Action) -> std::result::Result<Signature, ExecError> {
        let mut state = self.state.lock();
        state.submitted.push(action.clone());
        let n = state.submitted.len();
        if let Some(err) = state.failures.get(action.kind()) {
            return Err(err.clone());
        }
        let VenueState {
            effect, accounts, ..
        } = &mut *state;
        if let Some(effect) = effect {
            effect(&action, accounts)?;
        }
        Ok(format!("sig-{n}"))
    }
}

#[async_trait]
impl ChangeFeed for FakeVenue {
    async fn subscribe_accounts(&self, _group: &Group) -> Result<UpdateStream<MarginAccount>> {
        let queued = std::mem::take(&mut self.state.lock().feed_accounts);
        Ok(Box::pin(stream::iter(queued)))
    }

    async fn subscribe_open_orders(&self, _group: &Group) -> Result<UpdateStream<OpenOrdersUpdate>> {
        Ok(Box::pin(stream::empty()))
    }
}
