//! Restores the operator account to its target portfolio.
//!
//! Token balances are brought back to their targets with fee-adjusted limit
//! orders, largest imbalance first. Perp positions are flattened with
//! reduce-only IOC orders and positive PnL is settled. Each asset is
//! attempted independently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use arrayvec::ArrayVec;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use margin_liquidator_chain::{
    AccountKey, Action, Executor, Group, LedgerReader, MarginAccount, OrderType, PriceSnapshot,
    Side, MAX_TOKENS,
};

use crate::config::RebalanceConfig;

/// Distance of one token from its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenDiff {
    pub index: usize,
    /// Net balance minus target, in token units.
    pub diff: Decimal,
    /// `diff` in quote units.
    pub value: Decimal,
}

/// What one rebalance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebalanceReport {
    pub orders_placed: usize,
    pub orders_cancelled: usize,
    pub settlements: usize,
    pub failures: usize,
}

/// Diff of every spot token against its target. Missing targets are zero.
pub fn compute_diffs(
    account: &MarginAccount,
    group: &Group,
    prices: &PriceSnapshot,
    targets: &[Decimal],
) -> ArrayVec<TokenDiff, MAX_TOKENS> {
    group
        .spot_market_indices()
        .take(MAX_TOKENS)
        .map(|index| {
            let target = targets.get(index).copied().unwrap_or_default();
            let diff = account.net(index) - target;
            TokenDiff {
                index,
                diff,
                value: diff * prices.price(index),
            }
        })
        .collect()
}

fn exceeds_min_order(group: &Group, d: &TokenDiff) -> bool {
    group
        .spot_market(d.index)
        .is_some_and(|m| d.diff.abs() > m.min_order_size)
}

/// Diffs large enough to trade, largest absolute value first.
pub fn plan_token_orders(
    diffs: &[TokenDiff],
    group: &Group,
) -> ArrayVec<TokenDiff, MAX_TOKENS> {
    let mut plan: ArrayVec<TokenDiff, MAX_TOKENS> = diffs
        .iter()
        .filter(|d| exceeds_min_order(group, d))
        .copied()
        .collect();
    plan.sort_by(|a, b| b.value.abs().cmp(&a.value.abs()));
    plan
}

pub fn tokens_unbalanced(diffs: &[TokenDiff], group: &Group) -> bool {
    diffs.iter().any(|d| exceeds_min_order(group, d))
}

/// Any perp market with a base position or unsettled positive quote.
pub fn positions_unbalanced(account: &MarginAccount, group: &Group) -> bool {
    perp_markets_to_close(account, group).next().is_some()
}

fn perp_markets_to_close<'a>(
    account: &'a MarginAccount,
    group: &'a Group,
) -> impl Iterator<Item = usize> + 'a {
    group.perp_market_indices().filter(|&m| {
        account
            .perp_position(m)
            .is_some_and(|p| p.base_position != 0 || p.quote_position > Decimal::ZERO)
    })
}

/// Price that crosses the spread by the liquidation fee.
fn fee_adjusted(price: Decimal, fee: Decimal, side: Side) -> Decimal {
    match side {
        Side::Sell => price * (Decimal::ONE - fee),
        Side::Buy => price * (Decimal::ONE + fee),
    }
}

/// Rebalances the operator account at most once per interval.
#[derive(Debug)]
pub struct Rebalancer {
    ledger: Arc<dyn LedgerReader>,
    executor: Arc<dyn Executor>,
    interval: Duration,
    targets: Vec<Decimal>,
    last_rebalance: Instant,
}

impl Rebalancer {
    /// The interval clock starts now.
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        executor: Arc<dyn Executor>,
        interval: Duration,
        targets: Vec<Decimal>,
    ) -> Self {
        Self {
            ledger,
            executor,
            interval,
            targets,
            last_rebalance: Instant::now(),
        }
    }

    pub fn from_config(
        ledger: Arc<dyn LedgerReader>,
        executor: Arc<dyn Executor>,
        cfg: &RebalanceConfig,
    ) -> Self {
        Self::new(ledger, executor, cfg.interval(), cfg.targets.clone())
    }

    pub fn last_rebalance(&self) -> Instant {
        self.last_rebalance
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.last_rebalance + self.interval
    }

    /// Rebalance `account` if the interval has elapsed. Returns `None` when
    /// skipped. Errors end the affected pass only.
    #[instrument(skip_all, fields(account = %account.key))]
    pub async fn maybe_rebalance(
        &mut self,
        group: &Group,
        prices: &PriceSnapshot,
        account: &MarginAccount,
    ) -> Option<RebalanceReport> {
        if !self.is_due(Instant::now()) {
            return None;
        }

        let mut report = RebalanceReport::default();
        let diffs = compute_diffs(account, group, prices, &self.targets);

        if tokens_unbalanced(&diffs, group) {
            if let Err(e) = self.balance_tokens(group, account.key, &mut report).await {
                warn!(error = %e, "Error rebalancing tokens");
            }
        }

        if positions_unbalanced(account, group) {
            if let Err(e) = self.close_positions(group, account.key, &mut report).await {
                warn!(error = %e, "Error closing positions");
            }
        }

        self.last_rebalance = Instant::now();
        Some(report)
    }

    async fn submit(&self, action: Action, report: &mut RebalanceReport) -> bool {
        let kind = action.kind();
        match self.executor.submit(action).await {
            Ok(signature) => {
                debug!(kind, %signature, "Rebalance action submitted");
                true
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(kind, error = %e, "Rebalance action failed");
                } else {
                    error!(kind, error = %e, "Rebalance action rejected");
                }
                report.failures += 1;
                false
            }
        }
    }

    async fn balance_tokens(
        &self,
        group: &Group,
        owner: AccountKey,
        report: &mut RebalanceReport,
    ) -> Result<()> {
        info!("Balancing tokens");
        let account = self.ledger.load_account(owner).await?;
        let (_, prices) = self.ledger.load_group_and_prices().await?;

        for market_index in group.spot_market_indices() {
            let orders = self.ledger.load_resting_spot_orders(&account, market_index).await?;
            for order in orders {
                let cancelled = self
                    .submit(
                        Action::CancelSpotOrder {
                            owner,
                            market_index,
                            order_id: order.order_id,
                        },
                        report,
                    )
                    .await;
                if cancelled {
                    report.orders_cancelled += 1;
                }
            }
        }

        let account = self.ledger.load_account(owner).await?;
        for market_index in group.spot_market_indices() {
            let settleable = account
                .open_orders_state(market_index)
                .is_some_and(|oo| oo.has_settleable_funds());
            if settleable
                && self
                    .submit(Action::SettleFunds { owner, market_index }, report)
                    .await
            {
                report.settlements += 1;
            }
        }

        let account = self.ledger.load_account(owner).await?;
        let diffs = compute_diffs(&account, group, &prices, &self.targets);
        for d in plan_token_orders(&diffs, group) {
            let Some(market) = group.spot_market(d.index) else {
                continue;
            };
            let side = if d.value > Decimal::ZERO {
                Side::Sell
            } else {
                Side::Buy
            };
            let price = fee_adjusted(prices.price(d.index), market.liquidation_fee, side);
            let size = d.diff.abs();
            info!(
                market_index = d.index,
                %side,
                size = %size,
                price = %price,
                "Placing rebalance order"
            );
            let placed = self
                .submit(
                    Action::PlaceSpotOrder {
                        owner,
                        market_index: d.index,
                        side,
                        price,
                        size,
                        order_type: OrderType::Limit,
                    },
                    report,
                )
                .await;
            if !placed {
                continue;
            }
            report.orders_placed += 1;
            if self
                .submit(
                    Action::SettleFunds {
                        owner,
                        market_index: d.index,
                    },
                    report,
                )
                .await
            {
                report.settlements += 1;
            }
        }
        Ok(())
    }

    async fn close_positions(
        &self,
        group: &Group,
        owner: AccountKey,
        report: &mut RebalanceReport,
    ) -> Result<()> {
        info!("Closing perp positions");
        let account = self.ledger.load_account(owner).await?;
        let (_, prices) = self.ledger.load_group_and_prices().await?;
        let markets: Vec<usize> = perp_markets_to_close(&account, group).collect();

        for market_index in markets {
            let Some(market) = group.perp_market(market_index) else {
                continue;
            };
            let base_position = account
                .perp_position(market_index)
                .map(|p| p.base_position)
                .unwrap_or_default();

            let orders = self.ledger.load_resting_perp_orders(&account, market_index).await?;
            for order in orders {
                if self
                    .submit(
                        Action::CancelPerpOrder {
                            owner,
                            market_index,
                            order_id: order.order_id,
                        },
                        report,
                    )
                    .await
                {
                    report.orders_cancelled += 1;
                }
            }

            if base_position != 0 {
                let side = if base_position > 0 {
                    Side::Sell
                } else {
                    Side::Buy
                };
                let price = fee_adjusted(prices.price(market_index), market.liquidation_fee, side);
                let size = Decimal::from(base_position.unsigned_abs()) * market.base_lot_size;
                info!(
                    market_index,
                    %side,
                    size = %size,
                    price = %price,
                    "Flattening perp position"
                );
                if self
                    .submit(
                        Action::PlacePerpOrder {
                            owner,
                            market_index,
                            side,
                            price,
                            size,
                            order_type: OrderType::ImmediateOrCancel,
                            reduce_only: true,
                        },
                        report,
                    )
                    .await
                {
                    report.orders_placed += 1;
                }
            }

            let reloaded = self.ledger.load_account(owner).await?;
            let quote = reloaded
                .perp_position(market_index)
                .map(|p| p.quote_position)
                .unwrap_or_default();
            if quote > Decimal::ZERO
                && self
                    .submit(Action::SettlePnl { owner, market_index }, report)
                    .await
            {
                report.settlements += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, group, prices, FakeVenue};
    use margin_liquidator_chain::{OpenOrdersState, PerpPosition, RestingOrder};
    use rust_decimal_macros::dec;

    fn unit_prices() -> PriceSnapshot {
        let mut prices = prices();
        prices.prices = vec![Decimal::ONE; 3];
        prices
    }

    fn unit_size_group() -> Group {
        let mut group = group();
        for market in group.spot_markets.iter_mut().flatten() {
            market.min_order_size = Decimal::ONE;
        }
        group
    }

    fn rebalancer(venue: &Arc<FakeVenue>, interval: Duration, targets: Vec<Decimal>) -> Rebalancer {
        Rebalancer::new(venue.clone(), venue.clone(), interval, targets)
    }

    #[test]
    fn test_plan_orders_by_absolute_value() {
        let group = unit_size_group();
        let mut acc = account(1);
        acc.deposits[0] = dec!(12);
        acc.borrows[1] = dec!(3);
        let diffs = compute_diffs(&acc, &group, &unit_prices(), &[dec!(10), dec!(0), dec!(0)]);
        assert_eq!(diffs.iter().map(|d| d.diff).collect::<Vec<_>>(), vec![dec!(2), dec!(-3)]);

        let plan = plan_token_orders(&diffs, &group);
        assert_eq!(plan.iter().map(|d| d.index).collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn test_small_diffs_are_ignored() {
        let group = unit_size_group();
        let mut acc = account(1);
        acc.deposits[0] = dec!(10.5);
        let diffs = compute_diffs(&acc, &group, &unit_prices(), &[dec!(10)]);
        assert!(!tokens_unbalanced(&diffs, &group));
        assert!(plan_token_orders(&diffs, &group).is_empty());
    }

    #[tokio::test]
    async fn test_token_pass_places_largest_first() {
        let group = unit_size_group();
        let venue = FakeVenue::new(group.clone(), unit_prices());
        let mut acc = account(1);
        acc.deposits[0] = dec!(12);
        acc.borrows[1] = dec!(3);
        venue.insert(acc.clone());

        let mut rb = rebalancer(&venue, Duration::ZERO, vec![dec!(10), dec!(0), dec!(0)]);
        let report = rb.maybe_rebalance(&group, &unit_prices(), &acc).await.unwrap();
        assert_eq!(report.orders_placed, 2);
        assert_eq!(report.failures, 0);
        assert_eq!(
            venue.submitted(),
            vec![
                Action::PlaceSpotOrder {
                    owner: acc.key,
                    market_index: 1,
                    side: Side::Buy,
                    price: dec!(1.05),
                    size: dec!(3),
                    order_type: OrderType::Limit,
                },
                Action::SettleFunds { owner: acc.key, market_index: 1 },
                Action::PlaceSpotOrder {
                    owner: acc.key,
                    market_index: 0,
                    side: Side::Sell,
                    price: dec!(0.95),
                    size: dec!(2),
                    order_type: OrderType::Limit,
                },
                Action::SettleFunds { owner: acc.key, market_index: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_cancels_and_settles_before_ordering() {
        let group = unit_size_group();
        let venue = FakeVenue::new(group.clone(), unit_prices());
        let mut acc = account(1);
        acc.deposits[0] = dec!(5);
        acc.set_open_orders(
            0,
            OpenOrdersState {
                base_total: dec!(1),
                ..Default::default()
            },
        );
        venue.insert(acc.clone());
        venue.add_resting_spot(RestingOrder {
            owner: acc.key,
            market_index: 0,
            order_id: 7,
            side: Side::Sell,
            price: dec!(1),
            size: dec!(1),
        });

        let mut rb = rebalancer(&venue, Duration::ZERO, vec![]);
        rb.maybe_rebalance(&group, &unit_prices(), &acc).await.unwrap();
        assert_eq!(
            venue.kinds(),
            vec!["cancel_spot_order", "settle_funds", "place_spot_order", "settle_funds"]
        );
    }

    #[tokio::test]
    async fn test_skipped_until_interval_elapses() {
        let group = unit_size_group();
        let venue = FakeVenue::new(group.clone(), unit_prices());
        let mut acc = account(1);
        acc.deposits[0] = dec!(1000);
        venue.insert(acc.clone());

        let mut rb = rebalancer(&venue, Duration::from_secs(3600), vec![]);
        assert!(rb.maybe_rebalance(&group, &unit_prices(), &acc).await.is_none());
        assert!(venue.submitted().is_empty());

        let start = rb.last_rebalance();
        assert!(!rb.is_due(start + Duration::from_secs(3599)));
        assert!(rb.is_due(start + Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_stamps_after_every_run() {
        let group = unit_size_group();
        let venue = FakeVenue::new(group.clone(), unit_prices());
        let acc = account(1);
        venue.insert(acc.clone());

        let mut rb = rebalancer(&venue, Duration::ZERO, vec![]);
        let before = rb.last_rebalance();
        let report = rb.maybe_rebalance(&group, &unit_prices(), &acc).await;
        assert_eq!(report, Some(RebalanceReport::default()));
        assert!(rb.last_rebalance() >= before);
    }

    #[tokio::test]
    async fn test_failure_on_one_asset_does_not_stop_others() {
        let group = unit_size_group();
        let venue = FakeVenue::new(group.clone(), unit_prices());
        let mut acc = account(1);
        acc.deposits[0] = dec!(5);
        acc.deposits[1] = dec!(3);
        venue.insert(acc.clone());
        venue.fail(
            "place_spot_order",
            margin_liquidator_chain::ExecError::Rejected("book closed".into()),
        );

        let mut rb = rebalancer(&venue, Duration::ZERO, vec![]);
        let report = rb.maybe_rebalance(&group, &unit_prices(), &acc).await.unwrap();
        assert_eq!(report.failures, 2);
        assert_eq!(venue.kinds(), vec!["place_spot_order", "place_spot_order"]);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_pass_only() {
        let group = unit_size_group();
        let venue = FakeVenue::new(group.clone(), unit_prices());
        let mut acc = account(1);
        acc.deposits[0] = dec!(5);
        venue.fail_loads(true);

        let mut rb = rebalancer(&venue, Duration::ZERO, vec![]);
        let report = rb.maybe_rebalance(&group, &unit_prices(), &acc).await;
        assert_eq!(report, Some(RebalanceReport::default()));
        assert!(venue.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_perp_pass_flattens_and_settles() {
        let group = group();
        let venue = FakeVenue::new(group.clone(), prices());
        let mut acc = account(1);
        acc.perp_positions = vec![
            PerpPosition::default(),
            PerpPosition {
                base_position: 10_000,
                quote_position: dec!(-1900),
                ..Default::default()
            },
        ];
        venue.insert(acc.clone());
        venue.add_resting_perp(RestingOrder {
            owner: acc.key,
            market_index: 1,
            order_id: 3,
            side: Side::Buy,
            price: dec!(1900),
            size: dec!(1),
        });
        venue.on_submit(|action, accounts| {
            if let Action::PlacePerpOrder { owner, market_index, .. } = action {
                if let Some(a) = accounts.get_mut(owner) {
                    a.perp_positions[*market_index].base_position = 0;
                    a.perp_positions[*market_index].quote_position = dec!(50);
                }
            }
            Ok(())
        });

        let mut rb = rebalancer(&venue, Duration::ZERO, vec![]);
        rb.maybe_rebalance(&group, &prices(), &acc).await.unwrap();
        let submitted = venue.submitted();
        assert_eq!(
            venue.kinds(),
            vec!["cancel_perp_order", "place_perp_order", "settle_pnl"]
        );
        assert_eq!(
            submitted[1],
            Action::PlacePerpOrder {
                owner: acc.key,
                market_index: 1,
                side: Side::Sell,
                price: dec!(1950),
                size: dec!(1),
                order_type: OrderType::ImmediateOrCancel,
                reduce_only: true,
            }
        );
    }
}
