//! Account health evaluation.
//!
//! Pure functions over an account, the group configuration and one price
//! snapshot. Safe to call any number of times per cycle.

use std::fmt::Write as _;

use rust_decimal::Decimal;

use margin_liquidator_chain::{
    Group, MarginAccount, PerpPosition, PriceSnapshot, Strictness,
};

/// Weighted health contributions of an account.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthComponents {
    /// Weighted value per token index; the quote entry is always zero.
    pub spot: Vec<Decimal>,
    /// Weighted value per perp market index.
    pub perps: Vec<Decimal>,
    /// Quote balance including quote held in open orders.
    pub quote: Decimal,
    /// Sum of positive contributions.
    pub assets: Decimal,
    /// Sum of negated negative contributions.
    pub liabs: Decimal,
}

impl HealthComponents {
    /// Aggregate health.
    pub fn health(&self) -> Decimal {
        self.quote + self.spot.iter().sum::<Decimal>() + self.perps.iter().sum::<Decimal>()
    }

    /// Quote plus token contributions.
    pub fn spot_health(&self) -> Decimal {
        self.quote + self.spot.iter().sum::<Decimal>()
    }

    /// Quote plus perp contributions.
    pub fn perp_health(&self) -> Decimal {
        self.quote + self.perps.iter().sum::<Decimal>()
    }

    /// `(assets / liabs - 1) * 100`, or 100 without liabilities.
    /// Saturates at `Decimal::MAX` when the quotient overflows.
    pub fn health_ratio(&self) -> Decimal {
        if self.liabs <= Decimal::ZERO {
            return Decimal::ONE_HUNDRED;
        }
        self.assets
            .checked_div(self.liabs)
            .and_then(|r| (r - Decimal::ONE).checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::MAX)
    }
}

/// Solvency class of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solvency {
    Healthy,
    /// Maintenance health is negative.
    Liquidatable,
    /// Negative equity with nothing left to seize, or flagged by the ledger.
    Bankrupt,
}

/// Token balance including base held in open orders.
fn spot_net_with_orders(account: &MarginAccount, index: usize) -> Decimal {
    let in_orders = account
        .open_orders_state(index)
        .map(|oo| oo.base_total)
        .unwrap_or_default();
    account.net(index) + in_orders
}

/// Quote position after unsettled funding.
pub fn perp_quote_position(position: &PerpPosition, prices: &PriceSnapshot, market_index: usize) -> Decimal {
    let funding = prices.funding(market_index);
    let base = Decimal::from(position.base_position);
    if position.base_position > 0 {
        position.quote_position - (funding.long_funding - position.long_settled_funding) * base
    } else if position.base_position < 0 {
        position.quote_position - (funding.short_funding - position.short_settled_funding) * base
    } else {
        position.quote_position
    }
}

/// Unweighted value of the base position in quote units.
pub fn perp_base_value(group: &Group, prices: &PriceSnapshot, market_index: usize, base_lots: i64) -> Decimal {
    let lot = group
        .perp_market(market_index)
        .map(|m| m.base_lot_size)
        .unwrap_or_default();
    Decimal::from(base_lots) * lot * prices.price(market_index)
}

/// Health contribution of one perp market, quote token excluded.
pub fn perp_market_health(
    account: &MarginAccount,
    group: &Group,
    prices: &PriceSnapshot,
    market_index: usize,
    strictness: Strictness,
) -> Decimal {
    let (Some(market), Some(position)) = (
        group.perp_market(market_index),
        account.perp_position(market_index),
    ) else {
        return Decimal::ZERO;
    };
    let base_value = perp_base_value(group, prices, market_index, position.base_position);
    let weight = market.weights.weight_for(base_value, strictness);
    base_value * weight + perp_quote_position(position, prices, market_index)
}

/// Evaluate an account at the given strictness.
pub fn evaluate(
    account: &MarginAccount,
    group: &Group,
    prices: &PriceSnapshot,
    strictness: Strictness,
) -> HealthComponents {
    let quote_index = group.quote_index();
    let mut spot = vec![Decimal::ZERO; group.num_tokens()];
    let mut quote = account.net(quote_index);

    for (i, oo) in account.open_orders.iter().enumerate() {
        if let Some(oo) = oo {
            if i != quote_index {
                quote += oo.quote_total + oo.referrer_rebates_accrued;
            }
        }
    }

    for (i, slot) in spot.iter_mut().enumerate() {
        if i == quote_index {
            continue;
        }
        let value = spot_net_with_orders(account, i) * prices.price(i);
        *slot = value * group.token_weights(i).weight_for(value, strictness);
    }

    let perps: Vec<Decimal> = (0..group.perp_markets.len())
        .map(|m| perp_market_health(account, group, prices, m, strictness))
        .collect();

    let (mut assets, mut liabs) = (Decimal::ZERO, Decimal::ZERO);
    for value in spot.iter().chain(perps.iter()).chain(std::iter::once(&quote)) {
        if *value > Decimal::ZERO {
            assets += *value;
        } else {
            liabs -= *value;
        }
    }

    HealthComponents {
        spot,
        perps,
        quote,
        assets,
        liabs,
    }
}

/// Health at the given strictness.
pub fn health(
    account: &MarginAccount,
    group: &Group,
    prices: &PriceSnapshot,
    strictness: Strictness,
) -> Decimal {
    evaluate(account, group, prices, strictness).health()
}

/// Maintenance health is negative.
pub fn is_liquidatable(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> bool {
    health(account, group, prices, Strictness::Maint) < Decimal::ZERO
}

/// Unweighted net value in quote units.
pub fn equity(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> Decimal {
    let quote_index = group.quote_index();
    let mut total = Decimal::ZERO;
    for i in 0..group.num_tokens() {
        if i == quote_index {
            total += account.net(i);
        } else {
            total += spot_net_with_orders(account, i) * prices.price(i);
        }
    }
    for oo in account.open_orders.iter().flatten() {
        total += oo.quote_total + oo.referrer_rebates_accrued;
    }
    for (m, position) in account.perp_positions.iter().enumerate() {
        if group.perp_market(m).is_none() {
            continue;
        }
        total += perp_base_value(group, prices, m, position.base_position)
            + perp_quote_position(position, prices, m);
    }
    total
}

/// Whether the account holds anything a liquidator could take.
pub fn has_collateral(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> bool {
    let tokens = (0..group.num_tokens()).any(|i| spot_net_with_orders(account, i) > Decimal::ZERO);
    let orders = account
        .open_orders
        .iter()
        .flatten()
        .any(|oo| oo.quote_total + oo.referrer_rebates_accrued > Decimal::ZERO);
    let perps = account.perp_positions.iter().enumerate().any(|(m, p)| {
        group.perp_market(m).is_some()
            && perp_base_value(group, prices, m, p.base_position) + perp_quote_position(p, prices, m)
                > Decimal::ZERO
    });
    tokens || orders || perps
}

/// Flagged by the ledger, or negative equity with no collateral left.
pub fn is_bankrupt(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> bool {
    account.bankrupt
        || (equity(account, group, prices) < Decimal::ZERO
            && !has_collateral(account, group, prices))
}

/// Classify an account.
pub fn classify(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> Solvency {
    if is_bankrupt(account, group, prices) {
        Solvency::Bankrupt
    } else if is_liquidatable(account, group, prices) {
        Solvency::Liquidatable
    } else {
        Solvency::Healthy
    }
}

/// Multi-line human-readable summary of balances and positions.
pub fn describe(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> String {
    let maint = evaluate(account, group, prices, Strictness::Maint);
    let mut out = String::new();
    let _ = writeln!(out, "Account {} (owner {})", account.key, account.owner);
    let _ = writeln!(
        out,
        "Maint health: {} | ratio: {}% | equity: {}",
        maint.health().round_dp(4),
        maint.health_ratio().round_dp(4),
        equity(account, group, prices).round_dp(4)
    );
    for (i, token) in group.tokens.iter().enumerate() {
        let net = account.net(i);
        if net.is_zero() {
            continue;
        }
        let _ = writeln!(
            out,
            "{}: {} (value {})",
            token.symbol,
            net.normalize(),
            (net * prices.price(i)).round_dp(4)
        );
    }
    for (m, position) in account.perp_positions.iter().enumerate() {
        if position.is_flat() || group.perp_market(m).is_none() {
            continue;
        }
        let symbol = group.tokens.get(m).map(|t| t.symbol.as_str()).unwrap_or("?");
        let _ = writeln!(
            out,
            "{}-PERP: base {} lots, quote {}",
            symbol,
            position.base_position,
            perp_quote_position(position, prices, m).round_dp(4)
        );
    }
    if account.being_liquidated {
        let _ = writeln!(out, "Being liquidated");
    }
    out.trim_end().to_string()
}
