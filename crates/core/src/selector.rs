//! Liquidation target selection and transfer sizing.
//!
//! Leg selection works on net token values in quote units. Every transfer
//! kind is described by a [`LiquidationPair`] and sized by
//! [`size_transfer`], which caps the amount by the liquidator's own init
//! health scaled by the safety factor.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use margin_liquidator_chain::{Group, MarginAccount, PriceSnapshot, Strictness};

use crate::health::perp_market_health;

/// Why a transfer could not be sized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizingError {
    #[error("liquidator init health {0} leaves no capacity")]
    NoCapacity(Decimal),

    #[error("asset and liability weights cancel out")]
    DegenerateWeights,

    #[error("no price for index {0}")]
    ZeroPrice(usize),

    #[error("perp market {0} is not registered")]
    UnknownMarket(usize),

    #[error("transfer size overflowed")]
    Overflow,
}

/// Chosen asset and liability legs over token net values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegSelection {
    /// Most negative token, if any token is negative.
    pub liab: Option<usize>,
    /// Most positive token. The quote token after a collision or when no
    /// token is positive.
    pub asset: Option<usize>,
    /// Value of the asset leg before any substitution.
    pub asset_value: Decimal,
    /// The asset leg was replaced by the quote token because both legs
    /// landed on the same index. The quote leg is not re-checked.
    pub substituted_quote: bool,
}

impl LegSelection {
    /// Whether a token-for-token transfer can use the asset leg.
    pub fn asset_usable(&self) -> bool {
        self.asset.is_some() && (self.substituted_quote || self.asset_value > Decimal::ZERO)
    }
}

/// Net value of every token in quote units.
pub fn net_values(account: &MarginAccount, group: &Group, prices: &PriceSnapshot) -> Vec<Decimal> {
    (0..group.num_tokens())
        .map(|i| account.net(i) * prices.price(i))
        .collect()
}

/// Pick the most negative value as the liability leg and the most positive
/// as the asset leg. Ties resolve to the first index.
pub fn select_legs(values: &[Decimal], quote_index: usize) -> LegSelection {
    let mut min: Option<(usize, Decimal)> = None;
    let mut max: Option<(usize, Decimal)> = None;
    for (i, &v) in values.iter().enumerate() {
        if min.map_or(true, |(_, m)| v < m) {
            min = Some((i, v));
        }
        if max.map_or(true, |(_, m)| v > m) {
            max = Some((i, v));
        }
    }

    let liab = min.filter(|(_, v)| *v < Decimal::ZERO).map(|(i, _)| i);
    let (mut asset, asset_value) = match max {
        Some((i, v)) => (Some(i), v),
        None => (None, Decimal::ZERO),
    };

    let substituted_quote = liab.is_some() && liab == asset;
    if substituted_quote || asset_value <= Decimal::ZERO {
        asset = asset.map(|_| quote_index);
    }

    LegSelection {
        liab,
        asset,
        asset_value,
        substituted_quote,
    }
}

/// Token with the largest positive value, defaulting to the quote token.
pub fn largest_asset_token(values: &[Decimal], quote_index: usize) -> usize {
    let mut best = (quote_index, Decimal::ZERO);
    for (i, &v) in values.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// Perp market with the lowest maint health contribution. First on ties.
pub fn lowest_perp_market(
    account: &MarginAccount,
    group: &Group,
    prices: &PriceSnapshot,
) -> Option<(usize, Decimal)> {
    let mut lowest: Option<(usize, Decimal)> = None;
    for m in group.perp_market_indices() {
        let h = perp_market_health(account, group, prices, m, Strictness::Maint);
        if lowest.map_or(true, |(_, l)| h < l) {
            lowest = Some((m, h));
        }
    }
    lowest
}

/// Perp market with the highest maint health contribution. First on ties.
pub fn highest_perp_market(
    account: &MarginAccount,
    group: &Group,
    prices: &PriceSnapshot,
) -> Option<(usize, Decimal)> {
    let mut highest: Option<(usize, Decimal)> = None;
    for m in group.perp_market_indices() {
        let h = perp_market_health(account, group, prices, m, Strictness::Maint);
        if highest.map_or(true, |(_, b)| h > b) {
            highest = Some((m, h));
        }
    }
    highest
}

/// A liability transfer, by liability kind and asset kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationPair {
    /// Token liability against a token asset.
    TokenToken { liab: usize, asset: usize },
    /// Token liability against perp quote. `weight_token` scales the size
    /// by its init asset weight; none or the quote token leaves it unscaled.
    TokenPerp {
        liab: usize,
        asset_market: usize,
        weight_token: Option<usize>,
    },
    /// Perp quote liability against a token asset.
    PerpToken { liab_market: usize, asset: usize },
    /// Base lots of a perp position.
    PerpBase { market: usize, base_position: i64 },
    /// Residual token liability of a bankrupt account, against quote.
    TokenBankruptcy { liab: usize },
    /// Residual perp quote liability of a bankrupt account.
    PerpBankruptcy { market: usize },
}

/// Sized transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSize {
    /// Maximum liability to take over, in liability units.
    Amount(Decimal),
    /// Signed base lots to take over.
    BaseLots(i64),
}

impl TransferSize {
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Self::Amount(a) => Some(*a),
            Self::BaseLots(_) => None,
        }
    }

    pub fn base_lots(&self) -> Option<i64> {
        match self {
            Self::BaseLots(l) => Some(*l),
            Self::Amount(_) => None,
        }
    }
}

fn checked_div(numerator: Decimal, denominator: Decimal) -> Result<Decimal, SizingError> {
    if denominator.is_zero() {
        return Err(SizingError::DegenerateWeights);
    }
    numerator
        .checked_div(denominator)
        .ok_or(SizingError::Overflow)
}

/// Capacity divided by `1 - initAssetWeight` of a token, or unscaled for the
/// quote token and when no token is given.
fn scaled_by_asset_weight(
    group: &Group,
    capacity: Decimal,
    token: Option<usize>,
) -> Result<Decimal, SizingError> {
    match token {
        Some(t) if t != group.quote_index() => {
            let w = group.token_weights(t).asset_weight(Strictness::Init);
            checked_div(capacity, Decimal::ONE - w)
        }
        _ => Ok(capacity),
    }
}

/// Size a transfer from the liquidator's init health.
///
/// Fails when the liquidator has no positive init health, so a transfer is
/// never sized that would push it below zero.
pub fn size_transfer(
    pair: LiquidationPair,
    group: &Group,
    prices: &PriceSnapshot,
    liqor_init_health: Decimal,
    safety_factor: Decimal,
) -> Result<TransferSize, SizingError> {
    if liqor_init_health <= Decimal::ZERO {
        return Err(SizingError::NoCapacity(liqor_init_health));
    }
    let capacity = liqor_init_health;

    match pair {
        LiquidationPair::TokenToken { liab, asset } => {
            token_transfer(group, prices, capacity, liab, asset, safety_factor)
        }
        LiquidationPair::TokenBankruptcy { liab } => token_transfer(
            group,
            prices,
            capacity,
            liab,
            group.quote_index(),
            safety_factor,
        ),
        LiquidationPair::TokenPerp { weight_token, .. } => {
            let amount = scaled_by_asset_weight(group, capacity, weight_token)?;
            Ok(TransferSize::Amount(amount * safety_factor))
        }
        LiquidationPair::PerpToken { asset, .. } => {
            let amount = scaled_by_asset_weight(group, capacity, Some(asset))?;
            Ok(TransferSize::Amount(amount * safety_factor))
        }
        LiquidationPair::PerpBankruptcy { .. } => Ok(TransferSize::Amount(capacity * safety_factor)),
        LiquidationPair::PerpBase {
            market,
            base_position,
        } => {
            let info = group
                .perp_market(market)
                .ok_or(SizingError::UnknownMarket(market))?;
            let price = prices.price(market);
            if price.is_zero() {
                return Err(SizingError::ZeroPrice(market));
            }
            let (divisor, sign) = if base_position > 0 {
                (Decimal::ONE - info.weights.init_asset_weight, Decimal::ONE)
            } else {
                (info.weights.init_liab_weight - Decimal::ONE, Decimal::NEGATIVE_ONE)
            };
            let quote_value = checked_div(capacity, divisor)?;
            let lots = checked_div(checked_div(quote_value, price)?, info.base_lot_size)?.floor();
            let scaled = (lots * safety_factor).trunc() * sign;
            let lots = scaled.to_i64().ok_or(SizingError::Overflow)?;
            Ok(TransferSize::BaseLots(lots))
        }
    }
}

fn token_transfer(
    group: &Group,
    prices: &PriceSnapshot,
    capacity: Decimal,
    liab: usize,
    asset: usize,
    safety_factor: Decimal,
) -> Result<TransferSize, SizingError> {
    let price = prices.price(liab);
    if price.is_zero() {
        return Err(SizingError::ZeroPrice(liab));
    }
    let liab_weight = group.token_weights(liab).liab_weight(Strictness::Init);
    let asset_weight = group.token_weights(asset).asset_weight(Strictness::Init);
    let spread = (liab_weight - asset_weight).abs();
    let amount = checked_div(capacity, price * spread)?;
    Ok(TransferSize::Amount(amount * safety_factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, group, prices};
    use margin_liquidator_chain::PerpPosition;
    use rust_decimal_macros::dec;

    #[test]
    fn test_select_unique_min_and_max() {
        let legs = select_legs(&[dec!(5), dec!(-7), dec!(2), dec!(-1)], 3);
        assert_eq!(legs.liab, Some(1));
        assert_eq!(legs.asset, Some(0));
        assert!(legs.asset_usable());
        assert!(!legs.substituted_quote);
    }

    #[test]
    fn test_ties_resolve_to_first_index() {
        let legs = select_legs(&[dec!(-3), dec!(4), dec!(-3), dec!(4)], 3);
        assert_eq!(legs.liab, Some(0));
        assert_eq!(legs.asset, Some(1));
    }

    #[test]
    fn test_no_negative_value_means_no_liab_leg() {
        let legs = select_legs(&[dec!(0), dec!(3), dec!(0)], 2);
        assert_eq!(legs.liab, None);
        assert_eq!(legs.asset, Some(1));
    }

    #[test]
    fn test_all_negative_asset_leg_not_usable() {
        let legs = select_legs(&[dec!(-1), dec!(-5), dec!(-2)], 2);
        assert_eq!(legs.liab, Some(1));
        assert_eq!(legs.asset, Some(2));
        assert!(!legs.asset_usable());
    }

    #[test]
    fn test_no_positive_value_falls_back_to_quote() {
        let legs = select_legs(&[dec!(0), dec!(-5), dec!(0)], 2);
        assert_eq!(legs.liab, Some(1));
        assert_eq!(legs.asset, Some(2));
        assert!(!legs.substituted_quote);
        assert!(!legs.asset_usable());
    }

    #[test]
    fn test_collision_substitutes_quote_without_revalidation() {
        // Every token equally negative: both legs land on index 0 and the
        // asset leg becomes the quote token even though it is negative too.
        let legs = select_legs(&[dec!(-4), dec!(-4), dec!(-4)], 2);
        assert_eq!(legs.liab, Some(0));
        assert_eq!(legs.asset, Some(2));
        assert!(legs.substituted_quote);
        assert!(legs.asset_usable());
    }

    #[test]
    fn test_largest_asset_token_defaults_to_quote() {
        assert_eq!(largest_asset_token(&[dec!(-1), dec!(0), dec!(0)], 2), 2);
        assert_eq!(largest_asset_token(&[dec!(3), dec!(9), dec!(5)], 2), 1);
    }

    #[test]
    fn test_largest_asset_token_compares_quote() {
        assert_eq!(largest_asset_token(&[dec!(40), dec!(0), dec!(1000)], 2), 2);
        // Strict comparison: an equal quote balance keeps the earlier token
        assert_eq!(largest_asset_token(&[dec!(50), dec!(0), dec!(50)], 2), 0);
    }

    #[test]
    fn test_token_transfer_formula() {
        let group = group();
        let prices = prices();
        // ETH liab (init liab 1.2) vs BTC asset (init asset 0.8): spread 0.4
        let size = size_transfer(
            LiquidationPair::TokenToken { liab: 1, asset: 0 },
            &group,
            &prices,
            dec!(800),
            dec!(0.9),
        )
        .unwrap();
        // 800 / (2000 * 0.4) * 0.9
        assert_eq!(size, TransferSize::Amount(dec!(0.9)));
    }

    #[test]
    fn test_sizing_monotonic() {
        let group = group();
        let prices = prices();
        let pair = LiquidationPair::TokenToken { liab: 1, asset: 2 };
        let mut last = Decimal::ZERO;
        for health in [dec!(1), dec!(10), dec!(100), dec!(1000)] {
            let a = size_transfer(pair, &group, &prices, health, dec!(0.9))
                .unwrap()
                .amount()
                .unwrap();
            assert!(a > last);
            last = a;
        }
        let mut last = Decimal::ZERO;
        for factor in [dec!(0.1), dec!(0.5), dec!(0.9), dec!(1)] {
            let a = size_transfer(pair, &group, &prices, dec!(100), factor)
                .unwrap()
                .amount()
                .unwrap();
            assert!(a > last);
            last = a;
        }
    }

    #[test]
    fn test_unit_spread_bounded_by_capacity() {
        let mut group = group();
        // Liability weight 2 against the quote token: spread exactly 1
        if let Some(Some(m)) = group.spot_markets.get_mut(1) {
            m.weights.init_liab_weight = dec!(2);
        }
        let mut prices = prices();
        prices.prices[1] = Decimal::ONE;
        let size = size_transfer(
            LiquidationPair::TokenToken { liab: 1, asset: 2 },
            &group,
            &prices,
            dec!(250),
            dec!(0.9),
        )
        .unwrap();
        assert!(size.amount().unwrap() <= dec!(250) * dec!(0.9));
    }

    #[test]
    fn test_no_capacity_is_an_error() {
        let group = group();
        let prices = prices();
        let pair = LiquidationPair::TokenToken { liab: 1, asset: 0 };
        assert_eq!(
            size_transfer(pair, &group, &prices, Decimal::ZERO, dec!(0.9)),
            Err(SizingError::NoCapacity(Decimal::ZERO))
        );
        assert!(size_transfer(pair, &group, &prices, dec!(-5), dec!(0.9)).is_err());
    }

    #[test]
    fn test_equal_weights_are_degenerate() {
        let group = group();
        let prices = prices();
        // Quote against quote: both weights are 1
        let pair = LiquidationPair::TokenToken { liab: 2, asset: 2 };
        assert_eq!(
            size_transfer(pair, &group, &prices, dec!(10), dec!(0.9)),
            Err(SizingError::DegenerateWeights)
        );
    }

    #[test]
    fn test_token_perp_scaling() {
        let group = group();
        let prices = prices();
        let scaled = size_transfer(
            LiquidationPair::TokenPerp {
                liab: 1,
                asset_market: 0,
                weight_token: Some(0),
            },
            &group,
            &prices,
            dec!(100),
            dec!(0.9),
        )
        .unwrap();
        // 100 / (1 - 0.8) * 0.9
        assert_eq!(scaled, TransferSize::Amount(dec!(450)));

        let unscaled = size_transfer(
            LiquidationPair::TokenPerp {
                liab: 1,
                asset_market: 0,
                weight_token: Some(2),
            },
            &group,
            &prices,
            dec!(100),
            dec!(0.9),
        )
        .unwrap();
        assert_eq!(unscaled, TransferSize::Amount(dec!(90)));
    }

    #[test]
    fn test_perp_base_lots_signed() {
        let group = group();
        let prices = prices();
        // Long ETH perp: 100 / 0.1 / 2000 / 0.0001 = 5000 lots, * 0.9
        let long = size_transfer(
            LiquidationPair::PerpBase {
                market: 1,
                base_position: 20_000,
            },
            &group,
            &prices,
            dec!(100),
            dec!(0.9),
        )
        .unwrap();
        assert_eq!(long, TransferSize::BaseLots(4500));

        let short = size_transfer(
            LiquidationPair::PerpBase {
                market: 1,
                base_position: -20_000,
            },
            &group,
            &prices,
            dec!(100),
            dec!(0.9),
        )
        .unwrap();
        assert_eq!(short, TransferSize::BaseLots(-4500));
    }

    #[test]
    fn test_perp_base_truncates() {
        let group = group();
        let prices = prices();
        // 1 / 0.1 / 40000 / 0.0001 = 2.5 -> 2 lots, * 0.9 -> 1
        let size = size_transfer(
            LiquidationPair::PerpBase {
                market: 0,
                base_position: 7,
            },
            &group,
            &prices,
            dec!(1),
            dec!(0.9),
        )
        .unwrap();
        assert_eq!(size, TransferSize::BaseLots(1));
    }

    #[test]
    fn test_perp_market_selection() {
        let group = group();
        let prices = prices();
        let mut acc = account(1);
        acc.perp_positions = vec![
            PerpPosition {
                quote_position: dec!(-50),
                ..Default::default()
            },
            PerpPosition {
                quote_position: dec!(30),
                ..Default::default()
            },
        ];
        assert_eq!(lowest_perp_market(&acc, &group, &prices), Some((0, dec!(-50))));
        assert_eq!(highest_perp_market(&acc, &group, &prices), Some((1, dec!(30))));

        // Equal health: first market wins both ways
        let flat = account(2);
        assert_eq!(lowest_perp_market(&flat, &group, &prices).map(|m| m.0), Some(0));
        assert_eq!(highest_perp_market(&flat, &group, &prices).map(|m| m.0), Some(0));
    }

    #[test]
    fn test_net_values_in_quote() {
        let group = group();
        let prices = prices();
        let mut acc = account(1);
        acc.deposits[0] = dec!(0.5);
        acc.borrows[1] = dec!(2);
        acc.deposits[2] = dec!(7);
        assert_eq!(
            net_values(&acc, &group, &prices),
            vec![dec!(20000), dec!(-4000), dec!(7)]
        );
    }
}
