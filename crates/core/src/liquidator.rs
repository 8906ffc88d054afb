//! Liquidation flow for one confirmed-liquidatable account.
//!
//! Open orders are force-cancelled first, then the token legs are
//! liquidated, then the perp legs. Token and perp health are separate
//! invariants, so the perp flow runs even after a token transfer unless the
//! account has already recovered.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use margin_liquidator_chain::{
    Action, AssetRef, Executor, Group, LedgerReader, MarginAccount, PriceSnapshot, Strictness,
};

use crate::bankruptcy::{BankruptcyResolver, Resolution};
use crate::config::{config, LiquidationConfig};
use crate::error::{submit, LiquidationError};
use crate::health::{evaluate, health, is_bankrupt, is_liquidatable};
use crate::selector::{
    highest_perp_market, largest_asset_token, lowest_perp_market, net_values, select_legs,
    size_transfer, LiquidationPair,
};

/// Tunables of a liquidation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationSettings {
    /// Fraction of the liquidator's init health a single transfer may use.
    pub safety_factor: Decimal,
    pub perp_cancel_limit: u8,
    pub spot_cancel_limit: u8,
    /// Spot cancellation passes before giving up.
    pub max_cancel_passes: u32,
}

impl From<&LiquidationConfig> for LiquidationSettings {
    fn from(cfg: &LiquidationConfig) -> Self {
        Self {
            safety_factor: cfg.safety_factor,
            perp_cancel_limit: cfg.perp_cancel_limit,
            spot_cancel_limit: cfg.spot_cancel_limit,
            max_cancel_passes: cfg.max_cancel_passes,
        }
    }
}

impl Default for LiquidationSettings {
    fn default() -> Self {
        Self::from(&config().liquidation)
    }
}

/// How a liquidation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationOutcome {
    /// At least one leg was attempted.
    Liquidated,
    /// The account recovered after a reload; nothing was transferred.
    NoLongerLiquidatable,
}

/// Whether a force-cancel should be sent only to clear the
/// `being_liquidated` flag.
pub fn should_clear_flag(spot_needed: bool, pre_perp_health: Decimal, liqee: &MarginAccount) -> bool {
    !spot_needed && pre_perp_health >= Decimal::ZERO && liqee.being_liquidated
}

/// Drives liquidation of single accounts.
#[derive(Debug, Clone)]
pub struct Liquidator {
    ledger: Arc<dyn LedgerReader>,
    executor: Arc<dyn Executor>,
    resolver: BankruptcyResolver,
    settings: LiquidationSettings,
}

impl Liquidator {
    /// Create a liquidator with settings from the global configuration.
    pub fn new(ledger: Arc<dyn LedgerReader>, executor: Arc<dyn Executor>) -> Self {
        Self::with_settings(ledger, executor, LiquidationSettings::default())
    }

    pub fn with_settings(
        ledger: Arc<dyn LedgerReader>,
        executor: Arc<dyn Executor>,
        settings: LiquidationSettings,
    ) -> Self {
        let resolver =
            BankruptcyResolver::new(ledger.clone(), executor.clone(), settings.safety_factor);
        Self {
            ledger,
            executor,
            resolver,
            settings,
        }
    }

    async fn reload(&self, account: &MarginAccount) -> Result<MarginAccount, LiquidationError> {
        Ok(self.ledger.load_account(account.key).await?)
    }

    /// Liquidate one account against the operator account `liqor`.
    ///
    /// A submission rejected because the account is no longer liquidatable
    /// ends the attempt as `NoLongerLiquidatable`.
    #[instrument(skip_all, fields(account = %liqee.key))]
    pub async fn liquidate_account(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: MarginAccount,
        liqor: &MarginAccount,
    ) -> Result<LiquidationOutcome, LiquidationError> {
        match self.run_flow(group, prices, liqee, liqor).await {
            Err(e) if e.is_account_recovered() => {
                info!(error = %e, "Account recovered before submission");
                Ok(LiquidationOutcome::NoLongerLiquidatable)
            }
            result => result,
        }
    }

    async fn run_flow(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: MarginAccount,
        liqor: &MarginAccount,
    ) -> Result<LiquidationOutcome, LiquidationError> {
        let mut liqee = liqee;
        let mut liqor = liqor.clone();

        if liqee.has_any_perp_orders() {
            for market_index in group.perp_market_indices() {
                debug!(market_index, "Force cancelling perp orders");
                submit(
                    self.executor.as_ref(),
                    Action::ForceCancelPerpOrders {
                        liqee: liqee.key,
                        market_index,
                        limit: self.settings.perp_cancel_limit,
                    },
                )
                .await?;
            }
            liqee = self.reload(&liqee).await?;
            if !is_liquidatable(&liqee, group, prices) {
                info!("Account no longer liquidatable after perp cancels");
                return Ok(LiquidationOutcome::NoLongerLiquidatable);
            }
        }

        let mut passes = 0;
        while liqee.has_any_spot_orders() {
            if passes >= self.settings.max_cancel_passes {
                return Err(LiquidationError::OpenOrdersRemain { passes });
            }
            passes += 1;
            let markets: Vec<usize> = liqee.margin_basket_markets().collect();
            for market_index in markets {
                debug!(market_index, pass = passes, "Force cancelling spot orders");
                submit(
                    self.executor.as_ref(),
                    Action::ForceCancelSpotOrders {
                        liqee: liqee.key,
                        market_index,
                        limit: self.settings.spot_cancel_limit,
                    },
                )
                .await?;
            }
            liqee = self.reload(&liqee).await?;
            if !is_liquidatable(&liqee, group, prices) {
                info!(passes, "Account no longer liquidatable after spot cancels");
                return Ok(LiquidationOutcome::NoLongerLiquidatable);
            }
        }

        let pre_perp_health = evaluate(&liqee, group, prices, Strictness::Maint).perp_health();
        let spot_needed = (0..group.num_tokens()).any(|i| liqee.net(i) < Decimal::ZERO);

        if spot_needed {
            liqee = self.liquidate_spot(group, prices, liqee, &mut liqor).await?;
            liqee = self.reload(&liqee).await?;
            if !is_liquidatable(&liqee, group, prices) {
                info!("Account healthy after token liquidation");
                return Ok(LiquidationOutcome::Liquidated);
            }
        }

        liqee = self.liquidate_perps(group, prices, liqee, &mut liqor).await?;

        if should_clear_flag(spot_needed, pre_perp_health, &liqee) {
            if let Some(market_index) = group.perp_market_indices().next() {
                info!(market_index, "Clearing being-liquidated flag");
                submit(
                    self.executor.as_ref(),
                    Action::ForceCancelPerpOrders {
                        liqee: liqee.key,
                        market_index,
                        limit: self.settings.perp_cancel_limit,
                    },
                )
                .await?;
            }
        }

        Ok(LiquidationOutcome::Liquidated)
    }

    /// Transfer the most negative token against the best asset leg.
    /// `liqor` is reloaded after every submission that uses its capacity.
    async fn liquidate_spot(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: MarginAccount,
        liqor: &mut MarginAccount,
    ) -> Result<MarginAccount, LiquidationError> {
        let values = net_values(&liqee, group, prices);
        let legs = select_legs(&values, group.quote_index());
        let Some(liab) = legs.liab else {
            error!(values = ?values, "No liability leg on a liquidatable account");
            return Err(LiquidationError::NoLiabilityLeg);
        };

        if is_bankrupt(&liqee, group, prices) {
            warn!(liab, "Bankrupt account");
            return self.resolve_token(group, prices, liqee, liqor, liab).await;
        }

        let liqor_init = health(liqor, group, prices, Strictness::Init);
        let action = match legs.asset {
            Some(asset) if legs.asset_usable() => {
                let max_liab_transfer = size_transfer(
                    LiquidationPair::TokenToken { liab, asset },
                    group,
                    prices,
                    liqor_init,
                    self.settings.safety_factor,
                )?
                .amount()
                .unwrap_or_default();
                info!(
                    asset,
                    liab,
                    substituted_quote = legs.substituted_quote,
                    max_liab_transfer = %max_liab_transfer,
                    "Liquidating token for token"
                );
                Action::LiquidateTokenAndToken {
                    liqee: liqee.key,
                    liqor: liqor.key,
                    asset_index: asset,
                    liab_index: liab,
                    max_liab_transfer,
                }
            }
            _ => {
                let Some((market, market_health)) = highest_perp_market(&liqee, group, prices)
                else {
                    error!(liab, "No asset leg and no perp market");
                    return Err(LiquidationError::NoAssetLeg);
                };
                let max_liab_transfer = size_transfer(
                    LiquidationPair::TokenPerp {
                        liab,
                        asset_market: market,
                        weight_token: legs.asset,
                    },
                    group,
                    prices,
                    liqor_init,
                    self.settings.safety_factor,
                )?
                .amount()
                .unwrap_or_default();
                info!(
                    liab,
                    market,
                    market_health = %market_health,
                    max_liab_transfer = %max_liab_transfer,
                    "Liquidating token against perp"
                );
                Action::LiquidateTokenAndPerp {
                    liqee: liqee.key,
                    liqor: liqor.key,
                    asset: AssetRef::Perp(market),
                    liab: AssetRef::Token(liab),
                    max_liab_transfer,
                }
            }
        };

        let signature = submit(self.executor.as_ref(), action).await?;
        debug!(%signature, "Token liquidation submitted");

        *liqor = self.reload(liqor).await?;
        let liqee = self.reload(&liqee).await?;
        if is_bankrupt(&liqee, group, prices) {
            warn!(liab, "Account bankrupt after token liquidation");
            return self.resolve_token(group, prices, liqee, liqor, liab).await;
        }
        Ok(liqee)
    }

    async fn resolve_token(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: MarginAccount,
        liqor: &mut MarginAccount,
        liab: usize,
    ) -> Result<MarginAccount, LiquidationError> {
        match self
            .resolver
            .resolve_token(group, prices, &liqee, liqor, liab)
            .await?
        {
            Resolution::Resolved { liqee, .. } => {
                *liqor = self.reload(liqor).await?;
                Ok(liqee)
            }
            Resolution::NothingOwed => Ok(liqee),
        }
    }

    async fn resolve_perp(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: MarginAccount,
        liqor: &mut MarginAccount,
        market: usize,
    ) -> Result<MarginAccount, LiquidationError> {
        match self
            .resolver
            .resolve_perp(group, prices, &liqee, liqor, market)
            .await?
        {
            Resolution::Resolved { liqee, .. } => {
                *liqor = self.reload(liqor).await?;
                Ok(liqee)
            }
            Resolution::NothingOwed => Ok(liqee),
        }
    }

    /// Liquidate the perp market with the lowest maint health.
    async fn liquidate_perps(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: MarginAccount,
        liqor: &mut MarginAccount,
    ) -> Result<MarginAccount, LiquidationError> {
        let Some((market, market_health)) = lowest_perp_market(&liqee, group, prices) else {
            debug!("No perp market to liquidate");
            return Ok(liqee);
        };

        if is_bankrupt(&liqee, group, prices) {
            warn!(market, "Bankrupt account in perp flow");
            return self.resolve_perp(group, prices, liqee, liqor, market).await;
        }

        if market_health >= Decimal::ZERO {
            debug!(market, market_health = %market_health, "Perp health not negative");
            return Ok(liqee);
        }

        let liqor_init = health(liqor, group, prices, Strictness::Init);
        let base_position = liqee
            .perp_position(market)
            .map(|p| p.base_position)
            .unwrap_or_default();

        let action = if base_position == 0 {
            let values = net_values(&liqee, group, prices);
            let asset = largest_asset_token(&values, group.quote_index());
            let max_liab_transfer = size_transfer(
                LiquidationPair::PerpToken {
                    liab_market: market,
                    asset,
                },
                group,
                prices,
                liqor_init,
                self.settings.safety_factor,
            )?
            .amount()
            .unwrap_or_default();
            info!(
                market,
                asset,
                max_liab_transfer = %max_liab_transfer,
                "Liquidating perp quote against token"
            );
            Action::LiquidateTokenAndPerp {
                liqee: liqee.key,
                liqor: liqor.key,
                asset: AssetRef::Token(asset),
                liab: AssetRef::Perp(market),
                max_liab_transfer,
            }
        } else {
            let base_transfer_request = size_transfer(
                LiquidationPair::PerpBase {
                    market,
                    base_position,
                },
                group,
                prices,
                liqor_init,
                self.settings.safety_factor,
            )?
            .base_lots()
            .unwrap_or_default();
            info!(
                market,
                base_position,
                base_transfer_request,
                "Liquidating perp market"
            );
            Action::LiquidatePerpMarket {
                liqee: liqee.key,
                liqor: liqor.key,
                market_index: market,
                base_transfer_request,
            }
        };

        let signature = submit(self.executor.as_ref(), action).await?;
        debug!(%signature, "Perp liquidation submitted");

        *liqor = self.reload(liqor).await?;
        let liqee = self.reload(&liqee).await?;
        if is_bankrupt(&liqee, group, prices) {
            warn!(market, "Account bankrupt after perp liquidation");
            return self.resolve_perp(group, prices, liqee, liqor, market).await;
        }
        Ok(liqee)
    }
}
