//! Bankruptcy resolution.
//!
//! A bankrupt account has nothing left to seize. Its residual liability in
//! one token or perp market is moved to the insurance path, bounded by the
//! liquidator's capacity. Resolving an account that owes nothing is a no-op.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use margin_liquidator_chain::{
    Action, Executor, Group, LedgerReader, MarginAccount, PriceSnapshot, Signature, Strictness,
};

use crate::error::{submit, LiquidationError};
use crate::health::{health, perp_quote_position};
use crate::selector::{size_transfer, LiquidationPair};

/// Result of a resolution request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Submitted; carries the reloaded liquidatee.
    Resolved {
        signature: Signature,
        liqee: MarginAccount,
    },
    /// Nothing owed on that leg.
    NothingOwed,
}

/// Residual token liability, in token units.
pub fn residual_token_liability(account: &MarginAccount, index: usize) -> Decimal {
    (-account.net(index)).max(Decimal::ZERO)
}

/// Residual perp quote liability after funding, in quote units.
pub fn residual_perp_liability(
    account: &MarginAccount,
    prices: &PriceSnapshot,
    market_index: usize,
) -> Decimal {
    account
        .perp_position(market_index)
        .map(|p| (-perp_quote_position(p, prices, market_index)).max(Decimal::ZERO))
        .unwrap_or_default()
}

/// Submits bankruptcy resolutions.
#[derive(Debug, Clone)]
pub struct BankruptcyResolver {
    ledger: Arc<dyn LedgerReader>,
    executor: Arc<dyn Executor>,
    safety_factor: Decimal,
}

impl BankruptcyResolver {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        executor: Arc<dyn Executor>,
        safety_factor: Decimal,
    ) -> Self {
        Self {
            ledger,
            executor,
            safety_factor,
        }
    }

    /// Resolve the residual liability of one token.
    pub async fn resolve_token(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: &MarginAccount,
        liqor: &MarginAccount,
        liab_index: usize,
    ) -> Result<Resolution, LiquidationError> {
        let owed = residual_token_liability(liqee, liab_index);
        if owed.is_zero() {
            debug!(account = %liqee.key, liab_index, "No residual token liability");
            return Ok(Resolution::NothingOwed);
        }

        let liqor_init = health(liqor, group, prices, Strictness::Init);
        let max_liab_transfer = size_transfer(
            LiquidationPair::TokenBankruptcy { liab: liab_index },
            group,
            prices,
            liqor_init,
            self.safety_factor,
        )?
        .amount()
        .unwrap_or_default();

        info!(
            account = %liqee.key,
            liab_index,
            owed = %owed,
            max_liab_transfer = %max_liab_transfer,
            "Resolving token bankruptcy"
        );
        let signature = submit(
            self.executor.as_ref(),
            Action::ResolveTokenBankruptcy {
                liqee: liqee.key,
                liqor: liqor.key,
                liab_index,
                max_liab_transfer,
            },
        )
        .await?;

        let liqee = self.ledger.load_account(liqee.key).await?;
        Ok(Resolution::Resolved { signature, liqee })
    }

    /// Resolve the residual quote liability of one perp market.
    pub async fn resolve_perp(
        &self,
        group: &Group,
        prices: &PriceSnapshot,
        liqee: &MarginAccount,
        liqor: &MarginAccount,
        market_index: usize,
    ) -> Result<Resolution, LiquidationError> {
        let owed = residual_perp_liability(liqee, prices, market_index);
        if owed.is_zero() {
            debug!(account = %liqee.key, market_index, "No residual perp liability");
            return Ok(Resolution::NothingOwed);
        }

        let liqor_init = health(liqor, group, prices, Strictness::Init);
        let max_liab_transfer = size_transfer(
            LiquidationPair::PerpBankruptcy {
                market: market_index,
            },
            group,
            prices,
            liqor_init,
            self.safety_factor,
        )?
        .amount()
        .unwrap_or_default();

        info!(
            account = %liqee.key,
            market_index,
            owed = %owed,
            max_liab_transfer = %max_liab_transfer,
            "Resolving perp bankruptcy"
        );
        let signature = submit(
            self.executor.as_ref(),
            Action::ResolvePerpBankruptcy {
                liqee: liqee.key,
                liqor: liqor.key,
                market_index,
                max_liab_transfer,
            },
        )
        .await?;

        let liqee = self.ledger.load_account(liqee.key).await?;
        Ok(Resolution::Resolved { signature, liqee })
    }
}
