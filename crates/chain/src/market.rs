//! Venue configuration and price snapshots.
//!
//! A [`Group`] describes the registered tokens and markets together with
//! their risk weights. The last token is always the quote token.

use alloy::primitives::B256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 32-byte identity of an account, market or open-orders record.
pub type AccountKey = B256;

/// Maximum number of tokens a group can register.
pub const MAX_TOKENS: usize = 16;

/// Which margin requirement to evaluate against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Bound below which liquidation is permitted.
    Maint,
    /// Stricter bound limiting new exposure.
    Init,
}

/// Asset and liability weights at both strictness levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub maint_asset_weight: Decimal,
    pub init_asset_weight: Decimal,
    pub maint_liab_weight: Decimal,
    pub init_liab_weight: Decimal,
}

impl RiskWeights {
    /// Weights of the quote token: everything counts at face value.
    pub const UNIT: Self = Self {
        maint_asset_weight: Decimal::ONE,
        init_asset_weight: Decimal::ONE,
        maint_liab_weight: Decimal::ONE,
        init_liab_weight: Decimal::ONE,
    };

    pub fn asset_weight(&self, strictness: Strictness) -> Decimal {
        match strictness {
            Strictness::Maint => self.maint_asset_weight,
            Strictness::Init => self.init_asset_weight,
        }
    }

    pub fn liab_weight(&self, strictness: Strictness) -> Decimal {
        match strictness {
            Strictness::Maint => self.maint_liab_weight,
            Strictness::Init => self.init_liab_weight,
        }
    }

    /// Weight applied to a signed value: asset weight when positive,
    /// liability weight otherwise.
    pub fn weight_for(&self, value: Decimal, strictness: Strictness) -> Decimal {
        if value > Decimal::ZERO {
            self.asset_weight(strictness)
        } else {
            self.liab_weight(strictness)
        }
    }
}

/// A registered token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub mint: AccountKey,
    #[serde(default)]
    pub decimals: u8,
}

/// Spot market for a non-quote token against the quote token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotMarketInfo {
    pub key: AccountKey,
    #[serde(flatten)]
    pub weights: RiskWeights,
    pub liquidation_fee: Decimal,
    /// Smallest order the market accepts, in token units.
    pub min_order_size: Decimal,
}

/// Perpetual market. Priced by the token price at the same index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpMarketInfo {
    pub key: AccountKey,
    #[serde(flatten)]
    pub weights: RiskWeights,
    pub liquidation_fee: Decimal,
    /// Size of one base lot, in token units.
    pub base_lot_size: Decimal,
}

/// Shared venue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub key: AccountKey,
    pub name: String,
    /// Registered tokens; the last entry is the quote token.
    pub tokens: Vec<TokenInfo>,
    /// Spot market per non-quote token index.
    #[serde(default)]
    pub spot_markets: Vec<Option<SpotMarketInfo>>,
    /// Perp market per market index.
    #[serde(default)]
    pub perp_markets: Vec<Option<PerpMarketInfo>>,
}

impl Group {
    /// Index of the quote token.
    pub fn quote_index(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn spot_market(&self, index: usize) -> Option<&SpotMarketInfo> {
        self.spot_markets.get(index).and_then(Option::as_ref)
    }

    pub fn perp_market(&self, index: usize) -> Option<&PerpMarketInfo> {
        self.perp_markets.get(index).and_then(Option::as_ref)
    }

    /// Risk weights of a token. The quote token and tokens without a spot
    /// market count at face value.
    pub fn token_weights(&self, index: usize) -> RiskWeights {
        if index == self.quote_index() {
            return RiskWeights::UNIT;
        }
        self.spot_market(index)
            .map(|m| m.weights)
            .unwrap_or(RiskWeights::UNIT)
    }

    /// Indices of markets that have a perp market registered.
    pub fn perp_market_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.perp_markets
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|_| i))
    }

    /// Indices of markets that have a spot market registered.
    pub fn spot_market_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.spot_markets
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|_| i))
    }

    /// Check structural consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tokens.is_empty() {
            anyhow::bail!("group {} has no tokens", self.name);
        }
        if self.tokens.len() > MAX_TOKENS {
            anyhow::bail!(
                "group {} registers {} tokens, at most {} supported",
                self.name,
                self.tokens.len(),
                MAX_TOKENS
            );
        }
        if self.spot_markets.len() > self.quote_index() {
            anyhow::bail!("group {} has a spot market for the quote token", self.name);
        }
        if self.perp_markets.len() > self.quote_index() {
            anyhow::bail!("group {} has a perp market at the quote index", self.name);
        }
        Ok(())
    }
}

/// Cumulative funding of a perp market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FundingState {
    pub long_funding: Decimal,
    pub short_funding: Decimal,
}

/// Consistent set of prices read once per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Price of each token in quote units.
    pub prices: Vec<Decimal>,
    /// Funding state per perp market index.
    #[serde(default)]
    pub funding: Vec<FundingState>,
    /// When the snapshot was taken.
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl PriceSnapshot {
    /// Price of a token in quote units. Missing entries (including the
    /// quote token itself) read as 1.
    pub fn price(&self, index: usize) -> Decimal {
        self.prices.get(index).copied().unwrap_or(Decimal::ONE)
    }

    pub fn funding(&self, market_index: usize) -> FundingState {
        self.funding.get(market_index).copied().unwrap_or_default()
    }
}
