//! Configuration loading: profile or TOML file, then environment overrides.
//!
//! Resolution order:
//! 1. `BOT_CONFIG` names a TOML file (with `${VAR}` expansion), otherwise
//!    `BOT_PROFILE` selects a built-in profile.
//! 2. Individual environment variables override single values.
//! 3. The result is validated; invalid values are fatal.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use super::BotConfig;

/// Environment variable names.
pub mod env {
    pub const BOT_CONFIG: &str = "BOT_CONFIG";
    pub const INTERVAL: &str = "INTERVAL";
    pub const INTERVAL_ACCOUNTS: &str = "INTERVAL_ACCOUNTS";
    pub const INTERVAL_WEBSOCKET: &str = "INTERVAL_WEBSOCKET";
    pub const INTERVAL_REBALANCE: &str = "INTERVAL_REBALANCE";
    pub const CHECK_TRIGGERS: &str = "CHECK_TRIGGERS";
    pub const LIAB_LIMIT: &str = "LIAB_LIMIT";
    pub const TARGETS: &str = "TARGETS";
    pub const GROUP: &str = "GROUP";
    pub const LIQOR_PK: &str = "LIQOR_PK";
    pub const OPERATOR_OWNER: &str = "OPERATOR_OWNER";
    pub const WEBHOOK_URL: &str = "WEBHOOK_URL";
    pub const LEDGER_SNAPSHOT: &str = "LEDGER_SNAPSHOT";
}

impl BotConfig {
    /// Load configuration from a TOML file, expanding `${VAR}` references.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&expand_env(&content))
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the full configuration from the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(env::BOT_CONFIG) {
            Ok(path) => {
                info!(path = %path, "Loading configuration file");
                Self::from_file(&path)?
            }
            Err(_) => Self::from_env(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply single-value overrides. `lookup` returns the raw value of a
    /// variable, if set.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(env::INTERVAL) {
            self.scanner.cycle_interval_ms = parse(env::INTERVAL, &v)?;
        }
        if let Some(v) = get(env::INTERVAL_ACCOUNTS) {
            let ms: u64 = parse(env::INTERVAL_ACCOUNTS, &v)?;
            self.scanner.refresh_interval_secs = (ms / 1000).max(1);
        }
        if let Some(v) = get(env::INTERVAL_WEBSOCKET) {
            let ms: u64 = parse(env::INTERVAL_WEBSOCKET, &v)?;
            self.scanner.resubscribe_interval_secs = (ms / 1000).max(1);
        }
        if let Some(v) = get(env::INTERVAL_REBALANCE) {
            self.rebalance.interval_ms = parse(env::INTERVAL_REBALANCE, &v)?;
        }
        if let Some(v) = get(env::CHECK_TRIGGERS) {
            self.liquidation.check_triggers = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = get(env::LIAB_LIMIT) {
            self.liquidation.safety_factor = parse(env::LIAB_LIMIT, &v)?;
        }
        if let Some(v) = get(env::TARGETS) {
            self.rebalance.targets = v
                .split_whitespace()
                .map(|t| parse(env::TARGETS, t))
                .collect::<Result<Vec<Decimal>>>()?;
        }
        if let Some(v) = get(env::GROUP) {
            self.operator.group = v;
        }
        if let Some(v) = get(env::LIQOR_PK) {
            self.operator.account = Some(v);
        }
        if let Some(v) = get(env::OPERATOR_OWNER) {
            self.operator.owner = Some(v);
        }
        if let Some(v) = get(env::WEBHOOK_URL) {
            self.notifications.webhook_url = Some(v);
        }
        if let Some(v) = get(env::LEDGER_SNAPSHOT) {
            self.ledger.snapshot_path = v;
        }
        Ok(())
    }

    /// Check values the liquidator cannot run without.
    pub fn validate(&mut self) -> Result<()> {
        if self.operator.group.trim().is_empty() {
            anyhow::bail!("no group configured");
        }
        if self.liquidation.safety_factor <= Decimal::ZERO {
            anyhow::bail!(
                "safety factor must be positive, got {}",
                self.liquidation.safety_factor
            );
        }
        if self.liquidation.safety_factor > Decimal::ONE {
            warn!(
                configured = %self.liquidation.safety_factor,
                "Safety factor above 1, clamping"
            );
            self.liquidation.safety_factor = Decimal::ONE;
        }
        if self.scanner.cycle_interval_ms == 0 {
            anyhow::bail!("cycle interval must be positive");
        }
        if self.liquidation.max_cancel_passes == 0 {
            anyhow::bail!("at least one cancellation pass is required");
        }
        // Surface malformed keys at startup rather than at bootstrap
        self.operator.owner_key()?;
        self.operator.account_key()?;
        Ok(())
    }
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value for {}: {:?} ({})", name, value, e))
}

/// Expand ${VAR_NAME} patterns with environment variable values.
/// Unknown variables are left untouched.
fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}
