//! Configuration management with profile support.
//!
//! Provides centralized configuration for all liquidator parameters with
//! support for different profiles (testing, production, aggressive).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use margin_liquidator_chain::AccountKey;

/// Main configuration structure containing all liquidator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Control loop timing
    #[serde(default)]
    pub scanner: ScannerTimingConfig,

    /// Liquidation sizing and order cancellation
    #[serde(default)]
    pub liquidation: LiquidationConfig,

    /// Operator portfolio rebalancing
    #[serde(default)]
    pub rebalance: RebalanceConfig,

    /// Target group and operator identity
    #[serde(default)]
    pub operator: OperatorConfig,

    /// Ledger snapshot source
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Notification side channel
    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Control loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerTimingConfig {
    /// Pause between liquidation cycles (milliseconds)
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_ms: u64,

    /// Full account universe refresh interval (seconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Change feed resubscription interval (seconds)
    #[serde(default = "default_resubscribe_interval")]
    pub resubscribe_interval_secs: u64,

    /// Buffered change feed updates before feed tasks wait
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_cycle_interval() -> u64 {
    3500
}
fn default_refresh_interval() -> u64 {
    600
}
fn default_resubscribe_interval() -> u64 {
    300
}
fn default_mailbox_capacity() -> usize {
    1024
}

impl Default for ScannerTimingConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval(),
            refresh_interval_secs: default_refresh_interval(),
            resubscribe_interval_secs: default_resubscribe_interval(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl ScannerTimingConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
    pub fn resubscribe_interval(&self) -> Duration {
        Duration::from_secs(self.resubscribe_interval_secs)
    }
}

/// Liquidation sizing and order cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationConfig {
    /// Fraction of the liquidator's init health a single transfer may use
    #[serde(default = "default_safety_factor")]
    pub safety_factor: Decimal,

    /// Whether trigger orders are evaluated each cycle
    #[serde(default = "default_check_triggers")]
    pub check_triggers: bool,

    /// Orders cancelled per perp force-cancel call
    #[serde(default = "default_perp_cancel_limit")]
    pub perp_cancel_limit: u8,

    /// Orders cancelled per spot force-cancel call
    #[serde(default = "default_spot_cancel_limit")]
    pub spot_cancel_limit: u8,

    /// Spot cancellation passes before giving up on an account
    #[serde(default = "default_max_cancel_passes")]
    pub max_cancel_passes: u32,
}

fn default_safety_factor() -> Decimal {
    Decimal::new(9, 1)
}
fn default_check_triggers() -> bool {
    true
}
fn default_perp_cancel_limit() -> u8 {
    10
}
fn default_spot_cancel_limit() -> u8 {
    5
}
fn default_max_cancel_passes() -> u32 {
    5
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            safety_factor: default_safety_factor(),
            check_triggers: default_check_triggers(),
            perp_cancel_limit: default_perp_cancel_limit(),
            spot_cancel_limit: default_spot_cancel_limit(),
            max_cancel_passes: default_max_cancel_passes(),
        }
    }
}

/// Operator portfolio rebalancing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Minimum time between rebalances (milliseconds)
    #[serde(default = "default_rebalance_interval")]
    pub interval_ms: u64,

    /// Target net balance per token index; missing entries target zero
    #[serde(default)]
    pub targets: Vec<Decimal>,
}

fn default_rebalance_interval() -> u64 {
    10_000
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_rebalance_interval(),
            targets: Vec::new(),
        }
    }
}

impl RebalanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Target group and operator identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Name of the group to watch
    #[serde(default = "default_group")]
    pub group: String,

    /// Owner of the operator account (hex key)
    #[serde(default)]
    pub owner: Option<String>,

    /// Explicit operator account (hex key); otherwise the owner's
    /// highest-equity account is used
    #[serde(default)]
    pub account: Option<String>,
}

fn default_group() -> String {
    "mainnet.1".to_string()
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            owner: None,
            account: None,
        }
    }
}

impl OperatorConfig {
    pub fn owner_key(&self) -> anyhow::Result<Option<AccountKey>> {
        parse_key("operator.owner", self.owner.as_deref())
    }

    pub fn account_key(&self) -> anyhow::Result<Option<AccountKey>> {
        parse_key("operator.account", self.account.as_deref())
    }
}

fn parse_key(field: &str, value: Option<&str>) -> anyhow::Result<Option<AccountKey>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<AccountKey>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid key for {}: {}", field, e)),
    }
}

/// Ledger snapshot source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Path of the JSON ledger snapshot
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    /// How often the change feed polls the snapshot (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_snapshot_path() -> String {
    "./ledger.json".to_string()
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl LedgerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Notification side channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving `{"content": ...}` posts
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scanner: ScannerTimingConfig::default(),
            liquidation: LiquidationConfig::default(),
            rebalance: RebalanceConfig::default(),
            operator: OperatorConfig::default(),
            ledger: LedgerConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl BotConfig {
    /// Create a testing profile with short timers.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scanner: ScannerTimingConfig {
                cycle_interval_ms: 1000,
                refresh_interval_secs: 60,
                resubscribe_interval_secs: 60,
                mailbox_capacity: 256,
            },
            rebalance: RebalanceConfig {
                interval_ms: 1000,
                targets: Vec::new(),
            },
            operator: OperatorConfig {
                group: "devnet.2".to_string(),
                ..Default::default()
            },
            ledger: LedgerConfig {
                poll_interval_ms: 250,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a production profile with conservative sizing.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            liquidation: LiquidationConfig {
                safety_factor: Decimal::new(8, 1),
                ..Default::default()
            },
            rebalance: RebalanceConfig {
                interval_ms: 30_000,
                targets: Vec::new(),
            },
            ..Default::default()
        }
    }

    /// Create an aggressive profile for maximum speed.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            scanner: ScannerTimingConfig {
                cycle_interval_ms: 1000,
                refresh_interval_secs: 300,
                resubscribe_interval_secs: 120,
                mailbox_capacity: 4096,
            },
            liquidation: LiquidationConfig {
                safety_factor: Decimal::new(95, 2),
                ..Default::default()
            },
            ledger: LedgerConfig {
                poll_interval_ms: 250,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Select a profile by name. Unknown names fall back to the default.
    pub fn profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Get profile from environment variable BOT_PROFILE, or default.
    /// Supported values: testing, production, aggressive
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::profile(&profile)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Liquidator configuration loaded");
        tracing::info!(
            group = %self.operator.group,
            owner = self.operator.owner.as_deref().unwrap_or("-"),
            account = self.operator.account.as_deref().unwrap_or("auto"),
            "Operator"
        );
        tracing::info!(
            cycle_ms = self.scanner.cycle_interval_ms,
            refresh_secs = self.scanner.refresh_interval_secs,
            resubscribe_secs = self.scanner.resubscribe_interval_secs,
            "Scanner timing"
        );
        tracing::info!(
            safety_factor = %self.liquidation.safety_factor,
            check_triggers = self.liquidation.check_triggers,
            max_cancel_passes = self.liquidation.max_cancel_passes,
            "Liquidation parameters"
        );
        tracing::info!(
            interval_ms = self.rebalance.interval_ms,
            targets = ?self.rebalance.targets,
            "Rebalance parameters"
        );
        tracing::info!(
            snapshot = %self.ledger.snapshot_path,
            webhook = self.notifications.webhook_url.is_some(),
            "Ledger and notifications"
        );
    }
}

/// Global configuration holder using lazy initialization.
use std::sync::OnceLock;

static GLOBAL_CONFIG: OnceLock<BotConfig> = OnceLock::new();

/// Initialize global configuration.
pub fn init_config(config: BotConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

/// Get the global configuration, initializing from environment if needed.
pub fn config() -> &'static BotConfig {
    GLOBAL_CONFIG.get_or_init(BotConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert_eq!(config.scanner.cycle_interval(), Duration::from_millis(3500));
        assert_eq!(config.scanner.refresh_interval(), Duration::from_secs(600));
        assert_eq!(config.scanner.resubscribe_interval(), Duration::from_secs(300));
        assert_eq!(config.rebalance.interval(), Duration::from_secs(10));
        assert_eq!(config.liquidation.safety_factor, dec!(0.9));
        assert!(config.liquidation.check_triggers);
        assert_eq!(config.liquidation.max_cancel_passes, 5);
    }

    #[test]
    fn test_profiles() {
        assert_eq!(BotConfig::profile("prod").profile, "production");
        assert!(BotConfig::production().liquidation.safety_factor < dec!(0.9));
        assert_eq!(BotConfig::profile("aggro").scanner.cycle_interval_ms, 1000);
        assert_eq!(BotConfig::profile("unknown").profile, "default");
        assert_eq!(BotConfig::testing().operator.group, "devnet.2");
    }

    #[test]
    fn test_operator_keys() {
        let mut operator = OperatorConfig::default();
        assert_eq!(operator.owner_key().unwrap(), None);

        operator.owner = Some(format!("0x{}", "ab".repeat(32)));
        assert_eq!(
            operator.owner_key().unwrap(),
            Some(AccountKey::repeat_byte(0xab))
        );

        operator.account = Some("not-a-key".to_string());
        assert!(operator.account_key().is_err());
    }

    #[test]
    fn test_serialization() {
        let mut config = BotConfig::testing();
        config.rebalance.targets = vec![dec!(0.5), dec!(10), Decimal::ZERO];
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("profile = \"testing\""));

        let parsed: BotConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: BotConfig = toml::from_str(
            r#"
            [liquidation]
            safety_factor = 0.75

            [rebalance]
            targets = [0.0, 1.5]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.liquidation.safety_factor, dec!(0.75));
        assert_eq!(parsed.liquidation.spot_cancel_limit, 5);
        assert_eq!(parsed.rebalance.targets, vec![Decimal::ZERO, dec!(1.5)]);
        assert_eq!(parsed.scanner.cycle_interval_ms, 3500);
    }
}
