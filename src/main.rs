//! Margin Account Liquidator
//!
//! Risk engine that watches every margin account of a group and liquidates
//! the ones below maintenance health.
//! Features:
//! - Spot and perp liquidation flows with bankruptcy resolution
//! - Trigger order execution
//! - Operator account rebalancing toward target balances
//! - Webhook notifications

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use margin_liquidator_api::notifier_for;
use margin_liquidator_chain::{DryRunExecutor, SnapshotLedger};
use margin_liquidator_core::{init_config, BotConfig, Scanner, ScannerConfig};

/// Environment variable selecting JSON log output.
const LOG_FORMAT: &str = "LOG_FORMAT";

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,margin_liquidator_core=debug,margin_liquidator_chain=debug")
    });
    let json = std::env::var(LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    // Load and initialize bot config (MUST be done before any core module usage)
    // BOT_CONFIG selects a TOML file, BOT_PROFILE a built-in profile
    let bot_config = BotConfig::load()?;
    bot_config.log_config();
    let ledger_path = bot_config.ledger.snapshot_path.clone();
    let poll_interval = bot_config.ledger.poll_interval();
    let group = bot_config.operator.group.clone();
    let webhook_url = bot_config.notifications.webhook_url.clone();
    init_config(bot_config);

    info!("Starting margin liquidator");

    let ledger = Arc::new(SnapshotLedger::new(&ledger_path, &group).with_poll_interval(poll_interval));
    info!(path = %ledger_path, group = %group, "Ledger snapshot configured");

    let executor = Arc::new(DryRunExecutor::new());
    let dry_run = executor.clone();
    let notifier = notifier_for(webhook_url.as_deref(), &group);

    let mut scanner = Scanner::new(
        ledger.clone(),
        ledger,
        executor,
        notifier,
        ScannerConfig::default(),
    );

    // Bootstrap
    info!("Bootstrapping...");
    scanner.bootstrap().await?;

    // Run main loop
    info!("Starting main event loop...");
    scanner.run().await?;

    info!(actions = dry_run.history().len(), "Dry-run actions acknowledged");
    Ok(())
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    margin-liquidator v{}
    "#,
        env!("CARGO_PKG_VERSION")
    );
}
