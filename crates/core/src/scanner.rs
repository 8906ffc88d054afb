//! Control loop of the liquidator.
//!
//! One task owns the scanner. It runs a liquidation cycle on a fixed
//! interval, refreshes the account universe and resubscribes the change
//! feeds on longer intervals, and applies feed updates from a bounded
//! mailbox between accounts. Feed streams are forwarded into the mailbox by
//! spawned tasks that never touch scanner state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use margin_liquidator_api::{Notification, Notifier};
use margin_liquidator_chain::{
    AccountKey, ChangeFeed, Executor, Group, LedgerReader, MarginAccount, OpenOrdersUpdate,
    PriceSnapshot, Strictness, UpdateStream,
};

use crate::account_tracker::AccountTracker;
use crate::config::config;
use crate::health::{describe, equity, evaluate, is_liquidatable};
use crate::liquidator::{LiquidationOutcome, LiquidationSettings, Liquidator};
use crate::rebalancer::Rebalancer;
use crate::trigger_orders::TriggerExecutor;

/// Scanner configuration.
/// Uses values from global BotConfig by default.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub cycle_interval: Duration,
    pub refresh_interval: Duration,
    pub resubscribe_interval: Duration,
    pub mailbox_capacity: usize,
    /// Evaluate trigger orders every cycle
    pub check_triggers: bool,
    /// Group the liquidator operates in
    pub group_name: String,
    /// Owner of the operator account
    pub owner: Option<AccountKey>,
    /// Explicit operator account; otherwise the owner's richest account
    pub operator_account: Option<AccountKey>,
    pub liquidation: LiquidationSettings,
    pub rebalance_interval: Duration,
    pub targets: Vec<Decimal>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        // Read from global config; keys were validated at load time
        let cfg = config();
        Self {
            cycle_interval: cfg.scanner.cycle_interval(),
            refresh_interval: cfg.scanner.refresh_interval(),
            resubscribe_interval: cfg.scanner.resubscribe_interval(),
            mailbox_capacity: cfg.scanner.mailbox_capacity,
            check_triggers: cfg.liquidation.check_triggers,
            group_name: cfg.operator.group.clone(),
            owner: cfg.operator.owner_key().ok().flatten(),
            operator_account: cfg.operator.account_key().ok().flatten(),
            liquidation: LiquidationSettings::from(&cfg.liquidation),
            rebalance_interval: cfg.rebalance.interval(),
            targets: cfg.rebalance.targets.clone(),
        }
    }
}

/// Item delivered through the mailbox.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    Account(MarginAccount),
    OpenOrders(OpenOrdersUpdate),
}

/// Counts from one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub liquidatable: usize,
    pub liquidated: usize,
    pub failed: usize,
    pub triggers_executed: usize,
}

/// Main scanner driving liquidation cycles.
#[derive(Debug)]
pub struct Scanner {
    ledger: Arc<dyn LedgerReader>,
    feed: Arc<dyn ChangeFeed>,
    notifier: Arc<dyn Notifier>,
    tracker: Arc<AccountTracker>,
    liquidator: Liquidator,
    triggers: TriggerExecutor,
    rebalancer: Rebalancer,
    config: ScannerConfig,
    /// Operator account, resolved at bootstrap
    operator: Option<AccountKey>,
    /// Group of the last successful load
    group: Option<Group>,
    mailbox_tx: mpsc::Sender<FeedUpdate>,
    mailbox_rx: mpsc::Receiver<FeedUpdate>,
    feed_tasks: Vec<JoinHandle<()>>,
}

fn spawn_forwarder<T: Send + 'static>(
    mut stream: UpdateStream<T>,
    tx: mpsc::Sender<FeedUpdate>,
    wrap: fn(T) -> FeedUpdate,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            if tx.send(wrap(item)).await.is_err() {
                return;
            }
        }
        debug!("Change feed stream ended");
    })
}

impl Scanner {
    /// Create a new scanner.
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        feed: Arc<dyn ChangeFeed>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
        config: ScannerConfig,
    ) -> Self {
        let liquidator =
            Liquidator::with_settings(ledger.clone(), executor.clone(), config.liquidation.clone());
        let triggers = TriggerExecutor::new(executor.clone());
        let rebalancer = Rebalancer::new(
            ledger.clone(),
            executor,
            config.rebalance_interval,
            config.targets.clone(),
        );
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        Self {
            ledger,
            feed,
            notifier,
            tracker: Arc::new(AccountTracker::new()),
            liquidator,
            triggers,
            rebalancer,
            config,
            operator: None,
            group: None,
            mailbox_tx,
            mailbox_rx,
            feed_tasks: Vec::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<AccountTracker> {
        &self.tracker
    }

    pub fn operator(&self) -> Option<AccountKey> {
        self.operator
    }

    /// Load the group, resolve the operator account, load the account
    /// universe and subscribe to changes. Any failure here is fatal.
    pub async fn bootstrap(&mut self) -> Result<()> {
        info!(group = %self.config.group_name, "Bootstrapping liquidator");

        let (group, _) = self
            .ledger
            .load_group_and_prices()
            .await
            .context("loading group")?;
        if group.name != self.config.group_name {
            bail!(
                "group {} not found (ledger serves {})",
                self.config.group_name,
                group.name
            );
        }
        group.validate()?;

        let operator = self.resolve_operator(&group).await?;
        info!(operator = %operator.key, owner = %operator.owner, "Operator account resolved");
        self.operator = Some(operator.key);

        self.refresh(&group).await.context("loading accounts")?;
        self.subscribe(&group).await;
        self.notifier.notify(Notification::Launched {
            group: group.name.clone(),
        });
        self.group = Some(group);
        Ok(())
    }

    async fn resolve_operator(&self, group: &Group) -> Result<MarginAccount> {
        let Some(owner) = self.config.owner else {
            bail!("operator owner is not configured");
        };

        if let Some(key) = self.config.operator_account {
            let account = self
                .ledger
                .load_account(key)
                .await
                .with_context(|| format!("loading operator account {key}"))?;
            if account.owner != owner {
                bail!("operator account {} is not owned by {}", key, owner);
            }
            return Ok(account);
        }

        let (_, prices) = self.ledger.load_group_and_prices().await?;
        let accounts = self.ledger.load_accounts_for_owner(group, owner).await?;
        accounts
            .into_iter()
            .max_by_key(|a| equity(a, group, &prices))
            .ok_or_else(|| anyhow::anyhow!("no margin account owned by {owner}"))
    }

    /// Replace the account universe with a fresh load.
    #[instrument(skip_all)]
    pub async fn refresh(&self, group: &Group) -> Result<()> {
        let ticket = self.tracker.begin_refresh();
        let accounts = self.ledger.load_all_accounts(group).await?;
        let loaded = accounts.len();
        self.tracker.complete_refresh(ticket, accounts);
        info!(loaded, tracked = self.tracker.len(), "Accounts refreshed");
        Ok(())
    }

    /// Drop existing feed subscriptions and subscribe again.
    pub async fn subscribe(&mut self, group: &Group) {
        for task in self.feed_tasks.drain(..) {
            task.abort();
        }

        match self.feed.subscribe_accounts(group).await {
            Ok(stream) => self.feed_tasks.push(spawn_forwarder(
                stream,
                self.mailbox_tx.clone(),
                FeedUpdate::Account,
            )),
            Err(e) => warn!(error = %e, "Failed to subscribe to account updates"),
        }
        match self.feed.subscribe_open_orders(group).await {
            Ok(stream) => self.feed_tasks.push(spawn_forwarder(
                stream,
                self.mailbox_tx.clone(),
                FeedUpdate::OpenOrders,
            )),
            Err(e) => warn!(error = %e, "Failed to subscribe to open orders updates"),
        }
        debug!(tasks = self.feed_tasks.len(), "Change feeds subscribed");
    }

    fn apply_feed_update(&self, update: FeedUpdate) {
        match update {
            FeedUpdate::Account(account) => {
                let key = account.key;
                let kind = self.tracker.apply_account_update(account);
                debug!(account = %key, ?kind, "Account update applied");
            }
            FeedUpdate::OpenOrders(update) => {
                self.tracker.apply_open_orders_update(update);
            }
        }
    }

    fn drain_mailbox(&mut self) {
        while let Ok(update) = self.mailbox_rx.try_recv() {
            self.apply_feed_update(update);
        }
    }

    async fn load_trigger_orders(&self) -> Result<()> {
        let records = self.tracker.advanced_order_records();
        if records.is_empty() {
            return Ok(());
        }
        let keys: Vec<AccountKey> = records.iter().map(|(_, record)| *record).collect();
        let orders = self.ledger.load_trigger_orders(&keys).await?;
        for ((account, _), orders) in records.iter().zip(orders) {
            self.tracker.set_trigger_orders(account, orders);
        }
        debug!(records = records.len(), "Trigger orders loaded");
        Ok(())
    }

    /// Reload the operator account and rebalance it if due.
    async fn rebalance(
        &mut self,
        group: &Group,
        prices: &PriceSnapshot,
        operator: AccountKey,
    ) -> Option<MarginAccount> {
        let liqor = match self.ledger.load_account(operator).await {
            Ok(account) => account,
            Err(e) => {
                warn!(error = %e, "Failed to reload operator account");
                return None;
            }
        };
        if let Some(report) = self.rebalancer.maybe_rebalance(group, prices, &liqor).await {
            if report.orders_placed > 0 {
                self.notifier.notify(Notification::Rebalanced {
                    orders: report.orders_placed,
                });
            }
        }
        Some(liqor)
    }

    /// One pass over the account universe.
    #[instrument(skip(self))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let Some(operator) = self.operator else {
            bail!("scanner is not bootstrapped");
        };
        let mut report = CycleReport::default();

        if self.config.check_triggers {
            if let Err(e) = self.load_trigger_orders().await {
                warn!(error = %e, "Failed to load trigger orders");
            }
        }

        let (group, prices) = self.ledger.load_group_and_prices().await?;
        let mut liqor = self.ledger.load_account(operator).await?;
        self.group = Some(group.clone());

        for account in self.tracker.snapshot() {
            self.drain_mailbox();
            report.scanned += 1;
            let account = self.tracker.get(&account.key).unwrap_or(account);

            if self.config.check_triggers && !account.trigger_orders.is_empty() {
                report.triggers_executed += self
                    .triggers
                    .execute_triggered(&account, &prices)
                    .await
                    .executed;
            }

            if !is_liquidatable(&account, &group, &prices) {
                continue;
            }

            let liqee = match self.ledger.load_account(account.key).await {
                Ok(liqee) => liqee,
                Err(e) => {
                    warn!(account = %account.key, error = %e, "Failed to reload account");
                    report.failed += 1;
                    continue;
                }
            };
            if !is_liquidatable(&liqee, &group, &prices) {
                debug!(account = %liqee.key, "Account recovered before liquidation");
                continue;
            }
            report.liquidatable += 1;

            let health_ratio = evaluate(&liqee, &group, &prices, Strictness::Maint).health_ratio();
            let summary = describe(&liqee, &group, &prices);
            info!(
                account = %liqee.key,
                health_ratio = %health_ratio.round_dp(4),
                "Sick account\n{}",
                summary
            );
            self.notifier.notify(Notification::SickAccount {
                account: liqee.key,
                health_ratio,
                summary,
            });

            let key = liqee.key;
            match self
                .liquidator
                .liquidate_account(&group, &prices, liqee, &liqor)
                .await
            {
                Ok(LiquidationOutcome::Liquidated) => {
                    info!(account = %key, "Liquidated account");
                    report.liquidated += 1;
                    self.notifier.notify(Notification::Liquidated { account: key });
                }
                Ok(LiquidationOutcome::NoLongerLiquidatable) => {
                    debug!(account = %key, "Account no longer liquidatable");
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(account = %key, error = %e, "Liquidation failed");
                    } else {
                        error!(
                            account = %key,
                            error = %e,
                            invariant = e.is_invariant_violation(),
                            "Liquidation aborted"
                        );
                    }
                    report.failed += 1;
                    self.notifier.notify(Notification::LiquidationFailed {
                        account: key,
                        error: e.to_string(),
                    });
                }
            }

            if let Some(reloaded) = self.rebalance(&group, &prices, operator).await {
                liqor = reloaded;
            }
        }

        self.rebalance(&group, &prices, operator).await;

        info!(
            scanned = report.scanned,
            liquidatable = report.liquidatable,
            liquidated = report.liquidated,
            failed = report.failed,
            triggers = report.triggers_executed,
            operator_equity = %equity(&liqor, &group, &prices).round_dp(2),
            "Cycle complete"
        );
        Ok(report)
    }

    /// Run until ctrl-c. Cycle errors are logged and the loop continues.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            cycle_ms = self.config.cycle_interval.as_millis() as u64,
            refresh_secs = self.config.refresh_interval.as_secs(),
            resubscribe_secs = self.config.resubscribe_interval.as_secs(),
            "Starting control loop"
        );

        let mut cycle = interval(self.config.cycle_interval);
        cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = interval(self.config.refresh_interval);
        refresh.reset();
        let mut resubscribe = interval(self.config.resubscribe_interval);
        resubscribe.reset();

        loop {
            tokio::select! {
                _ = cycle.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Cycle failed");
                        self.notifier.notify(Notification::Error {
                            context: "cycle".to_string(),
                            error: e.to_string(),
                        });
                    }
                }
                _ = refresh.tick() => {
                    if let Some(group) = self.group.clone() {
                        if let Err(e) = self.refresh(&group).await {
                            warn!(error = %e, "Account refresh failed");
                        }
                    }
                }
                _ = resubscribe.tick() => {
                    if let Some(group) = self.group.clone() {
                        self.subscribe(&group).await;
                    }
                }
                Some(update) = self.mailbox_rx.recv() => {
                    self.apply_feed_update(update);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        for task in self.feed_tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}
