//! File-backed ledger.
//!
//! Reads venue state from a JSON snapshot that an external indexer keeps up
//! to date. The file is re-read on every load, and polled for the change
//! feed: entries whose state hash changed since the previous poll are pushed
//! as raw updates.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::account::{MarginAccount, TriggerOrder, TriggerOrders};
use crate::ledger::{ChangeFeed, LedgerReader, OpenOrdersUpdate, RestingOrder, UpdateStream};
use crate::market::{AccountKey, Group, PriceSnapshot};

/// Trigger orders stored under one advanced-orders record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedOrdersRecord {
    pub key: AccountKey,
    #[serde(default)]
    pub orders: Vec<TriggerOrder>,
}

/// On-disk layout of the ledger snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub group: Group,
    pub prices: PriceSnapshot,
    #[serde(default)]
    pub accounts: Vec<MarginAccount>,
    #[serde(default)]
    pub advanced_orders: Vec<AdvancedOrdersRecord>,
    #[serde(default)]
    pub resting_spot_orders: Vec<RestingOrder>,
    #[serde(default)]
    pub resting_perp_orders: Vec<RestingOrder>,
}

impl LedgerSnapshot {
    /// Parse a snapshot file.
    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading ledger snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing ledger snapshot {}", path.display()))
    }

    fn account(&self, key: &AccountKey) -> Option<&MarginAccount> {
        self.accounts.iter().find(|a| &a.key == key)
    }
}

/// Ledger reader and change feed over a JSON snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotLedger {
    path: PathBuf,
    group_name: String,
    poll_interval: Duration,
}

impl SnapshotLedger {
    /// Create a ledger for the named group.
    pub fn new(path: impl Into<PathBuf>, group_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            group_name: group_name.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Set how often the change feed re-reads the file.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let snapshot = LedgerSnapshot::read(&self.path).await?;
        if snapshot.group.name != self.group_name {
            anyhow::bail!(
                "group {} not found in {} (snapshot holds {})",
                self.group_name,
                self.path.display(),
                snapshot.group.name
            );
        }
        Ok(snapshot)
    }

    /// Build a polling stream. `extract` turns a snapshot into keyed items;
    /// an item is emitted when its state hash differs from the last poll.
    async fn poll_stream<T, F>(&self, extract: F) -> Result<UpdateStream<T>>
    where
        T: Serialize + Send + 'static,
        F: Fn(LedgerSnapshot) -> Vec<(AccountKey, T)> + Send + Sync + 'static,
    {
        // Seed hashes so the feed only reports changes after subscription
        let initial = self.snapshot().await?;
        let hashes: HashMap<AccountKey, u64> = extract(initial)
            .iter()
            .map(|(key, item)| (*key, state_hash(item)))
            .collect();

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stream = futures::stream::unfold(
            (self.clone(), ticker, hashes, VecDeque::new(), extract),
            |(ledger, mut ticker, mut hashes, mut pending, extract)| async move {
                loop {
                    if let Some(item) = pending.pop_front() {
                        return Some((item, (ledger, ticker, hashes, pending, extract)));
                    }
                    ticker.tick().await;
                    let snapshot = match ledger.snapshot().await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(error = %e, "Change feed poll failed");
                            continue;
                        }
                    };
                    for (key, item) in extract(snapshot) {
                        let hash = state_hash(&item);
                        if hashes.insert(key, hash) != Some(hash) {
                            pending.push_back(item);
                        }
                    }
                    if !pending.is_empty() {
                        debug!(changed = pending.len(), "Change feed detected updates");
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

/// Hash of the serialized form, used to detect changed entries.
fn state_hash<T: Serialize>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    serde_json::to_vec(value)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

/// Strip decoded sub-resources, leaving what a raw account update carries.
fn raw_update(mut account: MarginAccount) -> MarginAccount {
    account.open_orders.clear();
    account.trigger_orders = TriggerOrders::new();
    account
}

#[async_trait]
impl LedgerReader for SnapshotLedger {
    async fn load_group_and_prices(&self) -> Result<(Group, PriceSnapshot)> {
        let snapshot = self.snapshot().await?;
        snapshot.group.validate()?;
        Ok((snapshot.group, snapshot.prices))
    }

    async fn load_account(&self, key: AccountKey) -> Result<MarginAccount> {
        let snapshot = self.snapshot().await?;
        snapshot
            .account(&key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("account {} not found", key))
    }

    async fn load_all_accounts(&self, group: &Group) -> Result<Vec<MarginAccount>> {
        let snapshot = self.snapshot().await?;
        info!(
            group = %group.name,
            accounts = snapshot.accounts.len(),
            "Loaded accounts from snapshot"
        );
        Ok(snapshot.accounts)
    }

    async fn load_accounts_for_owner(
        &self,
        _group: &Group,
        owner: AccountKey,
    ) -> Result<Vec<MarginAccount>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .accounts
            .into_iter()
            .filter(|a| a.owner == owner)
            .collect())
    }

    async fn load_trigger_orders(&self, records: &[AccountKey]) -> Result<Vec<Vec<TriggerOrder>>> {
        let snapshot = self.snapshot().await?;
        Ok(records
            .iter()
            .map(|key| {
                snapshot
                    .advanced_orders
                    .iter()
                    .find(|r| &r.key == key)
                    .map(|r| r.orders.clone())
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn load_resting_spot_orders(
        &self,
        account: &MarginAccount,
        market_index: usize,
    ) -> Result<Vec<RestingOrder>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .resting_spot_orders
            .into_iter()
            .filter(|o| o.owner == account.key && o.market_index == market_index)
            .collect())
    }

    async fn load_resting_perp_orders(
        &self,
        account: &MarginAccount,
        market_index: usize,
    ) -> Result<Vec<RestingOrder>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .resting_perp_orders
            .into_iter()
            .filter(|o| o.owner == account.key && o.market_index == market_index)
            .collect())
    }
}

#[async_trait]
impl ChangeFeed for SnapshotLedger {
    async fn subscribe_accounts(&self, group: &Group) -> Result<UpdateStream<MarginAccount>> {
        info!(group = %group.name, path = %self.path.display(), "Subscribing to account changes");
        self.poll_stream(|snapshot| {
            snapshot
                .accounts
                .into_iter()
                .map(|a| (a.key, raw_update(a)))
                .collect()
        })
        .await
    }

    async fn subscribe_open_orders(&self, group: &Group) -> Result<UpdateStream<OpenOrdersUpdate>> {
        info!(group = %group.name, path = %self.path.display(), "Subscribing to open orders changes");
        self.poll_stream(|snapshot| {
            let mut updates = Vec::new();
            for account in snapshot.accounts {
                for (i, oo_key) in account.spot_open_orders.iter().enumerate() {
                    let (Some(key), Some(state)) = (oo_key, account.open_orders_state(i)) else {
                        continue;
                    };
                    updates.push((
                        *key,
                        OpenOrdersUpdate {
                            key: *key,
                            state: state.clone(),
                        },
                    ));
                }
            }
            updates
        })
        .await
    }
}
