//! Live set of margin accounts.
//!
//! Full refreshes replace the list; change-feed updates insert or replace
//! entries in place. Every write is stamped with a sequence number so a
//! refresh that started before a feed write never discards it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use margin_liquidator_chain::{AccountKey, MarginAccount, OpenOrdersUpdate, TriggerOrder};

/// An account together with the sequence of its last write.
#[derive(Debug, Clone)]
pub struct TrackedAccount {
    pub account: Arc<MarginAccount>,
    pub seq: u64,
}

/// Sequence at which a full refresh began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct RefreshTicket {
    seq: u64,
}

/// Effect of a change-feed account update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Inserted,
    Replaced,
}

/// Account universe shared by the control loop and the feed handlers.
#[derive(Debug, Default)]
pub struct AccountTracker {
    accounts: RwLock<Vec<TrackedAccount>>,
    /// Account key to position in `accounts`.
    index: DashMap<AccountKey, usize>,
    /// Open-orders record to (owning account, spot market index).
    open_orders_owners: DashMap<AccountKey, (AccountKey, usize)>,
    seq: AtomicU64,
}

impl AccountTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn index_open_orders(&self, account: &MarginAccount) {
        for (market_index, oo) in account.spot_open_orders.iter().enumerate() {
            if let Some(oo) = oo {
                self.open_orders_owners
                    .insert(*oo, (account.key, market_index));
            }
        }
    }

    /// Mark the start of a full refresh.
    pub fn begin_refresh(&self) -> RefreshTicket {
        RefreshTicket {
            seq: self.seq.load(Ordering::SeqCst),
        }
    }

    /// Replace the list with `fetched` and shuffle it. Entries written by
    /// the feed after `ticket` was taken win over the fetched copy.
    pub fn complete_refresh(&self, ticket: RefreshTicket, fetched: Vec<MarginAccount>) {
        let mut list = self.accounts.write();

        let mut newer: HashMap<AccountKey, TrackedAccount> = list
            .iter()
            .filter(|t| t.seq > ticket.seq)
            .map(|t| (t.account.key, t.clone()))
            .collect();
        let previous: HashMap<AccountKey, Arc<MarginAccount>> = list
            .iter()
            .map(|t| (t.account.key, t.account.clone()))
            .collect();

        let mut next = Vec::with_capacity(fetched.len() + newer.len());
        for mut account in fetched {
            if let Some(tracked) = newer.remove(&account.key) {
                next.push(tracked);
                continue;
            }
            if let Some(prev) = previous.get(&account.key) {
                account.inherit_cached(prev);
            }
            next.push(TrackedAccount {
                account: Arc::new(account),
                seq: ticket.seq,
            });
        }
        let kept = newer.len();
        next.extend(newer.into_values());
        next.shuffle(&mut rand::thread_rng());

        self.index.clear();
        self.open_orders_owners.clear();
        for (i, tracked) in next.iter().enumerate() {
            self.index.insert(tracked.account.key, i);
            self.index_open_orders(&tracked.account);
        }

        debug!(
            accounts = next.len(),
            kept_from_feed = kept,
            "Account universe refreshed"
        );
        *list = next;
    }

    /// Insert a new account or replace an existing one, keeping cached
    /// open-orders state and trigger orders the update does not carry.
    pub fn apply_account_update(&self, mut account: MarginAccount) -> UpdateKind {
        let mut list = self.accounts.write();
        let seq = self.next_seq();

        let existing = self.index.get(&account.key).map(|i| *i);
        match existing {
            Some(i) => {
                account.inherit_cached(&list[i].account);
                self.index_open_orders(&account);
                list[i] = TrackedAccount {
                    account: Arc::new(account),
                    seq,
                };
                UpdateKind::Replaced
            }
            None => {
                self.index_open_orders(&account);
                self.index.insert(account.key, list.len());
                list.push(TrackedAccount {
                    account: Arc::new(account),
                    seq,
                });
                UpdateKind::Inserted
            }
        }
    }

    /// Apply an open-orders update to the account that references it.
    /// Returns `false` when no tracked account owns the record.
    pub fn apply_open_orders_update(&self, update: OpenOrdersUpdate) -> bool {
        let Some((owner, market_index)) = self.open_orders_owners.get(&update.key).map(|e| *e)
        else {
            warn!(open_orders = %update.key, "Open orders update matches no tracked account");
            return false;
        };
        self.modify(&owner, |account| account.set_open_orders(market_index, update.state))
    }

    /// Store freshly loaded trigger orders on an account.
    pub fn set_trigger_orders(&self, key: &AccountKey, orders: Vec<TriggerOrder>) -> bool {
        self.modify(key, |account| account.trigger_orders = orders.into_iter().collect())
    }

    fn modify(&self, key: &AccountKey, f: impl FnOnce(&mut MarginAccount)) -> bool {
        let mut list = self.accounts.write();
        let Some(i) = self.index.get(key).map(|i| *i) else {
            return false;
        };
        let mut account = (*list[i].account).clone();
        f(&mut account);
        list[i] = TrackedAccount {
            account: Arc::new(account),
            seq: self.next_seq(),
        };
        true
    }

    /// Stable copy of the list for one cycle.
    pub fn snapshot(&self) -> Vec<Arc<MarginAccount>> {
        self.accounts
            .read()
            .iter()
            .map(|t| t.account.clone())
            .collect()
    }

    pub fn get(&self, key: &AccountKey) -> Option<Arc<MarginAccount>> {
        let list = self.accounts.read();
        self.index
            .get(key)
            .and_then(|i| list.get(*i).map(|t| t.account.clone()))
    }

    /// `(account, advanced orders record)` for accounts that have one.
    pub fn advanced_order_records(&self) -> Vec<(AccountKey, AccountKey)> {
        self.accounts
            .read()
            .iter()
            .filter_map(|t| t.account.advanced_orders.map(|r| (t.account.key, r)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, key};
    use margin_liquidator_chain::{OpenOrdersState, Side, TriggerCondition};
    use rust_decimal_macros::dec;

    #[test]
    fn test_refresh_replaces_list() {
        let tracker = AccountTracker::new();
        tracker.apply_account_update(account(9));

        let ticket = tracker.begin_refresh();
        tracker.complete_refresh(ticket, vec![account(1), account(2), account(3)]);
        assert_eq!(tracker.len(), 3);
        assert!(tracker.get(&key(9)).is_none());
        assert!(tracker.get(&key(2)).is_some());
    }

    #[test]
    fn test_insert_during_refresh_is_kept() {
        let tracker = AccountTracker::new();
        let ticket = tracker.begin_refresh();
        assert_eq!(tracker.apply_account_update(account(9)), UpdateKind::Inserted);

        tracker.complete_refresh(ticket, vec![account(1), account(2)]);
        assert_eq!(tracker.len(), 3);
        assert!(tracker.get(&key(9)).is_some());
    }

    #[test]
    fn test_feed_write_during_refresh_wins() {
        let tracker = AccountTracker::new();
        let ticket = tracker.begin_refresh();
        let mut fresh = account(1);
        fresh.deposits[2] = dec!(5);
        tracker.apply_account_update(fresh);

        let mut stale = account(1);
        stale.deposits[2] = dec!(1);
        tracker.complete_refresh(ticket, vec![stale]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&key(1)).unwrap().deposits[2], dec!(5));
    }

    #[test]
    fn test_replace_keeps_cached_state() {
        let tracker = AccountTracker::new();
        let mut acc = account(1);
        acc.spot_open_orders = vec![None, Some(key(0x51))];
        acc.set_open_orders(
            1,
            OpenOrdersState {
                base_total: dec!(2),
                ..Default::default()
            },
        );
        tracker.apply_account_update(acc);

        let mut raw = account(1);
        raw.spot_open_orders = vec![None, Some(key(0x51))];
        raw.deposits[0] = dec!(3);
        assert_eq!(tracker.apply_account_update(raw), UpdateKind::Replaced);

        let tracked = tracker.get(&key(1)).unwrap();
        assert_eq!(tracked.deposits[0], dec!(3));
        assert_eq!(tracked.open_orders_state(1).unwrap().base_total, dec!(2));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_open_orders_update_matches_owner() {
        let tracker = AccountTracker::new();
        let mut acc = account(1);
        acc.spot_open_orders = vec![None, Some(key(0x51))];
        tracker.apply_account_update(acc);

        let state = OpenOrdersState {
            quote_total: dec!(40),
            ..Default::default()
        };
        assert!(tracker.apply_open_orders_update(OpenOrdersUpdate {
            key: key(0x51),
            state: state.clone(),
        }));
        assert_eq!(tracker.get(&key(1)).unwrap().open_orders_state(1), Some(&state));

        assert!(!tracker.apply_open_orders_update(OpenOrdersUpdate {
            key: key(0x77),
            state,
        }));
    }

    #[test]
    fn test_trigger_orders_and_records() {
        let tracker = AccountTracker::new();
        let mut acc = account(1);
        acc.advanced_orders = Some(key(0x61));
        tracker.apply_account_update(acc);
        tracker.apply_account_update(account(2));

        assert_eq!(tracker.advanced_order_records(), vec![(key(1), key(0x61))]);
        let order = TriggerOrder {
            index: 0,
            market_index: 0,
            side: Side::Buy,
            quantity: 1,
            condition: TriggerCondition::Below,
            trigger_price: dec!(30000),
            is_active: true,
        };
        assert!(tracker.set_trigger_orders(&key(1), vec![order]));
        assert_eq!(tracker.get(&key(1)).unwrap().trigger_orders.len(), 1);
        assert!(!tracker.set_trigger_orders(&key(3), vec![]));
    }
}
