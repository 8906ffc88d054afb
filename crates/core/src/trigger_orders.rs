//! Execution of conditional perp orders whose price condition holds.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use margin_liquidator_chain::{Action, Executor, MarginAccount, PriceSnapshot};

/// Counts from one pass over an account's trigger orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    pub executed: usize,
    /// Already executed or no longer triggered on the ledger.
    pub skipped: usize,
    pub failed: usize,
}

impl TriggerReport {
    pub fn merge(&mut self, other: TriggerReport) {
        self.executed += other.executed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Submits execution requests for triggered orders.
#[derive(Debug, Clone)]
pub struct TriggerExecutor {
    executor: Arc<dyn Executor>,
}

impl TriggerExecutor {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Execute every active order of `account` whose condition holds at the
    /// snapshot price. A failure never stops the remaining orders.
    #[instrument(skip_all, fields(account = %account.key))]
    pub async fn execute_triggered(
        &self,
        account: &MarginAccount,
        prices: &PriceSnapshot,
    ) -> TriggerReport {
        let mut report = TriggerReport::default();

        for order in account.trigger_orders.iter().filter(|o| o.is_active) {
            let price = prices.price(order.market_index);
            if !order.is_triggered(price) {
                continue;
            }

            info!(
                order_index = order.index,
                market_index = order.market_index,
                side = %order.side,
                trigger_price = %order.trigger_price,
                price = %price,
                "Executing trigger order"
            );
            let action = Action::ExecuteTriggerOrder {
                owner: account.key,
                order_index: order.index,
            };
            match self.executor.submit(action).await {
                Ok(signature) => {
                    debug!(%signature, order_index = order.index, "Trigger order executed");
                    report.executed += 1;
                }
                Err(e) if e.is_expected() => {
                    debug!(order_index = order.index, reason = %e, "Trigger order skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(order_index = order.index, error = %e, "Failed to execute trigger order");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
