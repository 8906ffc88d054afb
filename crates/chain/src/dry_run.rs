//! Executor that logs actions instead of submitting them.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::action::{Action, Signature};
use crate::error::ExecError;
use crate::ledger::Executor;

/// Acknowledges every action without touching the venue.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    submitted: AtomicU64,
    history: Mutex<Vec<Action>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions acknowledged so far, oldest first.
    pub fn history(&self) -> Vec<Action> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn submit(&self, action: Action) -> Result<Signature, ExecError> {
        let n = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            action = action.kind(),
            target = %action.target(),
            seq = n,
            "Dry run: action not submitted"
        );
        self.history.lock().push(action);
        Ok(format!("dry-run-{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::fixtures::key;

    #[tokio::test]
    async fn test_acknowledges_and_records() {
        let executor = DryRunExecutor::new();
        let sig = executor
            .submit(Action::SettleFunds {
                owner: key(1),
                market_index: 0,
            })
            .await
            .unwrap();
        assert_eq!(sig, "dry-run-1");
        assert_eq!(executor.history().len(), 1);
        assert_eq!(executor.history()[0].kind(), "settle_funds");
    }
}
