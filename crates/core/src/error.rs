//! Failures of a liquidation attempt.

use thiserror::Error;

use margin_liquidator_chain::{Action, Executor, ExecError, Signature};

use crate::selector::SizingError;

/// Why a liquidation attempt stopped early.
#[derive(Debug, Error)]
pub enum LiquidationError {
    #[error("no liability leg on a liquidatable account")]
    NoLiabilityLeg,

    #[error("no asset leg and no perp market to transfer against")]
    NoAssetLeg,

    #[error("spot orders remain after {passes} cancellation passes")]
    OpenOrdersRemain { passes: u32 },

    #[error("cannot size transfer: {0}")]
    Sizing(#[from] SizingError),

    #[error("{action} failed: {source}")]
    Execution {
        action: &'static str,
        source: ExecError,
    },

    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

impl LiquidationError {
    /// Broken assumptions about account state, as opposed to I/O failures.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::NoLiabilityLeg | Self::NoAssetLeg | Self::OpenOrdersRemain { .. } | Self::Sizing(_)
        )
    }

    /// The ledger refused a transfer because the account is healthy again.
    pub fn is_account_recovered(&self) -> bool {
        matches!(
            self,
            Self::Execution {
                source: ExecError::NotLiquidatable,
                ..
            }
        )
    }

    /// Failures that may clear on a later cycle without any state change.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Execution { source, .. } => source.is_transient(),
            Self::Ledger(_) => true,
            _ => false,
        }
    }
}

/// Submit an action, tagging failures with the action kind.
pub(crate) async fn submit(
    executor: &dyn Executor,
    action: Action,
) -> Result<Signature, LiquidationError> {
    let kind = action.kind();
    executor
        .submit(action)
        .await
        .map_err(|source| LiquidationError::Execution {
            action: kind,
            source,
        })
}
