//! Classified failures at the executor boundary.

use std::time::Duration;
use thiserror::Error;

/// Why a submitted action did not go through.
///
/// The first group are expected outcomes of racing other liquidators or
/// price updates; callers log them quietly and move on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("trigger order already executed")]
    TriggerAlreadyExecuted,

    #[error("trigger condition no longer holds")]
    TriggerConditionFalse,

    #[error("account is not liquidatable")]
    NotLiquidatable,

    #[error("action rejected by ledger: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("submission timed out after {0:?}")]
    Timeout(Duration),
}

impl ExecError {
    /// Outcomes that are part of normal operation rather than failures.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::TriggerAlreadyExecuted | Self::TriggerConditionFalse | Self::NotLiquidatable
        )
    }

    /// Failures that may succeed on a later cycle without any state change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}
