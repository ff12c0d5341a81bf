//! Error taxonomy for the intention engine.
//!
//! Only the tree errors (`InvalidParent`, `NotFound`, `IllegalTransition`) ever escape
//! [`crate::engine::run`]. Every other variant describes a runtime condition that the
//! navigator records and absorbs into the intention tree.

use std::time::Duration;

use thiserror::Error;

use crate::core::budget::BudgetBreach;
use crate::core::tree::IntentionId;
use crate::core::types::IntentionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The completion service failed or timed out.
    #[error("planning unavailable: {0}")]
    PlanningUnavailable(String),

    /// The dispatcher could not run an action at all (spawn or transport failure).
    #[error("dispatch failure: {0}")]
    DispatchFailure(String),

    /// A human decision source did not answer in time.
    #[error("checkpoint {checkpoint} timed out after {timeout:?}")]
    CheckpointTimeout {
        checkpoint: &'static str,
        timeout: Duration,
    },

    /// A decision source is not connected or hung up.
    #[error("checkpoint {checkpoint} unavailable: {reason}")]
    CheckpointUnavailable {
        checkpoint: &'static str,
        reason: String,
    },

    #[error("intention {id} entered at depth {depth}, limit is {max_depth}")]
    DepthExceeded {
        id: IntentionId,
        depth: u32,
        max_depth: u32,
    },

    #[error("run budget exceeded: {0}")]
    BudgetExceeded(BudgetBreach),

    #[error("cannot add child to {0}: parent missing or terminal")]
    InvalidParent(IntentionId),

    #[error("intention {0} not found")]
    NotFound(IntentionId),

    #[error("intention {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: IntentionId,
        from: IntentionStatus,
        to: IntentionStatus,
    },
}

impl EngineError {
    /// True for errors that indicate a programming defect and abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidParent(_)
                | EngineError::NotFound(_)
                | EngineError::IllegalTransition { .. }
        )
    }
}
