//! Checkpoint gates: the only path through which risk-bearing transitions pass.
//!
//! [`CheckpointGate`] is implemented by the deterministic [`auto::AutoCheckpoint`] and by
//! [`human::HumanCheckpoint`], a decorator that asks an external decision source and
//! falls back to the wrapped gate one call at a time.

pub mod auto;
pub mod human;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::tree::Intention;
use crate::core::types::{Cycle, CycleDraft, IntentionDraft, Judgment};

/// The four checkpoint calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    JudgeAction,
    ApproveDecomposition,
    VerifyIntegration,
    ReviewReflection,
}

impl CheckpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointKind::JudgeAction => "judge_action",
            CheckpointKind::ApproveDecomposition => "approve_decomposition",
            CheckpointKind::VerifyIntegration => "verify_integration",
            CheckpointKind::ReviewReflection => "review_reflection",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a checkpoint answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOrigin {
    Automatic,
    Human,
    /// A human was asked but the automatic answer was used instead.
    Fallback { reason: String },
}

/// A checkpoint answer the navigator must obey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision<T> {
    pub answer: T,
    pub origin: DecisionOrigin,
}

impl<T> Decision<T> {
    pub fn automatic(answer: T) -> Self {
        Self {
            answer,
            origin: DecisionOrigin::Automatic,
        }
    }

    pub fn human(answer: T) -> Self {
        Self {
            answer,
            origin: DecisionOrigin::Human,
        }
    }

    /// Re-label an automatic answer as a fallback taken for `reason`.
    pub fn into_fallback(self, reason: impl Into<String>) -> Self {
        Self {
            answer: self.answer,
            origin: DecisionOrigin::Fallback {
                reason: reason.into(),
            },
        }
    }
}

/// Swappable decision capability consulted at every risk point.
pub trait CheckpointGate {
    /// Accept or override the evaluator's verdict on a dispatched action.
    fn judge_action(&self, intention: &Intention, draft: &CycleDraft) -> Decision<Judgment>;

    fn approve_decomposition(
        &self,
        intention: &Intention,
        proposed: &[IntentionDraft],
    ) -> Decision<bool>;

    /// Confirm that verified children jointly satisfy the parent's acceptance criterion.
    fn verify_integration(&self, intention: &Intention, children: &[&Intention]) -> Decision<bool>;

    /// Confirm a reflection before it may steer the next attempt.
    fn review_reflection(&self, intention: &Intention, cycle: &Cycle) -> Decision<bool>;
}

impl<G: CheckpointGate + ?Sized> CheckpointGate for Box<G> {
    fn judge_action(&self, intention: &Intention, draft: &CycleDraft) -> Decision<Judgment> {
        (**self).judge_action(intention, draft)
    }

    fn approve_decomposition(
        &self,
        intention: &Intention,
        proposed: &[IntentionDraft],
    ) -> Decision<bool> {
        (**self).approve_decomposition(intention, proposed)
    }

    fn verify_integration(&self, intention: &Intention, children: &[&Intention]) -> Decision<bool> {
        (**self).verify_integration(intention, children)
    }

    fn review_reflection(&self, intention: &Intention, cycle: &Cycle) -> Decision<bool> {
        (**self).review_reflection(intention, cycle)
    }
}
