//! Deterministic checkpoint used for autonomous runs and as the human fallback.

use std::collections::HashSet;

use tracing::warn;

use crate::checkpoint::{CheckpointGate, Decision};
use crate::core::heuristics::{MAX_CHILDREN, MIN_CHILDREN};
use crate::core::judgment::evaluate;
use crate::core::text::normalize;
use crate::core::tree::Intention;
use crate::core::types::{Cycle, CycleDraft, IntentionDraft, IntentionStatus, Judgment};

/// Answers every checkpoint from the evaluator and simple structural rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCheckpoint;

impl CheckpointGate for AutoCheckpoint {
    fn judge_action(&self, _intention: &Intention, draft: &CycleDraft) -> Decision<Judgment> {
        Decision::automatic(evaluate(&draft.action, &draft.result))
    }

    fn approve_decomposition(
        &self,
        intention: &Intention,
        proposed: &[IntentionDraft],
    ) -> Decision<bool> {
        match check_decomposition(intention, proposed) {
            Ok(()) => Decision::automatic(true),
            Err(reason) => {
                warn!(intention = %intention.id, %reason, "decomposition rejected");
                Decision::automatic(false)
            }
        }
    }

    fn verify_integration(&self, _intention: &Intention, children: &[&Intention]) -> Decision<bool> {
        let verified = !children.is_empty()
            && children
                .iter()
                .all(|child| child.status == IntentionStatus::Verified);
        Decision::automatic(verified)
    }

    fn review_reflection(&self, _intention: &Intention, cycle: &Cycle) -> Decision<bool> {
        let usable = cycle
            .reflection
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        Decision::automatic(usable)
    }
}

/// A decomposition is acceptable with 2-5 non-empty children, each textually distinct
/// from the parent and from each other.
pub fn check_decomposition(intention: &Intention, proposed: &[IntentionDraft]) -> Result<(), String> {
    if !(MIN_CHILDREN..=MAX_CHILDREN).contains(&proposed.len()) {
        return Err(format!(
            "expected {MIN_CHILDREN}-{MAX_CHILDREN} children, got {}",
            proposed.len()
        ));
    }
    let parent = normalize(&intention.what);
    let mut seen = HashSet::new();
    for child in proposed {
        let text = normalize(&child.what);
        if text.is_empty() {
            return Err("child with empty goal".to_string());
        }
        if text == parent {
            return Err(format!("child '{}' repeats the parent goal", child.what));
        }
        if !seen.insert(text) {
            return Err(format!("duplicate child '{}'", child.what));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::DecisionOrigin;
    use crate::core::tree::{IntentionId, IntentionTree};
    use crate::core::types::{Action, ActionResult};

    fn parent() -> Intention {
        IntentionTree::new("set up A and configure B", "B responds")
            .root()
            .clone()
    }

    fn drafts(whats: &[&str]) -> Vec<IntentionDraft> {
        whats
            .iter()
            .map(|what| IntentionDraft::new(*what, "it runs"))
            .collect()
    }

    #[test]
    fn judge_action_uses_evaluator() {
        let draft = CycleDraft {
            thought: "t".to_string(),
            action: Action::command("false"),
            result: ActionResult::failed("boom"),
            evaluated: Judgment::Failure,
        };
        let decision = AutoCheckpoint.judge_action(&parent(), &draft);
        assert_eq!(decision.answer, Judgment::Failure);
        assert_eq!(decision.origin, DecisionOrigin::Automatic);
    }

    #[test]
    fn approves_two_to_five_distinct_children() {
        let gate = AutoCheckpoint;
        let p = parent();
        assert!(gate.approve_decomposition(&p, &drafts(&["set up A", "configure B"])).answer);
        assert!(!gate.approve_decomposition(&p, &drafts(&["set up A"])).answer);
        assert!(
            !gate
                .approve_decomposition(&p, &drafts(&["a", "b", "c", "d", "e", "f"]))
                .answer
        );
    }

    #[test]
    fn rejects_children_that_repeat_parent_or_each_other() {
        let p = parent();
        assert!(check_decomposition(&p, &drafts(&["Set up A, and configure B", "x y"])).is_err());
        assert!(check_decomposition(&p, &drafts(&["set up A", "Set up  A"])).is_err());
    }

    #[test]
    fn integration_requires_all_children_verified() {
        let mut tree = IntentionTree::new("root", "root exists");
        tree.transition(IntentionId::ROOT, IntentionStatus::Active)
            .expect("active");
        let a = tree
            .add_child(IntentionId::ROOT, IntentionDraft::new("a a", "a exists"))
            .expect("a");
        let gate = AutoCheckpoint;
        let child = tree.get(a).expect("a").clone();
        assert!(!gate.verify_integration(tree.root(), &[&child]).answer);
        assert!(!gate.verify_integration(tree.root(), &[]).answer);

        let mut verified = child.clone();
        verified.status = IntentionStatus::Verified;
        assert!(gate.verify_integration(tree.root(), &[&verified]).answer);
    }

    #[test]
    fn blank_reflection_is_rejected() {
        let mut cycle = CycleDraft {
            thought: "t".to_string(),
            action: Action::query("x"),
            result: ActionResult::default(),
            evaluated: Judgment::Unclear,
        }
        .finish(Judgment::Unclear);
        assert!(!AutoCheckpoint.review_reflection(&parent(), &cycle).answer);
        cycle.reflection = Some("try a narrower search".to_string());
        assert!(AutoCheckpoint.review_reflection(&parent(), &cycle).answer);
    }
}
